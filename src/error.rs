use crate::oauth_context::InvalidTransition;
use crate::provider::ProviderError;
use snafu::Snafu;

/// Errors surfaced by the session coordinator.
///
/// Most operations are best effort and never return these. Callers of `get_user_role` only ever
/// see `Unauthorized`.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SessionError {
    #[snafu(display("SessionError: The server rejected the session"))]
    Unauthorized,

    #[snafu(display("SessionError: Auth provider error"))]
    Provider { source: ProviderError },

    #[snafu(display("SessionError: {source}"))]
    Transition { source: InvalidTransition },
}
