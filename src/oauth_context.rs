use serde::{Deserialize, Serialize};
use snafu::Snafu;
use time::OffsetDateTime;

/// Why the user started an OAuth attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthIntent {
    Login,
    Signup,
}

impl OAuthIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthIntent::Login => "login",
            OAuthIntent::Signup => "signup",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthStatus {
    /// The user clicked an OAuth button and was sent to the provider.
    Pending,

    /// The provider returned control, but the profile still has to be completed.
    Handoff,

    /// Only ever read from records of older clients. Treated like an absent context.
    Completed,
}

/// Persisted record of an ongoing OAuth attempt, stored under `cl_oauth_context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthContext {
    pub provider: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    pub intent: OAuthIntent,

    pub status: OAuthStatus,

    #[serde(with = "crate::time_ext::epoch_millis")]
    pub started_at: OffsetDateTime,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "crate::time_ext::epoch_millis::option"
    )]
    pub last_activity: Option<OffsetDateTime>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_new_signup: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl OAuthContext {
    pub fn is_pending_signup(&self) -> bool {
        self.intent == OAuthIntent::Signup && self.status == OAuthStatus::Pending
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self.status, OAuthStatus::Pending | OAuthStatus::Handoff)
    }
}

/// Profile hints reported by the server once the provider returned control.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandoffHints {
    pub user_type: Option<String>,
    pub is_new_signup: bool,
    pub message: Option<String>,
}

/// The lifecycle of one OAuth attempt.
///
/// Absence of a stored context is the terminal state: a completed or aborted attempt leaves
/// nothing behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthState {
    None,
    Pending(OAuthContext),
    Handoff(OAuthContext),
}

impl OAuthState {
    pub fn from_stored(ctx: Option<OAuthContext>) -> Self {
        match ctx {
            Some(ctx) => match ctx.status {
                OAuthStatus::Pending => OAuthState::Pending(ctx),
                OAuthStatus::Handoff => OAuthState::Handoff(ctx),
                OAuthStatus::Completed => OAuthState::None,
            },
            None => OAuthState::None,
        }
    }

    pub fn context(&self) -> Option<&OAuthContext> {
        match self {
            OAuthState::None => None,
            OAuthState::Pending(ctx) | OAuthState::Handoff(ctx) => Some(ctx),
        }
    }

    pub fn into_context(self) -> Option<OAuthContext> {
        match self {
            OAuthState::None => None,
            OAuthState::Pending(ctx) | OAuthState::Handoff(ctx) => Some(ctx),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            OAuthState::None => "none",
            OAuthState::Pending(_) => "pending",
            OAuthState::Handoff(_) => "handoff",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OAuthEvent {
    /// An OAuth button was clicked and the redirect is about to happen.
    Started {
        provider: String,
        intent: OAuthIntent,
        email: Option<String>,
        at: OffsetDateTime,
    },

    /// The provider returned a session and the profile is not yet complete.
    ///
    /// Fields left `None` are taken over from the current context. `hints` is `None` when the
    /// server could not be asked about the profile.
    ProviderReturned {
        provider: Option<String>,
        email: Option<String>,
        fallback_intent: OAuthIntent,
        at: OffsetDateTime,
        hints: Option<HandoffHints>,
    },

    /// The tab got hidden while the attempt was running.
    Activity { at: OffsetDateTime },

    /// The profile completion form succeeded.
    Completed,

    /// The attempt was abandoned and cleaned up.
    Aborted,
}

impl OAuthEvent {
    fn name(&self) -> &'static str {
        match self {
            OAuthEvent::Started { .. } => "started",
            OAuthEvent::ProviderReturned { .. } => "provider-returned",
            OAuthEvent::Activity { .. } => "activity",
            OAuthEvent::Completed => "completed",
            OAuthEvent::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(display("InvalidTransition: '{event}' is not allowed in state '{from}'"))]
pub struct InvalidTransition {
    pub from: &'static str,
    pub event: &'static str,
}

/// Computes the state following `state` when `event` occurs.
///
/// The only place deciding which OAuth lifecycle changes are legal.
pub fn transition(state: OAuthState, event: OAuthEvent) -> Result<OAuthState, InvalidTransition> {
    let from = state.name();
    let event_name = event.name();

    match (state, event) {
        (
            OAuthState::None | OAuthState::Pending(_),
            OAuthEvent::Started {
                provider,
                intent,
                email,
                at,
            },
        ) => Ok(OAuthState::Pending(OAuthContext {
            provider,
            email,
            intent,
            status: OAuthStatus::Pending,
            started_at: at,
            last_activity: None,
            user_type: None,
            is_new_signup: None,
            message: None,
        })),

        (
            state,
            OAuthEvent::ProviderReturned {
                provider,
                email,
                fallback_intent,
                at,
                hints,
            },
        ) => {
            let previous = state.into_context();
            let intent = previous
                .as_ref()
                .map_or(fallback_intent, |ctx| ctx.intent);
            let provider = provider
                .or_else(|| previous.as_ref().map(|ctx| ctx.provider.clone()))
                .unwrap_or_else(|| "oauth".to_owned());
            let email = email.or_else(|| previous.as_ref().and_then(|ctx| ctx.email.clone()));

            let (user_type, is_new_signup, message) = match hints {
                Some(hints) => (
                    hints.user_type,
                    Some(hints.is_new_signup || intent == OAuthIntent::Signup),
                    hints.message,
                ),
                None => (None, None, None),
            };

            Ok(OAuthState::Handoff(OAuthContext {
                provider,
                email,
                intent,
                status: OAuthStatus::Handoff,
                started_at: at,
                last_activity: None,
                user_type,
                is_new_signup,
                message,
            }))
        }

        (OAuthState::Pending(mut ctx), OAuthEvent::Activity { at }) => {
            ctx.last_activity = Some(at);
            Ok(OAuthState::Pending(ctx))
        }
        (OAuthState::Handoff(mut ctx), OAuthEvent::Activity { at }) => {
            ctx.last_activity = Some(at);
            Ok(OAuthState::Handoff(ctx))
        }

        (OAuthState::Pending(_) | OAuthState::Handoff(_), OAuthEvent::Completed) => {
            Ok(OAuthState::None)
        }

        (_, OAuthEvent::Aborted) => Ok(OAuthState::None),

        _ => Err(InvalidTransition {
            from,
            event: event_name,
        }),
    }
}
