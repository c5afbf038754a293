use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::Snafu;
use time::OffsetDateTime;
use url::Url;

use crate::request::RequestError;
use crate::response::ProviderErrorResponse;
use crate::storage::StorageError;
use crate::user::UserMeta;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    #[snafu(display("ProviderError: Request error"))]
    Request { source: RequestError },

    #[snafu(display("ProviderError: Rejected: {}", error_response.description()))]
    Rejected {
        error_response: ProviderErrorResponse,
    },

    #[snafu(display("ProviderError: Could not access the stored session"))]
    Storage { source: StorageError },

    #[snafu(display("ProviderError: Could not decode token claims"))]
    Claims { source: jsonwebtoken::errors::Error },

    #[snafu(display("ProviderError: No code verifier stored for this login attempt"))]
    MissingCodeVerifier,
}

/// Session held by the auth provider. Mirrors what the provider's JavaScript client persists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSession {
    pub access_token: String,

    pub refresh_token: String,

    /// Unix timestamp in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,

    pub user: ProviderUser,
}

impl ProviderSession {
    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.expires_at
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
    }

    /// A session without known expiry is never considered expired.
    pub fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at().is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUser {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub user_metadata: Map<String, Value>,

    #[serde(default)]
    pub raw_user_meta_data: Map<String, Value>,

    #[serde(default)]
    pub identities: Vec<ProviderIdentity>,
}

impl ProviderUser {
    pub fn user_meta(&self) -> UserMeta {
        UserMeta::from_provider_metadata(&self.user_metadata, &self.raw_user_meta_data)
    }

    /// Name of the first linked identity provider, E.g. "google".
    pub fn primary_provider(&self) -> Option<&str> {
        self.identities.first().map(|it| it.provider.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderIdentity {
    pub provider: String,
}

/// Session changes reported by the auth provider.
#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(ProviderSession),
    SignedOut,
    TokenRefreshed(ProviderSession),
}

/// The third-party authentication service.
///
/// Implementations keep the session in browser storage, so every method may be called from any
/// page without prior setup.
#[allow(async_fn_in_trait)]
pub trait AuthProvider {
    /// The persisted session, which may be expired.
    async fn session(&self) -> Result<Option<ProviderSession>, ProviderError>;

    /// Trades the refresh token for a new session. `None` when there is no session to refresh
    /// or the provider declared it ended.
    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError>;

    /// Forgets the local session and revokes it provider side. The local session is gone even
    /// when this returns an error.
    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Adopts tokens obtained elsewhere, E.g. in an OAuth popup.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<ProviderSession, ProviderError>;

    /// Url to send the browser to in order to sign in with `provider`.
    fn authorize_url(&self, provider: &str, redirect_to: &Url) -> Result<Url, ProviderError>;

    /// Completes a redirect-based sign in.
    async fn exchange_code(&self, code: &str) -> Result<ProviderSession, ProviderError>;
}
