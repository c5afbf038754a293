use crate::backend::Backend;
use crate::best_effort::attempt_async;
use crate::page::Page;
use crate::provider::{AuthProvider, ProviderSession};
use crate::state::SessionManager;

/// Result of pushing a provider session to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The server honors the cookie. Redirecting to protected pages is safe.
    Verified,

    /// The cookie could not be verified. Redirecting now would likely loop back, so the caller
    /// should stay on the current page.
    StayOnPage,
}

impl<P: AuthProvider, B: Backend, G: Page> SessionManager<P, B, G> {
    /// Lets the server mint its cookie session for `access_token` and checks that it is
    /// honored, retrying the check once after a short backoff.
    pub async fn sync_server_session(&self, access_token: &str) -> SyncOutcome {
        if let Err(err) = self.backend().create_session(access_token).await {
            tracing::warn!(?err, "Could not create server session");
        }

        if self.cookie_session_accepted().await {
            return SyncOutcome::Verified;
        }
        tracing::debug!("Cookie session not yet accepted, retrying once");
        self.page().sleep(self.timings().verify_backoff).await;
        if self.cookie_session_accepted().await {
            return SyncOutcome::Verified;
        }

        tracing::warn!("Server does not accept the cookie session");
        SyncOutcome::StayOnPage
    }

    /// Checks a protected endpoint without bearer token, so that only the cookie counts.
    async fn cookie_session_accepted(&self) -> bool {
        match self.backend().fetch_role(None).await {
            Ok(_) => true,
            Err(err) => {
                tracing::debug!(?err, "Cookie session check failed");
                false
            }
        }
    }

    /// Tears the server cookie session down. Best effort.
    pub async fn delete_server_session(&self) {
        attempt_async("Deleting server session", self.backend().delete_session()).await;
        self.invalidate_role_cache();
    }

    /// Whether a usable provider session exists, refreshing an expired one on trusted devices.
    ///
    /// A refreshed token is pushed to the server right away.
    pub async fn validate_and_refresh_token(&self) -> bool {
        match self.usable_provider_session().await {
            Some((session, true)) => {
                self.sync_server_session(&session.access_token).await;
                true
            }
            Some((_, false)) => true,
            None => false,
        }
    }

    /// The provider session, refreshed first when it expired on a trusted device. The flag
    /// tells whether a refresh happened.
    pub(crate) async fn usable_provider_session(&self) -> Option<(ProviderSession, bool)> {
        let session = self.provider_session().await?;
        if !session.is_expired(self.now()) {
            return Some((session, false));
        }
        if !self.store().is_device_trusted() {
            tracing::debug!("Session expired on untrusted device");
            return None;
        }
        attempt_async("Refreshing provider session", self.provider().refresh_session())
            .await
            .flatten()
            .map(|refreshed| (refreshed, true))
    }
}
