use serde_json::json;

use crate::backend::Backend;
use crate::best_effort::attempt_async;
use crate::internal::oauth_flow_controller::SingleFlight;
use crate::internal::session_synchronizer::SyncOutcome;
use crate::page::{Page, ToastLevel};
use crate::provider::{AuthEvent, AuthProvider, ProviderSession};
use crate::state::SessionManager;
use crate::time_ext::TimeDurationExt;
use crate::user::{UserMeta, format_role_for_display};

/// DOM event dispatched on the document when the server reports a different role.
pub const ROLE_CHANGED_EVENT: &str = "userRoleChanged";

/// The role to compare against. In citizen mode the staff role is what the server reports.
fn comparable_role(meta: UserMeta) -> Option<String> {
    let role = match meta.is_citizen_mode() {
        true => meta.actual_role,
        false => meta.role,
    };
    role.filter(|it| !it.is_empty())
}

impl<P, B, G> SessionManager<P, B, G>
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    /// Reacts to a session change reported by the auth provider.
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::TokenRefreshed(session) => {
                if !self.store().is_device_trusted() {
                    tracing::debug!("Token refreshed on untrusted device, signing out");
                    attempt_async("Signing out of provider", self.provider().sign_out()).await;
                    self.handle_session_expired().await;
                    return;
                }
                self.sync_server_session(&session.access_token).await;
                self.check_role_change().await;
            }
            AuthEvent::SignedIn(session) => {
                self.signed_in(&session).await;
            }
            AuthEvent::SignedOut => {
                self.stop_token_expiry_monitoring();
                self.invalidate_role_cache();
                self.store().clear_user_meta();
                self.abort_oauth_context();
            }
        }
    }

    /// A provider session was obtained: pushes it to the server and starts watching it.
    pub(crate) async fn signed_in(&self, session: &ProviderSession) -> SyncOutcome {
        tracing::trace!("Signed in");
        let outcome = self.sync_server_session(&session.access_token).await;
        self.start_token_expiry_monitoring();
        outcome
    }

    /// Compares the persisted role with the one the server reports now. On a change, tells the
    /// page and reloads it. Returns whether the role changed.
    pub async fn check_role_change(&self) -> bool {
        let Some(_flight) = SingleFlight::enter(&self.inner.role_check_running) else {
            tracing::trace!("Role change check already running");
            return false;
        };
        if self.on_auth_page() {
            return false;
        }
        let Some(old_role) = self.store().user_meta().and_then(comparable_role) else {
            return false;
        };

        self.invalidate_role_cache();
        let session = self.provider_session().await;
        let bearer = session.as_ref().map(|it| it.access_token.as_str());
        let data = match self.backend().fetch_role(bearer).await {
            Ok(Some(data)) => data,
            Ok(None) => return false,
            Err(err) => {
                tracing::debug!(?err, "Could not fetch role for change check");
                return false;
            }
        };
        let Some(new_role) = data.role.clone().filter(|it| !it.is_empty()) else {
            return false;
        };

        if new_role == old_role {
            self.remember_role(data);
            return false;
        }

        tracing::debug!(
            old_role = old_role.as_str(),
            new_role = new_role.as_str(),
            "Role changed"
        );
        self.invalidate_role_cache();
        self.store().clear_user_meta();
        self.page().dispatch_event(
            ROLE_CHANGED_EVENT,
            json!({ "oldRole": old_role, "newRole": new_role }),
        );
        self.toast(
            ToastLevel::Info,
            format!(
                "Your role has been updated to {}. Refreshing page...",
                format_role_for_display(Some(&new_role))
            ),
        );
        self.page()
            .reload_after(self.timings().role_change_reload_delay);
        true
    }

    /// Refreshes the provider session and handles the result like a provider refresh event.
    /// Returns whether a new session was obtained.
    pub async fn refresh_provider_session(&self) -> bool {
        match attempt_async("Refreshing provider session", self.provider().refresh_session())
            .await
            .flatten()
        {
            Some(session) => {
                self.handle_auth_event(AuthEvent::TokenRefreshed(session))
                    .await;
                true
            }
            None => false,
        }
    }

    /// Keeps the provider session of a trusted device fresh, refreshing it shortly before it
    /// expires. Ends when the device is untrusted, the session is gone or a refresh fails.
    pub async fn run_session_refresh(&self) {
        loop {
            if !self.store().is_device_trusted() {
                return;
            }
            let Some(expires_at) = self
                .provider_session()
                .await
                .and_then(|session| session.expires_at())
            else {
                return;
            };
            let refresh_at = expires_at - self.timings().refresh_ahead;
            self.page()
                .sleep((refresh_at - self.now()).to_std_duration())
                .await;
            if !self.refresh_provider_session().await {
                tracing::debug!("Session refresh loop ended");
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;

    #[test]
    fn citizen_mode_compares_the_staff_role() {
        let meta = UserMeta {
            role: Some("citizen".to_owned()),
            name: None,
            actual_role: Some("lgu-admin-ceo".to_owned()),
            mode: Some(UserMeta::CITIZEN_MODE.to_owned()),
        };
        assert_that(comparable_role(meta)).is_equal_to(Some("lgu-admin-ceo".to_owned()));

        let meta = UserMeta::new(Some("citizen".to_owned()), None);
        assert_that(comparable_role(meta)).is_equal_to(Some("citizen".to_owned()));
    }
}
