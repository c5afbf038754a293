use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::backend::Backend;
use crate::best_effort::attempt_async;
use crate::page::{Page, Toast, ToastLevel};
use crate::provider::AuthProvider;
use crate::state::SessionManager;

const SESSION_EXPIRED_MESSAGE: &str = "Authentication failed. Please log in again.";
const SESSION_EXPIRED_TOAST_DURATION: Duration = Duration::from_secs(5);

/// Bookkeeping of the expiry monitor loop.
#[derive(Debug, Default)]
pub(crate) struct MonitorState {
    /// Bumped on every start and stop. A loop only acts while its generation is current.
    generation: AtomicU64,

    /// Consecutive failed checks.
    failures: AtomicU32,
}

impl MonitorState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Invalidates all running loops and returns the generation of the next one.
    fn advance(&self) -> u64 {
        self.failures.store(0, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// What the monitor does after a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStep {
    /// Check again after the given delay.
    Continue { next_check: Duration },

    /// Nothing to watch, or monitoring was stopped.
    Stop,

    /// The session was rejected and the user logged out.
    ForcedLogout,
}

impl<P: AuthProvider, B: Backend, G: Page> SessionManager<P, B, G> {
    /// Runs a single check of the monitor.
    pub async fn check_token_expiry(&self) -> MonitorStep {
        self.check_token_expiry_in(self.inner.monitor.current()).await
    }

    async fn check_token_expiry_in(&self, generation: u64) -> MonitorStep {
        let timings = self.timings();
        let steady = MonitorStep::Continue {
            next_check: timings.monitor_interval,
        };

        if self.on_auth_page() {
            return MonitorStep::Stop;
        }
        let Some(session) = self.provider_session().await else {
            tracing::trace!("No provider session, stopping monitor");
            return MonitorStep::Stop;
        };
        if self.oauth_in_flight() {
            tracing::trace!("OAuth attempt in flight, skipping check");
            return steady;
        }

        let check = self
            .backend()
            .fetch_role(Some(session.access_token.as_str()))
            .await;

        // A stop was requested while the check was in flight.
        if !self.inner.monitor.is_current(generation) {
            return MonitorStep::Stop;
        }

        let monitor = &self.inner.monitor;
        match check {
            Ok(_) => {
                monitor.failures.store(0, Ordering::Release);
                steady
            }
            Err(err) if err.is_unauthorized() => {
                if self.provider_session().await.is_none() {
                    tracing::trace!("Session gone after rejected check, stopping monitor");
                    return MonitorStep::Stop;
                }
                tracing::debug!("Server rejected the session");
                self.expire_session().await
            }
            Err(err) if err.status().is_some() => {
                let failures = monitor.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures < timings.monitor_max_retries {
                    tracing::debug!(?err, failures, "Session check failed, retrying");
                    return MonitorStep::Continue {
                        next_check: timings.monitor_retry_backoff,
                    };
                }
                if self.pages().is_monitor_exempt(&self.page().path()) {
                    tracing::debug!("Checks keep failing on an exempt page, stopping monitor");
                    return MonitorStep::Stop;
                }
                tracing::warn!(?err, failures, "Session checks keep failing");
                self.expire_session().await
            }
            Err(err) => {
                tracing::debug!(?err, "Session check could not be sent, stopping monitor");
                MonitorStep::Stop
            }
        }
    }

    async fn expire_session(&self) -> MonitorStep {
        match self.handle_session_expired().await {
            true => MonitorStep::ForcedLogout,
            false => MonitorStep::Stop,
        }
    }

    /// Checks until stopped, or until the session is gone.
    pub async fn run_token_expiry_monitor(&self) {
        self.run_monitor_loop(self.inner.monitor.current()).await;
    }

    async fn run_monitor_loop(&self, generation: u64) {
        tracing::trace!(generation, "Token expiry monitor running");
        loop {
            if !self.inner.monitor.is_current(generation) {
                tracing::trace!(generation, "Token expiry monitor stopped");
                return;
            }
            match self.check_token_expiry_in(generation).await {
                MonitorStep::Continue { next_check } => self.page().sleep(next_check).await,
                MonitorStep::Stop | MonitorStep::ForcedLogout => return,
            }
        }
    }

    /// Prevents the next check of every running monitor loop.
    pub fn stop_token_expiry_monitoring(&self) {
        self.inner.monitor.advance();
    }

    /// Forces a logout because the session is no longer accepted. Returns whether it happened.
    ///
    /// Skipped on auth pages, during an auth error suppression window and during a pending
    /// OAuth signup.
    pub async fn handle_session_expired(&self) -> bool {
        if self.on_auth_page() {
            return false;
        }
        if self.store().take_auth_error_suppression() {
            tracing::debug!("Session expiry suppressed");
            return false;
        }
        if self
            .oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_pending_signup())
        {
            tracing::debug!("Session expiry ignored during OAuth signup");
            return false;
        }

        tracing::debug!("Session expired, logging out");
        self.stop_token_expiry_monitoring();
        self.page().show_toast(
            Toast::new(ToastLevel::Error, SESSION_EXPIRED_MESSAGE)
                .with_duration(SESSION_EXPIRED_TOAST_DURATION),
        );
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;
        self.store().clear_user_meta();
        self.abort_oauth_context();
        self.page().clear_credential_fields();

        let href = format!("{}?session_expired=true", self.pages().login_page);
        self.page()
            .navigate_after(&href, self.timings().expired_redirect_delay);
        true
    }
}

impl<P, B, G> SessionManager<P, B, G>
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    /// Starts a fresh monitor loop, stopping any running one. The first check runs right away.
    /// Does nothing on auth pages.
    pub fn start_token_expiry_monitoring(&self) {
        if self.on_auth_page() {
            return;
        }
        let generation = self.inner.monitor.advance();
        let this = self.clone();
        self.page()
            .spawn(async move { this.run_monitor_loop(generation).await });
    }
}
