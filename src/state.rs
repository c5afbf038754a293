use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use time::OffsetDateTime;

use crate::backend::Backend;
use crate::best_effort::attempt_async;
use crate::config::{PageRules, SessionOptions, Timings};
use crate::context_store::ContextStore;
use crate::internal::role_cache::RoleCache;
use crate::internal::session_synchronizer::SyncOutcome;
use crate::internal::token_expiry_monitor::MonitorState;
use crate::oauth_context::{OAuthEvent, OAuthState};
use crate::page::{Page, Toast, ToastLevel};
use crate::provider::{AuthEvent, AuthProvider, ProviderSession};

/// The session coordinator of one page.
///
/// A cheap handle: clones share all state, so that event handlers and spawned tasks act on the
/// same role cache, monitor and guards.
///
/// Provided as context by `init_citizenlink_session`. Use `use_citizenlink_session` to get
/// access to it in any component rendered below.
pub struct SessionManager<P, B, G> {
    pub(crate) inner: Arc<Inner<P, B, G>>,
}

impl<P, B, G> Clone for SessionManager<P, B, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, B, G> std::fmt::Debug for SessionManager<P, B, G> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("options", &self.inner.options)
            .field("store", &self.inner.store)
            .finish_non_exhaustive()
    }
}

pub(crate) struct Inner<P, B, G> {
    pub(crate) options: SessionOptions,
    pub(crate) provider: P,
    pub(crate) backend: B,
    pub(crate) page: G,
    pub(crate) store: ContextStore,
    pub(crate) role_cache: RoleCache,
    pub(crate) monitor: MonitorState,

    /// Set while a role change check runs.
    pub(crate) role_check_running: AtomicBool,

    /// Set while an abandoned OAuth attempt is cleaned up.
    pub(crate) cleanup_running: AtomicBool,

    /// Set from `begin_oauth` until the page is visible again. The unload of the page leaving
    /// for the provider is not an abandonment.
    pub(crate) oauth_redirecting: AtomicBool,
}

/// What the page header should offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderAuthState {
    /// Auth pages render their own navigation.
    Hidden,
    Anonymous,
    Authenticated { dashboard_href: String },
}

impl<P: AuthProvider, B: Backend, G: Page> SessionManager<P, B, G> {
    pub fn new(
        options: SessionOptions,
        provider: P,
        backend: B,
        page: G,
        store: ContextStore,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                options,
                provider,
                backend,
                page,
                store,
                role_cache: RoleCache::new(),
                monitor: MonitorState::new(),
                role_check_running: AtomicBool::new(false),
                cleanup_running: AtomicBool::new(false),
                oauth_redirecting: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> &SessionOptions {
        &self.inner.options
    }

    pub fn provider(&self) -> &P {
        &self.inner.provider
    }

    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    pub fn page(&self) -> &G {
        &self.inner.page
    }

    pub fn store(&self) -> &ContextStore {
        &self.inner.store
    }

    pub(crate) fn timings(&self) -> &Timings {
        &self.inner.options.advanced
    }

    pub(crate) fn pages(&self) -> &PageRules {
        &self.inner.options.pages
    }

    pub(crate) fn on_auth_page(&self) -> bool {
        self.pages().is_auth_page(&self.page().path())
    }

    pub(crate) fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    /// The current OAuth attempt, as far as it can be read from storage.
    pub fn oauth_state(&self) -> OAuthState {
        OAuthState::from_stored(self.store().oauth_context())
    }

    pub(crate) fn oauth_in_flight(&self) -> bool {
        self.oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_in_flight())
    }

    /// The persisted provider session. Read failures count as "no session".
    pub(crate) async fn provider_session(&self) -> Option<ProviderSession> {
        attempt_async("Reading provider session", self.provider().session())
            .await
            .flatten()
    }

    pub(crate) fn toast(&self, level: ToastLevel, message: impl Into<String>) {
        self.page().show_toast(Toast::new(level, message));
    }

    /// Decides what the header offers on the current page.
    pub async fn header_auth_state(&self) -> HeaderAuthState {
        if self.on_auth_page() {
            return HeaderAuthState::Hidden;
        }
        let Some(session) = self.provider_session().await else {
            return HeaderAuthState::Anonymous;
        };
        if self
            .oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_pending_signup())
        {
            return HeaderAuthState::Anonymous;
        }
        match self
            .backend()
            .fetch_role(Some(session.access_token.as_str()))
            .await
        {
            Ok(_) => HeaderAuthState::Authenticated {
                dashboard_href: self.pages().dashboard_page.clone(),
            },
            Err(err) => {
                tracing::debug!(?err, "Role endpoint did not accept the session");
                HeaderAuthState::Anonymous
            }
        }
    }

    pub async fn captcha_site_key(&self) -> Option<String> {
        attempt_async("Loading CAPTCHA site key", self.backend().captcha_site_key())
            .await
            .flatten()
    }

    /// Verifies a solved CAPTCHA with the server, telling the user when it was rejected.
    ///
    /// Always passes on localhost, where no CAPTCHA is rendered.
    pub async fn verify_captcha(&self, token: Option<&str>) -> bool {
        let url = self.page().current_url();
        if matches!(url.host_str(), Some("localhost" | "127.0.0.1")) {
            return true;
        }
        let Some(token) = token.filter(|it| !it.is_empty()) else {
            self.toast(
                ToastLevel::Error,
                "Please complete the CAPTCHA verification.",
            );
            return false;
        };
        match self.backend().verify_captcha(token).await {
            Ok(verification) if verification.success => true,
            Ok(verification) => {
                tracing::debug!(?verification, "CAPTCHA rejected");
                let reason = verification.reason().unwrap_or("Please try again.");
                self.toast(
                    ToastLevel::Error,
                    format!("CAPTCHA verification failed: {reason}"),
                );
                false
            }
            Err(err) => {
                tracing::warn!(?err, "Could not verify CAPTCHA");
                self.toast(
                    ToastLevel::Error,
                    "CAPTCHA verification failed. Please try again.",
                );
                false
            }
        }
    }


    /// Drops the OAuth context, whatever state it is in.
    pub(crate) fn abort_oauth_context(&self) {
        if let Err(err) = self.apply_oauth_event(OAuthEvent::Aborted) {
            tracing::error!(?err, "Aborting must be allowed in every state");
        }
    }
}

impl<P, B, G> SessionManager<P, B, G>
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    /// Ends the session everywhere and goes to the login page, even when parts of the teardown
    /// failed.
    pub async fn logout(&self) {
        tracing::trace!("Logging out");
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;
        self.handle_auth_event(AuthEvent::SignedOut).await;
        self.page().navigate(&self.pages().login_page);
    }

    /// Runs once per page load: settles OAuth leftovers first, then makes sure the server
    /// session matches the provider session and starts watching it.
    pub async fn on_page_load(&self) {
        self.global_oauth_guard().await;
        self.on_page_visible().await;

        if self.on_auth_page() || self.oauth_in_flight() {
            return;
        }
        if let Some(message) = self.store().take_oauth_success_message() {
            self.toast(ToastLevel::Success, message);
        }
        let Some((session, _)) = self.usable_provider_session().await else {
            tracing::trace!("No usable session on page load");
            return;
        };
        if self.sync_server_session(&session.access_token).await == SyncOutcome::StayOnPage {
            tracing::debug!("Server session unverified on page load, leaving it to the monitor");
        }
        self.start_token_expiry_monitoring();

        let this = self.clone();
        self.page().spawn(async move { this.run_session_refresh().await });
    }
}

#[cfg(feature = "hydrate")]
pub type BrowserSessionManager = SessionManager<
    crate::supabase::SupabaseAuth,
    crate::backend::HttpBackend,
    crate::page::BrowserPage,
>;

#[cfg(feature = "hydrate")]
impl BrowserSessionManager {
    /// Coordinator for the real browser: Supabase auth, the CitizenLink API and browser storage.
    pub fn browser(options: SessionOptions) -> Self {
        use crate::storage::{BrowserStore, StorageArea};

        let provider = crate::supabase::SupabaseAuth::new(
            &options.provider,
            Arc::new(BrowserStore::new(StorageArea::Local)),
        );
        let backend = crate::backend::HttpBackend::new(options.api_base_url.clone());
        let page = crate::page::BrowserPage::new(options.api_base_url.clone());
        Self::new(
            options,
            provider,
            backend,
            page,
            ContextStore::browser(),
        )
    }
}
