use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use snafu::ResultExt;
use url::Url;

use crate::backend::Backend;
use crate::best_effort::attempt_async;
use crate::error::{ProviderSnafu, SessionError, TransitionSnafu};
use crate::internal::session_synchronizer::SyncOutcome;
use crate::navigation;
use crate::oauth_context::{
    HandoffHints, InvalidTransition, OAuthEvent, OAuthIntent, OAuthState, transition,
};
use crate::page::{Page, ToastLevel};
use crate::popup_bridge::{self, PopupMessage};
use crate::provider::{AuthProvider, ProviderSession};
use crate::response::CallbackParams;
use crate::state::SessionManager;
use crate::time_ext::elapsed_since;

const STALE_SIGNUP_MESSAGE: &str = "OAuth signup did not finish. Please try again.";
const CANCELLED_SIGNUP_MESSAGE: &str = "OAuth signup was cancelled. Please try again.";
const USER_EXISTS_MESSAGE: &str = "User already exist";

const REASON_CANCELLED: &str = "Incomplete OAuth signup cancelled by user";
const REASON_NAVIGATED_AWAY: &str = "Incomplete OAuth signup cancelled - user navigated away";
const REASON_RETRY: &str = "Incomplete OAuth signup cancelled - retry deletion";

/// Where the OAuth callback page sent the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    Dashboard,

    /// The profile is complete, but the cookie session could not be verified.
    StayOnPage,

    Continuation,

    /// No session could be established. The user was sent back to the login page.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationDecision {
    RenderForm,
    RedirectToSignup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPageKind {
    Login,
    Signup,
}

/// Clears its flag when dropped.
pub(crate) struct SingleFlight<'a>(&'a AtomicBool);

impl<'a> SingleFlight<'a> {
    /// `None` while another holder exists.
    pub(crate) fn enter(flag: &'a AtomicBool) -> Option<Self> {
        match flag.swap(true, Ordering::AcqRel) {
            true => None,
            false => Some(Self(flag)),
        }
    }
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<P: AuthProvider, B: Backend, G: Page> SessionManager<P, B, G> {
    /// Applies `event` to the stored OAuth context. Storage stays untouched when the transition
    /// is not allowed.
    pub(crate) fn apply_oauth_event(
        &self,
        event: OAuthEvent,
    ) -> Result<OAuthState, InvalidTransition> {
        let next = transition(self.oauth_state(), event)?;
        match next.context() {
            Some(ctx) => self.store().set_oauth_context(ctx),
            None => self.store().clear_oauth_context(),
        }
        tracing::trace!(?next, "OAuth state changed");
        Ok(next)
    }

    /// Records the start of an OAuth attempt and returns the provider url to send the user to.
    pub fn begin_oauth(
        &self,
        provider: &str,
        intent: OAuthIntent,
        email: Option<String>,
    ) -> Result<Url, SessionError> {
        self.store()
            .suppress_auth_error_notifications(self.timings().auth_error_suppression);
        self.apply_oauth_event(OAuthEvent::Started {
            provider: provider.to_owned(),
            intent,
            email,
            at: self.now(),
        })
        .context(TransitionSnafu {})?;

        let mut redirect_to = self.page().current_url();
        redirect_to.set_path(&self.pages().callback_page);
        redirect_to.set_query(None);
        redirect_to.set_fragment(None);

        match self.provider().authorize_url(provider, &redirect_to) {
            Ok(url) => {
                self.inner.oauth_redirecting.store(true, Ordering::Release);
                Ok(url)
            }
            Err(source) => {
                tracing::warn!(?source, provider, "Could not start OAuth sign in");
                self.abort_oauth_context();
                self.toast(
                    ToastLevel::Error,
                    format!(
                        "{} sign-in failed",
                        popup_bridge::provider_display_name(Some(provider))
                    ),
                );
                Err(source).context(ProviderSnafu {})
            }
        }
    }

    fn hand_off(
        &self,
        session: &ProviderSession,
        fallback_intent: OAuthIntent,
        hints: Option<HandoffHints>,
    ) {
        let event = OAuthEvent::ProviderReturned {
            provider: session.user.primary_provider().map(str::to_owned),
            email: session.user.email.clone(),
            fallback_intent,
            at: self.now(),
            hints,
        };
        if let Err(err) = self.apply_oauth_event(event) {
            tracing::error!(?err, "Provider return must be allowed in every state");
        }
    }

    fn fail_callback(&self) -> CallbackOutcome {
        self.abort_oauth_context();
        let href = format!("{}?err=oauth_failed", self.pages().login_page);
        self.page().navigate(&href);
        CallbackOutcome::Failed
    }

    /// Decides whether the continuation page may render its profile completion form.
    pub async fn enter_continuation_page(&self) -> ContinuationDecision {
        match self.oauth_state() {
            OAuthState::Handoff(_) => ContinuationDecision::RenderForm,
            OAuthState::Pending(ctx) => {
                let age = elapsed_since(ctx.started_at, self.now());
                if age <= self.timings().continuation_stale_after {
                    return ContinuationDecision::RenderForm;
                }
                tracing::debug!(?age, "Stale OAuth attempt on continuation page");
                self.cleanup_pending_oauth(None).await;
                self.page().navigate(&self.pages().signup_page);
                ContinuationDecision::RedirectToSignup
            }
            OAuthState::None => match self.provider_session().await {
                Some(_) => ContinuationDecision::RenderForm,
                None => {
                    self.page().navigate(&self.pages().signup_page);
                    ContinuationDecision::RedirectToSignup
                }
            },
        }
    }

    /// The profile completion form succeeded.
    pub fn complete_oauth_profile(&self) -> Result<(), SessionError> {
        self.apply_oauth_event(OAuthEvent::Completed)
            .context(TransitionSnafu {})?;
        Ok(())
    }

    /// The user gave up on the profile completion form.
    pub async fn cancel_oauth_signup(&self) {
        self.cleanup_pending_oauth(Some(CANCELLED_SIGNUP_MESSAGE))
            .await;
        self.page().navigate(&self.pages().signup_page);
    }

    /// Undoes an unfinished OAuth attempt.
    ///
    /// Every step runs regardless of the others failing. Returns `false` without doing anything
    /// when another cleanup is already running.
    pub async fn cleanup_pending_oauth(&self, message: Option<&str>) -> bool {
        let Some(_flight) = SingleFlight::enter(&self.inner.cleanup_running) else {
            tracing::trace!("OAuth cleanup already running");
            return false;
        };
        tracing::debug!("Cleaning up OAuth attempt");

        let captured = self.oauth_state().into_context();
        let session = self.provider_session().await;

        if let (Some(ctx), Some(session)) = (&captured, &session) {
            if ctx.intent == OAuthIntent::Signup {
                self.delete_incomplete_user(session, REASON_CANCELLED).await;
            }
        }

        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;
        self.abort_oauth_context();
        self.store().scrub_provider_keys();
        self.store().clear_signup_drafts();

        if let Some(message) = message {
            self.toast(ToastLevel::Error, message);
        }
        true
    }

    /// Whether the incomplete user is gone. Auth rejections mean it already was.
    async fn delete_incomplete_user(&self, session: &ProviderSession, reason: &str) -> bool {
        match self
            .backend()
            .delete_incomplete_user(&session.access_token, &session.user.id, reason)
            .await
        {
            Ok(()) => true,
            Err(err) if err.is_auth_rejection() => {
                tracing::trace!(?err, "Incomplete user already gone");
                true
            }
            Err(err) => {
                tracing::warn!(?err, "Could not delete incomplete OAuth user");
                false
            }
        }
    }

    /// Cleans up a pending signup older than `threshold`. Returns whether a cleanup ran.
    pub async fn check_pending_oauth(&self, threshold: Duration) -> bool {
        let Some(ctx) = self
            .oauth_state()
            .into_context()
            .filter(|ctx| ctx.is_pending_signup())
        else {
            return false;
        };
        let age = elapsed_since(ctx.started_at, self.now());
        if age <= threshold {
            return false;
        }
        tracing::debug!(?age, "OAuth attempt went stale");
        self.cleanup_pending_oauth(Some(STALE_SIGNUP_MESSAGE)).await
    }

    /// The tab became visible or got focus. Checks for a stale attempt with the threshold of
    /// the current page.
    pub async fn on_page_visible(&self) -> bool {
        self.inner.oauth_redirecting.store(false, Ordering::Release);
        let path = self.page().path();
        let threshold = if self.pages().is_signup_page(&path) {
            self.timings().signup_stale_after
        } else if self.pages().is_continuation_page(&path) {
            self.timings().continuation_stale_after
        } else {
            return false;
        };
        self.check_pending_oauth(threshold).await
    }

    /// The tab got hidden. Remembers when a pending signup was last looked at.
    pub fn record_page_hidden(&self) {
        if !self
            .oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_pending_signup())
        {
            return;
        }
        if let Err(err) = self.apply_oauth_event(OAuthEvent::Activity { at: self.now() }) {
            tracing::error!(?err, "Activity must be allowed while pending");
        }
    }

    /// The page is being unloaded. A pending signup is abandoned, unless the page is leaving
    /// for the provider.
    pub async fn on_page_abandon(&self) -> bool {
        if self.inner.oauth_redirecting.load(Ordering::Acquire) {
            tracing::trace!("Leaving for the OAuth provider, keeping the attempt");
            return false;
        }
        if !self
            .oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_pending_signup())
        {
            return false;
        }
        self.cleanup_pending_oauth(None).await
    }

    /// Abandons a pending attempt because the user explicitly navigated elsewhere.
    pub async fn clear_oauth_on_navigation(&self) {
        let OAuthState::Pending(ctx) = self.oauth_state() else {
            return;
        };
        let session = self.provider_session().await;

        if ctx.intent == OAuthIntent::Signup {
            if let Some(session) = &session {
                let user_id = session.user.id.clone();
                self.store().set_pending_deletion_user_id(&user_id);

                let mut deleted = self
                    .delete_incomplete_user(session, REASON_NAVIGATED_AWAY)
                    .await;
                if !deleted {
                    self.page().sleep(self.timings().deletion_retry_delay).await;
                    if let Some(retry) = self.provider_session().await {
                        deleted = self.delete_incomplete_user(&retry, REASON_RETRY).await;
                    }
                }
                if deleted {
                    self.store().clear_pending_deletion_user_id();
                }
            }
        }

        self.abort_oauth_context();
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;
        self.store().scrub_provider_keys();

        if self.provider_session().await.is_some() {
            tracing::debug!("Provider session survived sign out, retrying");
            attempt_async("Signing out of provider", self.provider().sign_out()).await;
            self.store().scrub_provider_keys();
        }
    }

    /// Whether a click on a link to `href` must be taken over by [`Self::navigation_cleanup`].
    /// Login and signup links are taken over while an OAuth attempt is pending, as is the
    /// brand logo. Decided synchronously so the click can still be cancelled.
    pub fn intercepts_navigation(&self, href: &str, brand_logo: bool) -> bool {
        (brand_logo || navigation::is_login_or_signup_href(href))
            && matches!(self.oauth_state(), OAuthState::Pending(_))
    }

    /// The brand logo leads home. A pending OAuth attempt is abandoned on the way.
    pub async fn brand_logo_cleanup(&self) -> bool {
        if !self.intercepts_navigation("/", true) {
            return false;
        }
        self.clear_oauth_on_navigation().await;
        self.page().sleep(self.timings().navigation_settle_delay).await;
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;

        let now_millis = crate::time_ext::to_epoch_millis(self.now());
        self.page().navigate(&navigation::cache_busted("/", now_millis));
        true
    }

    /// Intercepts an explicit navigation to `href`. Returns `true` when the navigation was
    /// taken over, in which case the caller must not navigate itself.
    pub async fn navigation_cleanup(&self, href: &str) -> bool {
        if !self.intercepts_navigation(href, false) {
            return false;
        }
        self.store().mark_oauth_cleanup();
        self.clear_oauth_on_navigation().await;
        self.page().sleep(self.timings().navigation_settle_delay).await;
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;

        let now_millis = crate::time_ext::to_epoch_millis(self.now());
        self.page()
            .navigate(&navigation::cache_busted(href, now_millis));
        true
    }

    /// Wipes OAuth leftovers on pages outside the OAuth flow. Returns whether anything was
    /// reset.
    pub async fn global_oauth_guard(&self) -> bool {
        if self.pages().is_within_oauth_flow(&self.page().path()) {
            return false;
        }
        self.store().discard_unreadable_oauth_context();
        if !self.oauth_in_flight() {
            return false;
        }

        tracing::debug!("Resetting OAuth attempt left over outside the OAuth flow");
        self.abort_oauth_context();
        self.store().clear_user_meta();
        self.store().clear_signup_drafts();
        self.store().clear_session_markers();
        attempt_async("Signing out of provider", self.provider().sign_out()).await;
        self.delete_server_session().await;
        true
    }

    /// Whether the current page was reached through the provider redirect or the popup.
    pub fn is_oauth_redirect(&self) -> bool {
        navigation::is_oauth_redirect(&self.page().current_url())
    }

    /// A pending attempt the user walked away from explicitly must not be resumed by redirects.
    pub fn should_skip_redirect_for_pending_oauth(&self) -> bool {
        matches!(self.oauth_state(), OAuthState::Pending(_)) && !self.is_oauth_redirect()
    }

    /// Sends users who are already signed in away from the login or signup page. Returns
    /// whether a redirect happened.
    pub async fn check_existing_authentication(&self, kind: AuthPageKind) -> bool {
        if kind == AuthPageKind::Signup {
            if self.store().take_oauth_cleanup_flag() {
                tracing::trace!("OAuth cleanup just happened, staying");
                return false;
            }
            if self.should_skip_redirect_for_pending_oauth() {
                return false;
            }
        }

        let Some(session) = self.provider_session().await else {
            return false;
        };
        let defer = self
            .oauth_state()
            .context()
            .is_some_and(|ctx| ctx.is_pending_signup());

        if session.user.user_meta().is_complete() {
            if defer {
                return false;
            }
            self.page().navigate(&self.pages().dashboard_page);
        } else {
            if defer && !self.is_oauth_redirect() {
                return false;
            }
            self.page().navigate(&self.pages().continuation_page);
        }
        true
    }
}

impl<P, B, G> SessionManager<P, B, G>
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    /// Drives the OAuth callback page: establishes the session and routes the user on.
    pub async fn process_oauth_callback(&self) -> CallbackOutcome {
        match CallbackParams::from_url(&self.page().current_url()) {
            CallbackParams::Error { error, description } => {
                tracing::warn!(%error, ?description, "Provider returned an error");
                return self.fail_callback();
            }
            CallbackParams::Code(code) => {
                attempt_async(
                    "Exchanging authorization code",
                    self.provider().exchange_code(&code),
                )
                .await;
            }
            CallbackParams::None => {}
        }

        let Some(session) = self.provider_session().await else {
            tracing::debug!("No provider session after OAuth callback");
            return self.fail_callback();
        };

        let sync = self.signed_in(&session).await;
        let intent = self
            .oauth_state()
            .context()
            .map_or(OAuthIntent::Login, |ctx| ctx.intent);

        match self
            .backend()
            .oauth_status(&session.access_token, intent)
            .await
        {
            Ok(status) if status.complete => {
                if let Err(err) = self.apply_oauth_event(OAuthEvent::Completed) {
                    tracing::trace!(?err, "No OAuth attempt to complete");
                }
                let message = status.message.unwrap_or_else(|| {
                    format!(
                        "Signed in with {}",
                        popup_bridge::provider_display_name(session.user.primary_provider())
                    )
                });
                self.store().set_oauth_success_message(&message);
                match sync {
                    SyncOutcome::Verified => {
                        self.page().navigate(&self.pages().dashboard_page);
                        CallbackOutcome::Dashboard
                    }
                    SyncOutcome::StayOnPage => CallbackOutcome::StayOnPage,
                }
            }
            Ok(status) => {
                self.hand_off(
                    &session,
                    intent,
                    Some(HandoffHints {
                        user_type: status.user_type,
                        is_new_signup: status.is_new_signup,
                        message: status.message,
                    }),
                );
                self.page().navigate(&self.pages().continuation_page);
                CallbackOutcome::Continuation
            }
            Err(err) => {
                tracing::debug!(?err, "Could not ask for OAuth status, assuming incomplete signup");
                self.hand_off(&session, OAuthIntent::Signup, None);
                self.page().navigate(&self.pages().continuation_page);
                CallbackOutcome::Continuation
            }
        }
    }

    /// Reacts to a `postMessage` from the OAuth popup. Returns whether the message was
    /// accepted.
    pub async fn handle_popup_message(&self, origin: &str, data: &serde_json::Value) -> bool {
        let Some(message) = PopupMessage::parse(&self.page().origin(), origin, data) else {
            return false;
        };
        tracing::trace!(?message, "Received popup message");

        match message {
            PopupMessage::SignupSuccess {
                provider,
                redirect_to,
                access_token,
                refresh_token,
            } => {
                let event = OAuthEvent::ProviderReturned {
                    provider: provider.clone(),
                    email: None,
                    fallback_intent: OAuthIntent::Signup,
                    at: self.now(),
                    hints: None,
                };
                if let Err(err) = self.apply_oauth_event(event) {
                    tracing::error!(?err, "Provider return must be allowed in every state");
                }

                if let (Some(access_token), Some(refresh_token)) = (&access_token, &refresh_token) {
                    match self.provider().set_session(access_token, refresh_token).await {
                        Ok(session) => {
                            self.signed_in(&session).await;
                        }
                        Err(err) => tracing::debug!(?err, "Could not adopt popup session"),
                    }
                }

                self.toast(
                    ToastLevel::Success,
                    format!(
                        "{} connected. Finishing setup...",
                        popup_bridge::provider_display_name(provider.as_deref())
                    ),
                );
                let href = popup_bridge::success_redirect(
                    redirect_to.as_deref(),
                    &self.pages().continuation_page,
                    access_token.as_deref(),
                    refresh_token.as_deref(),
                );
                self.page()
                    .navigate_after(&href, self.timings().popup_redirect_delay);
            }
            PopupMessage::UserExists => {
                self.cleanup_pending_oauth(Some(USER_EXISTS_MESSAGE)).await;
            }
            PopupMessage::SignupError { message } => {
                self.cleanup_pending_oauth(Some(&message)).await;
            }
        }
        true
    }
}
