use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use citizenlink_session::{
    AuthProvider, Backend, CaptchaVerification, ContextStore, KeyValueStore, MemoryStore,
    OAuthIntent, OAuthStatusResponse, Page, ProviderError, ProviderSession, ProviderUser,
    RequestError, RoleData, SessionManager, SessionOptions, ProviderOptions, Toast, Url,
};
use http::StatusCode;
use serde_json::{Map, Value, json};
use time::OffsetDateTime;

pub type TestManager = SessionManager<FakeProvider, FakeBackend, RecordingPage>;

/// Scripted answer of a fake collaborator.
#[derive(Debug, Clone)]
pub enum Reply<T> {
    Ok(T),
    Status(StatusCode),

    /// The request never reached the server.
    Offline,
}

impl<T> Reply<T> {
    fn into_result(self) -> Result<T, RequestError> {
        match self {
            Reply::Ok(value) => Ok(value),
            Reply::Status(status) => Err(RequestError::Status { status }),
            Reply::Offline => Err(RequestError::Url {
                path: "offline".to_owned(),
                source: url::ParseError::EmptyHost,
            }),
        }
    }
}

pub fn role(role: &str) -> Reply<Option<RoleData>> {
    Reply::Ok(Some(RoleData {
        role: Some(role.to_owned()),
        name: Some("Juan Dela Cruz".to_owned()),
    }))
}

/// A provider session of user `user_id`, expiring `expires_in` from now.
pub fn session(user_id: &str, expires_in: time::Duration, metadata: Value) -> ProviderSession {
    let user_metadata = match metadata {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    ProviderSession {
        access_token: format!("access-{user_id}"),
        refresh_token: format!("refresh-{user_id}"),
        expires_at: Some((OffsetDateTime::now_utc() + expires_in).unix_timestamp()),
        token_type: Some("bearer".to_owned()),
        user: ProviderUser {
            id: user_id.to_owned(),
            email: Some(format!("{user_id}@example.org")),
            user_metadata,
            raw_user_meta_data: Map::new(),
            identities: vec![],
        },
    }
}

pub fn valid_session(user_id: &str) -> ProviderSession {
    session(user_id, time::Duration::hours(1), json!({}))
}

#[derive(Debug, Default)]
pub struct FakeProvider {
    session: Mutex<Option<ProviderSession>>,
    refreshed: Mutex<Option<ProviderSession>>,
    code_session: Mutex<Option<ProviderSession>>,
    fail_authorize: AtomicBool,
    keep_session_on_sign_out: AtomicBool,
    sign_outs: AtomicUsize,
    refreshes: AtomicUsize,
    exchanged_codes: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn set_session(&self, session: Option<ProviderSession>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn current_session(&self) -> Option<ProviderSession> {
        self.session.lock().unwrap().clone()
    }

    /// Session handed out by the next refresh. Without one, refreshing ends the session.
    pub fn set_refreshed(&self, session: ProviderSession) {
        *self.refreshed.lock().unwrap() = Some(session);
    }

    /// Session obtained by exchanging any authorization code.
    pub fn set_code_session(&self, session: ProviderSession) {
        *self.code_session.lock().unwrap() = Some(session);
    }

    pub fn fail_authorize(&self) {
        self.fail_authorize.store(true, Ordering::SeqCst);
    }

    pub fn keep_session_on_sign_out(&self) {
        self.keep_session_on_sign_out.store(true, Ordering::SeqCst);
    }

    pub fn sign_outs(&self) -> usize {
        self.sign_outs.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn exchanged_codes(&self) -> Vec<String> {
        self.exchanged_codes.lock().unwrap().clone()
    }
}

impl AuthProvider for FakeProvider {
    async fn session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        Ok(self.current_session())
    }

    async fn refresh_session(&self) -> Result<Option<ProviderSession>, ProviderError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let next = self.refreshed.lock().unwrap().take();
        *self.session.lock().unwrap() = next.clone();
        Ok(next)
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        if !self.keep_session_on_sign_out.load(Ordering::SeqCst) {
            *self.session.lock().unwrap() = None;
        }
        Ok(())
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: &str,
    ) -> Result<ProviderSession, ProviderError> {
        let mut session = valid_session("popup-user");
        session.access_token = access_token.to_owned();
        session.refresh_token = refresh_token.to_owned();
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }

    fn authorize_url(&self, provider: &str, redirect_to: &Url) -> Result<Url, ProviderError> {
        if self.fail_authorize.load(Ordering::SeqCst) {
            return Err(ProviderError::MissingCodeVerifier);
        }
        let mut url = Url::parse("https://abcdefgh.supabase.co/auth/v1/authorize").unwrap();
        url.query_pairs_mut()
            .append_pair("provider", provider)
            .append_pair("redirect_to", redirect_to.as_str());
        Ok(url)
    }

    async fn exchange_code(&self, code: &str) -> Result<ProviderSession, ProviderError> {
        self.exchanged_codes.lock().unwrap().push(code.to_owned());
        let session = self
            .code_session
            .lock()
            .unwrap()
            .clone()
            .ok_or(ProviderError::MissingCodeVerifier)?;
        *self.session.lock().unwrap() = Some(session.clone());
        Ok(session)
    }
}

#[derive(Debug)]
pub struct FakeBackend {
    role_replies: Mutex<VecDeque<Reply<Option<RoleData>>>>,
    default_role: Mutex<Reply<Option<RoleData>>>,
    role_fetches: Mutex<Vec<Option<String>>>,
    created_sessions: Mutex<Vec<String>>,
    create_session_reply: Mutex<Reply<()>>,
    deleted_sessions: AtomicUsize,
    oauth_status: Mutex<Reply<OAuthStatusResponse>>,
    oauth_status_intents: Mutex<Vec<OAuthIntent>>,
    delete_user_replies: Mutex<VecDeque<Reply<()>>>,
    deleted_users: Mutex<Vec<(String, String)>>,
    captcha: Mutex<Reply<CaptchaVerification>>,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self {
            role_replies: Mutex::new(VecDeque::new()),
            default_role: Mutex::new(role("citizen")),
            role_fetches: Mutex::new(Vec::new()),
            created_sessions: Mutex::new(Vec::new()),
            create_session_reply: Mutex::new(Reply::Ok(())),
            deleted_sessions: AtomicUsize::new(0),
            oauth_status: Mutex::new(Reply::Ok(OAuthStatusResponse::default())),
            oauth_status_intents: Mutex::new(Vec::new()),
            delete_user_replies: Mutex::new(VecDeque::new()),
            deleted_users: Mutex::new(Vec::new()),
            captcha: Mutex::new(Reply::Ok(CaptchaVerification {
                success: true,
                message: None,
                error: None,
            })),
        }
    }
}

impl FakeBackend {
    /// Answer of every role request not scripted with `push_role`.
    pub fn set_role(&self, reply: Reply<Option<RoleData>>) {
        *self.default_role.lock().unwrap() = reply;
    }

    /// Answer of the next role request only.
    pub fn push_role(&self, reply: Reply<Option<RoleData>>) {
        self.role_replies.lock().unwrap().push_back(reply);
    }

    /// Bearer tokens of all role requests so far. `None` for cookie-only checks.
    pub fn role_fetches(&self) -> Vec<Option<String>> {
        self.role_fetches.lock().unwrap().clone()
    }

    pub fn set_create_session(&self, reply: Reply<()>) {
        *self.create_session_reply.lock().unwrap() = reply;
    }

    pub fn created_sessions(&self) -> Vec<String> {
        self.created_sessions.lock().unwrap().clone()
    }

    pub fn deleted_sessions(&self) -> usize {
        self.deleted_sessions.load(Ordering::SeqCst)
    }

    pub fn set_oauth_status(&self, reply: Reply<OAuthStatusResponse>) {
        *self.oauth_status.lock().unwrap() = reply;
    }

    pub fn oauth_status_intents(&self) -> Vec<OAuthIntent> {
        self.oauth_status_intents.lock().unwrap().clone()
    }

    pub fn push_delete_user(&self, reply: Reply<()>) {
        self.delete_user_replies.lock().unwrap().push_back(reply);
    }

    /// `(user id, reason)` of every deletion request.
    pub fn deleted_users(&self) -> Vec<(String, String)> {
        self.deleted_users.lock().unwrap().clone()
    }

    pub fn set_captcha(&self, reply: Reply<CaptchaVerification>) {
        *self.captcha.lock().unwrap() = reply;
    }
}

impl Backend for FakeBackend {
    async fn fetch_role(&self, bearer: Option<&str>) -> Result<Option<RoleData>, RequestError> {
        self.role_fetches
            .lock()
            .unwrap()
            .push(bearer.map(str::to_owned));
        let scripted = self.role_replies.lock().unwrap().pop_front();
        scripted
            .unwrap_or_else(|| self.default_role.lock().unwrap().clone())
            .into_result()
    }

    async fn create_session(&self, access_token: &str) -> Result<(), RequestError> {
        self.created_sessions
            .lock()
            .unwrap()
            .push(access_token.to_owned());
        self.create_session_reply.lock().unwrap().clone().into_result()
    }

    async fn delete_session(&self) -> Result<(), RequestError> {
        self.deleted_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn oauth_status(
        &self,
        _bearer: &str,
        intent: OAuthIntent,
    ) -> Result<OAuthStatusResponse, RequestError> {
        self.oauth_status_intents.lock().unwrap().push(intent);
        self.oauth_status.lock().unwrap().clone().into_result()
    }

    async fn delete_incomplete_user(
        &self,
        _bearer: &str,
        user_id: &str,
        reason: &str,
    ) -> Result<(), RequestError> {
        self.deleted_users
            .lock()
            .unwrap()
            .push((user_id.to_owned(), reason.to_owned()));
        let scripted = self.delete_user_replies.lock().unwrap().pop_front();
        scripted.unwrap_or(Reply::Ok(())).into_result()
    }

    async fn captcha_site_key(&self) -> Result<Option<String>, RequestError> {
        Ok(Some("site-key".to_owned()))
    }

    async fn verify_captcha(&self, _token: &str) -> Result<CaptchaVerification, RequestError> {
        self.captcha.lock().unwrap().clone().into_result()
    }
}

type Task = Pin<Box<dyn Future<Output = ()>>>;

/// Page recording everything the coordinator asks of it. Sleeps return immediately, spawned
/// tasks are kept until the test runs them.
#[derive(Default)]
pub struct RecordingPage {
    url: Mutex<Option<Url>>,
    navigations: Mutex<Vec<String>>,
    delayed_navigations: Mutex<Vec<(String, Duration)>>,
    reloads: Mutex<Vec<Duration>>,
    toasts: Mutex<Vec<Toast>>,
    events: Mutex<Vec<(String, Value)>>,
    credential_clears: AtomicUsize,
    sleeps: Mutex<Vec<Duration>>,
    spawned: Mutex<VecDeque<Task>>,
}

impl RecordingPage {
    pub fn set_url(&self, url: &str) {
        *self.url.lock().unwrap() = Some(Url::parse(url).unwrap());
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn delayed_navigations(&self) -> Vec<(String, Duration)> {
        self.delayed_navigations.lock().unwrap().clone()
    }

    pub fn reloads(&self) -> Vec<Duration> {
        self.reloads.lock().unwrap().clone()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.toasts.lock().unwrap().clone()
    }

    pub fn toast_messages(&self) -> Vec<String> {
        self.toasts().into_iter().map(|it| it.message).collect()
    }

    pub fn events(&self) -> Vec<(String, Value)> {
        self.events.lock().unwrap().clone()
    }

    pub fn credential_clears(&self) -> usize {
        self.credential_clears.load(Ordering::SeqCst)
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    pub fn spawned(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    /// Runs the oldest spawned task to completion. Returns whether there was one.
    pub async fn run_next_spawned(&self) -> bool {
        let task = self.spawned.lock().unwrap().pop_front();
        match task {
            Some(task) => {
                task.await;
                true
            }
            None => false,
        }
    }
}

impl Page for RecordingPage {
    fn current_url(&self) -> Url {
        self.url
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| Url::parse("https://portal.example.org/dashboard").unwrap())
    }

    fn navigate(&self, href: &str) {
        self.navigations.lock().unwrap().push(href.to_owned());
    }

    fn navigate_after(&self, href: &str, delay: Duration) {
        self.delayed_navigations
            .lock()
            .unwrap()
            .push((href.to_owned(), delay));
    }

    fn reload_after(&self, delay: Duration) {
        self.reloads.lock().unwrap().push(delay);
    }

    fn show_toast(&self, toast: Toast) {
        self.toasts.lock().unwrap().push(toast);
    }

    fn dispatch_event(&self, name: &str, detail: Value) {
        self.events.lock().unwrap().push((name.to_owned(), detail));
    }

    fn clear_credential_fields(&self) {
        self.credential_clears.fetch_add(1, Ordering::SeqCst);
    }

    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }

    fn spawn(&self, task: impl Future<Output = ()> + 'static) {
        self.spawned.lock().unwrap().push_back(Box::pin(task));
    }
}

/// A manager wired to fakes, plus raw access to its storage.
pub struct Harness {
    pub manager: TestManager,
    pub local: Arc<MemoryStore>,
    pub session: Arc<MemoryStore>,
}

impl Harness {
    /// A manager on `url`, E.g. "https://portal.example.org/dashboard".
    pub fn on(url: &str) -> Self {
        super::tracing::init_subscriber();

        let local = Arc::new(MemoryStore::new());
        let session = Arc::new(MemoryStore::new());
        let store = ContextStore::new(local.clone(), session.clone());
        let options = SessionOptions::new(
            Url::parse("https://portal.example.org/").unwrap(),
            ProviderOptions::new(
                Url::parse("https://abcdefgh.supabase.co").unwrap(),
                "anon-key",
            ),
        );
        let page = RecordingPage::default();
        page.set_url(url);
        let manager = SessionManager::new(
            options,
            FakeProvider::default(),
            FakeBackend::default(),
            page,
            store,
        );
        Self {
            manager,
            local,
            session,
        }
    }

    pub fn provider(&self) -> &FakeProvider {
        self.manager.provider()
    }

    pub fn backend(&self) -> &FakeBackend {
        self.manager.backend()
    }

    pub fn page(&self) -> &RecordingPage {
        self.manager.page()
    }

    pub fn store(&self) -> &ContextStore {
        self.manager.store()
    }

    /// Writes an OAuth context the way a previous page load would have left it.
    pub fn store_oauth_context(&self, intent: &str, status: &str, age: Duration) {
        let started_at = OffsetDateTime::now_utc() - age;
        let millis = (started_at.unix_timestamp_nanos() / 1_000_000) as i64;
        let raw = json!({
            "provider": "google",
            "intent": intent,
            "status": status,
            "startedAt": millis,
        });
        self.local
            .set_item("cl_oauth_context", &raw.to_string())
            .unwrap();
    }
}
