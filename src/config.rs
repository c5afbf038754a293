use std::time::Duration;
use url::Url;

/// Everything required to run a `SessionManager`.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Base url of the CitizenLink REST API, E.g. "https://portal.example.org/".
    /// All `/api/...` and `/auth/session` paths are resolved against it.
    pub api_base_url: Url,

    pub provider: ProviderOptions,

    pub advanced: Timings,

    pub pages: PageRules,
}

impl SessionOptions {
    pub fn new(api_base_url: Url, provider: ProviderOptions) -> Self {
        Self {
            api_base_url,
            provider,
            advanced: Timings::default(),
            pages: PageRules::default(),
        }
    }
}

/// Connection data of the Supabase project handling authentication.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Project url, E.g. "https://abcdefgh.supabase.co".
    pub url: Url,

    /// The public anon key, sent as `apikey` header.
    pub anon_key: String,

    /// Local storage key under which the provider session is persisted.
    /// Defaults to `sb-<project-ref>-auth-token`, mirroring the JavaScript client.
    pub storage_key: Option<String>,
}

impl ProviderOptions {
    pub fn new(url: Url, anon_key: impl Into<String>) -> Self {
        Self {
            url,
            anon_key: anon_key.into(),
            storage_key: None,
        }
    }

    pub(crate) fn resolved_storage_key(&self) -> String {
        if let Some(key) = &self.storage_key {
            return key.clone();
        }
        let project_ref = self
            .url
            .host_str()
            .and_then(|host| host.split('.').next())
            .unwrap_or("local");
        format!("sb-{project_ref}-auth-token")
    }
}

/// Every delay and threshold used by the coordinator.
#[derive(Debug, Clone)]
pub struct Timings {
    /// How long a role fetched from the API is served from memory.
    /// Defaults to `Duration::from_secs(5)`.
    pub role_cache_ttl: Duration,

    /// Interval between two checks of the token expiry monitor while everything is fine.
    /// Defaults to `Duration::from_secs(5 * 60)`.
    pub monitor_interval: Duration,

    /// Delay before re-probing after a non-401 server error.
    /// Defaults to `Duration::from_secs(30)`.
    pub monitor_retry_backoff: Duration,

    /// Consecutive non-401 server errors after which the session is considered expired.
    /// Defaults to `3`.
    pub monitor_max_retries: u32,

    /// Age after which a pending OAuth signup is considered abandoned on the signup page.
    /// Defaults to `Duration::from_secs(3)`.
    pub signup_stale_after: Duration,

    /// Age after which a pending OAuth context is considered abandoned on the continuation page.
    /// Defaults to `Duration::from_secs(5 * 60)`.
    pub continuation_stale_after: Duration,

    /// How long auth-error notifications are suppressed around an OAuth start.
    /// Defaults to `Duration::from_secs(8)`.
    pub auth_error_suppression: Duration,

    /// Wait between a failed cookie verification and its single retry.
    /// Defaults to `Duration::from_millis(500)`.
    pub verify_backoff: Duration,

    /// Wait before retrying a failed deletion of an incomplete user.
    /// Defaults to `Duration::from_millis(150)`.
    pub deletion_retry_delay: Duration,

    /// Delay between the "session expired" toast and the redirect to the login page.
    /// Defaults to `Duration::from_secs(3)`.
    pub expired_redirect_delay: Duration,

    /// Delay between the "role changed" toast and the page reload.
    /// Defaults to `Duration::from_secs(2)`.
    pub role_change_reload_delay: Duration,

    /// Delay between a successful popup signup and the redirect to the continuation page.
    /// Defaults to `Duration::from_millis(800)`.
    pub popup_redirect_delay: Duration,

    /// Wait after an OAuth cleanup before navigating away.
    /// Defaults to `Duration::from_millis(500)`.
    pub navigation_settle_delay: Duration,

    /// How long before its expiry a session is refreshed on trusted devices.
    /// Defaults to `Duration::from_secs(60)`.
    pub refresh_ahead: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            role_cache_ttl: Duration::from_secs(5),
            monitor_interval: Duration::from_secs(5 * 60),
            monitor_retry_backoff: Duration::from_secs(30),
            monitor_max_retries: 3,
            signup_stale_after: Duration::from_secs(3),
            continuation_stale_after: Duration::from_secs(5 * 60),
            auth_error_suppression: Duration::from_secs(8),
            verify_backoff: Duration::from_millis(500),
            deletion_retry_delay: Duration::from_millis(150),
            expired_redirect_delay: Duration::from_secs(3),
            role_change_reload_delay: Duration::from_secs(2),
            popup_redirect_delay: Duration::from_millis(800),
            navigation_settle_delay: Duration::from_millis(500),
            refresh_ahead: Duration::from_secs(60),
        }
    }
}

/// Path based page classification.
#[derive(Debug, Clone)]
pub struct PageRules {
    /// Pages on which missing or rejected sessions are expected and never acted upon.
    pub auth_pages: Vec<String>,

    /// Pages taking part in an OAuth flow. A pending OAuth context is only legitimate here.
    pub oauth_flow_pages: Vec<String>,

    /// Pages on which the token expiry monitor never runs.
    pub monitor_exempt_pages: Vec<String>,

    pub login_page: String,
    pub signup_page: String,
    pub continuation_page: String,
    pub dashboard_page: String,

    /// Where the provider redirects to after an OAuth sign in.
    pub callback_page: String,
}

impl Default for PageRules {
    fn default() -> Self {
        fn owned(paths: &[&str]) -> Vec<String> {
            paths.iter().map(|it| (*it).to_owned()).collect()
        }
        Self {
            auth_pages: owned(&[
                "/login",
                "/signup",
                "/signup-with-code",
                "/resetpassword",
                "/reset-password",
                "/success",
                "/oauth-continuation",
                "/oauthcontinuation",
                "/complete-position-signup",
            ]),
            oauth_flow_pages: owned(&[
                "/oauth-continuation",
                "/oauthcontinuation",
                "/complete-position-signup",
                "/oauth-callback",
                "/oauthcallback",
            ]),
            monitor_exempt_pages: owned(&["/review-queue"]),
            login_page: "/login".to_owned(),
            signup_page: "/signup".to_owned(),
            continuation_page: "/oauth-continuation".to_owned(),
            dashboard_page: "/dashboard".to_owned(),
            callback_page: "/oauth-callback".to_owned(),
        }
    }
}

impl PageRules {
    pub fn is_auth_page(&self, path: &str) -> bool {
        matches_any(&self.auth_pages, path)
    }

    pub fn is_oauth_flow_page(&self, path: &str) -> bool {
        matches_any(&self.oauth_flow_pages, path)
    }

    /// Like `is_oauth_flow_page`, but also accepting routes nested below those pages.
    pub fn is_within_oauth_flow(&self, path: &str) -> bool {
        crate::navigation::is_within(&self.oauth_flow_pages, &normalize(path))
    }

    pub fn is_monitor_exempt(&self, path: &str) -> bool {
        matches_any(&self.monitor_exempt_pages, path)
    }

    pub fn is_continuation_page(&self, path: &str) -> bool {
        let path = normalize(path);
        path == normalize(&self.continuation_page) || path == "/oauthcontinuation"
    }

    pub fn is_signup_page(&self, path: &str) -> bool {
        normalize(path) == normalize(&self.signup_page)
    }

    pub fn is_login_page(&self, path: &str) -> bool {
        normalize(path) == normalize(&self.login_page)
    }
}

/// Lowercases and drops a trailing slash, so that "/Login/" and "/login" are the same page.
fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    match trimmed.is_empty() {
        true => "/".to_owned(),
        false => trimmed.to_ascii_lowercase(),
    }
}

fn matches_any(pages: &[String], path: &str) -> bool {
    let path = normalize(path);
    pages.iter().any(|page| normalize(page) == path)
}
