use std::future::Future;
use std::time::Duration;

use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToastLevel {
    Success,
    Info,
    Error,
}

impl ToastLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToastLevel::Success => "success",
            ToastLevel::Info => "info",
            ToastLevel::Error => "error",
        }
    }
}

/// A user-facing notification. Rendering is up to the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub level: ToastLevel,
    pub message: String,

    /// `None` leaves the display time to the toast UI.
    pub duration: Option<Duration>,
}

impl Toast {
    pub fn new(level: ToastLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            duration: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// Everything the coordinator needs from the page it runs in.
#[allow(async_fn_in_trait)]
pub trait Page {
    fn current_url(&self) -> Url;

    fn path(&self) -> String {
        self.current_url().path().to_owned()
    }

    fn origin(&self) -> String {
        self.current_url().origin().ascii_serialization()
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.current_url()
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }

    /// Full page navigation.
    fn navigate(&self, href: &str);

    fn navigate_after(&self, href: &str, delay: Duration);

    fn reload_after(&self, delay: Duration);

    fn show_toast(&self, toast: Toast);

    /// Broadcasts a DOM `CustomEvent` with `detail` on the document.
    fn dispatch_event(&self, name: &str, detail: serde_json::Value);

    /// Empties password and email inputs, so that autofill does not resubmit stale credentials.
    fn clear_credential_fields(&self);

    async fn sleep(&self, duration: Duration);

    fn spawn(&self, task: impl Future<Output = ()> + 'static);
}

#[cfg(feature = "hydrate")]
pub use browser::BrowserPage;

#[cfg(feature = "hydrate")]
mod browser {
    use std::future::Future;
    use std::time::Duration;

    use gloo_timers::callback::Timeout;
    use url::Url;
    use wasm_bindgen::{JsCast, JsValue};

    use super::{Page, Toast};

    /// Event on which the host application renders toasts.
    pub const TOAST_EVENT: &str = "citizenlink:toast";

    const CREDENTIAL_INPUTS: &str =
        "input[type=\"password\"], input[type=\"email\"], input[name=\"email\"]";

    fn millis(duration: Duration) -> u32 {
        u32::try_from(duration.as_millis()).unwrap_or(u32::MAX)
    }

    /// `Page` driving the real browser window.
    #[derive(Debug, Clone)]
    pub struct BrowserPage {
        /// Reported as the current URL while no window location can be read.
        fallback_url: Url,
    }

    impl BrowserPage {
        pub fn new(fallback_url: Url) -> Self {
            Self { fallback_url }
        }

        fn location() -> Option<web_sys::Location> {
            web_sys::window().map(|window| window.location())
        }

        fn navigate_to(href: &str) {
            tracing::trace!(href, "Navigating");
            if let Some(location) = Self::location() {
                if let Err(err) = location.set_href(href) {
                    tracing::error!(?err, href, "Could not navigate");
                }
            }
        }
    }

    impl Page for BrowserPage {
        fn current_url(&self) -> Url {
            Self::location()
                .and_then(|location| location.href().ok())
                .and_then(|href| Url::parse(&href).ok())
                .unwrap_or_else(|| self.fallback_url.clone())
        }

        fn navigate(&self, href: &str) {
            Self::navigate_to(href);
        }

        fn navigate_after(&self, href: &str, delay: Duration) {
            let href = href.to_owned();
            Timeout::new(millis(delay), move || Self::navigate_to(&href)).forget();
        }

        fn reload_after(&self, delay: Duration) {
            Timeout::new(millis(delay), move || {
                if let Some(location) = Self::location() {
                    let _ = location.reload();
                }
            })
            .forget();
        }

        fn show_toast(&self, toast: Toast) {
            self.dispatch_event(
                TOAST_EVENT,
                serde_json::json!({
                    "type": toast.level.as_str(),
                    "message": toast.message,
                    "duration": toast.duration.map(|it| it.as_millis() as u64),
                }),
            );
        }

        fn dispatch_event(&self, name: &str, detail: serde_json::Value) {
            let Some(document) = web_sys::window().and_then(|window| window.document()) else {
                return;
            };
            let detail = js_sys::JSON::parse(&detail.to_string()).unwrap_or(JsValue::NULL);
            let init = web_sys::CustomEventInit::new();
            init.set_detail(&detail);
            match web_sys::CustomEvent::new_with_event_init_dict(name, &init) {
                Ok(event) => {
                    let _ = document.dispatch_event(&event);
                }
                Err(err) => tracing::error!(?err, name, "Could not create event"),
            }
        }

        fn clear_credential_fields(&self) {
            let Some(document) = web_sys::window().and_then(|window| window.document()) else {
                return;
            };
            let Ok(inputs) = document.query_selector_all(CREDENTIAL_INPUTS) else {
                return;
            };
            for index in 0..inputs.length() {
                if let Some(input) = inputs
                    .item(index)
                    .and_then(|node| node.dyn_into::<web_sys::HtmlInputElement>().ok())
                {
                    input.set_value("");
                }
            }
        }

        async fn sleep(&self, duration: Duration) {
            gloo_timers::future::sleep(duration).await;
        }

        fn spawn(&self, task: impl Future<Output = ()> + 'static) {
            leptos::task::spawn_local(task);
        }
    }
}
