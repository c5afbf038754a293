use codee::string::JsonSerdeCodec;
use leptos::context::{provide_context, use_context};
use leptos::prelude::{GetValue, LocalStorage, Signal, StoredValue};

use crate::backend::Backend;
use crate::context_store::USER_META_KEY;
use crate::page::Page;
use crate::provider::AuthProvider;
use crate::state::SessionManager;
use crate::storage::{StorageArea, use_persisted};
use crate::user::UserMeta;

/// Reactive handle onto the session coordinator of this page.
pub struct CitizenLinkSession<P: 'static, B: 'static, G: 'static> {
    manager: StoredValue<SessionManager<P, B, G>, LocalStorage>,

    /// The persisted user metadata, following writes of this and other tabs.
    pub user_meta: Signal<Option<UserMeta>>,
}

impl<P: 'static, B: 'static, G: 'static> Clone for CitizenLinkSession<P, B, G> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: 'static, B: 'static, G: 'static> Copy for CitizenLinkSession<P, B, G> {}

impl<P: 'static, B: 'static, G: 'static> CitizenLinkSession<P, B, G> {
    pub fn manager(&self) -> SessionManager<P, B, G> {
        self.manager.get_value()
    }
}

/// Starts the session coordinator for the current page and provides it as context.
///
/// Runs the page load sequence in the background and, in the browser, wires the coordinator to
/// focus, visibility, unload and `postMessage` events of the window.
pub fn init_citizenlink_session<P, B, G>(
    manager: SessionManager<P, B, G>,
) -> CitizenLinkSession<P, B, G>
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    tracing::trace!("Initializing CitizenLink session...");

    let session = CitizenLinkSession {
        manager: StoredValue::new_local(manager.clone()),
        user_meta: use_user_meta(),
    };
    provide_context(session);

    #[cfg(feature = "hydrate")]
    listen_to_page_events(manager.clone());

    let this = manager.clone();
    manager.page().spawn(async move { this.on_page_load().await });

    session
}

/// The coordinator provided by [`init_citizenlink_session`], if any.
pub fn try_use_citizenlink_session<P, B, G>() -> Option<CitizenLinkSession<P, B, G>>
where
    P: 'static,
    B: 'static,
    G: 'static,
{
    use_context::<CitizenLinkSession<P, B, G>>()
}

/// The coordinator provided by [`init_citizenlink_session`].
///
/// # Panics
///
/// When called outside a component tree set up with [`init_citizenlink_session`].
pub fn use_citizenlink_session<P, B, G>() -> CitizenLinkSession<P, B, G>
where
    P: 'static,
    B: 'static,
    G: 'static,
{
    try_use_citizenlink_session().unwrap_or_else(|| {
        panic!("No CitizenLinkSession in context. Call `init_citizenlink_session` first.")
    })
}

/// The persisted user metadata as a signal. Does not need the coordinator in context.
pub fn use_user_meta() -> Signal<Option<UserMeta>> {
    use_persisted::<Option<UserMeta>, JsonSerdeCodec>(StorageArea::Local, USER_META_KEY, None)
        .read
}

#[cfg(feature = "hydrate")]
fn listen_to_page_events<P, B, G>(manager: SessionManager<P, B, G>)
where
    P: AuthProvider + 'static,
    B: Backend + 'static,
    G: Page + 'static,
{
    use leptos::ev;
    use leptos_use::{use_document, use_event_listener, use_window};

    let this = manager.clone();
    let _ = use_event_listener(use_window(), ev::focus, move |_| {
        let this = this.clone();
        this.page().spawn(async move {
            this.on_page_visible().await;
        });
    });

    let this = manager.clone();
    let _ = use_event_listener(use_document(), ev::visibilitychange, move |_| {
        let hidden = web_sys::window()
            .and_then(|window| window.document())
            .is_some_and(|document| document.hidden());
        if hidden {
            this.record_page_hidden();
            return;
        }
        let this = this.clone();
        this.page().spawn(async move {
            this.on_page_visible().await;
        });
    });

    let this = manager.clone();
    let _ = use_event_listener(use_window(), ev::beforeunload, move |_| {
        let this = this.clone();
        this.page().spawn(async move {
            this.on_page_abandon().await;
        });
    });

    let this = manager.clone();
    let _ = use_event_listener(use_window(), ev::pagehide, move |_| {
        let this = this.clone();
        this.page().spawn(async move {
            this.on_page_abandon().await;
        });
    });

    let this = manager.clone();
    let _ = use_event_listener(use_document(), ev::click, move |event| {
        use wasm_bindgen::JsCast;

        let Some(target) = event
            .target()
            .and_then(|target| target.dyn_into::<web_sys::Element>().ok())
        else {
            return;
        };
        let Some(href) = target
            .closest("a[href]")
            .ok()
            .flatten()
            .and_then(|anchor| anchor.get_attribute("href"))
        else {
            return;
        };
        let brand_logo = target.closest(".brand-logo").ok().flatten().is_some();
        if !this.intercepts_navigation(&href, brand_logo) {
            return;
        }

        event.prevent_default();
        event.stop_propagation();
        let this = this.clone();
        this.page().spawn(async move {
            match brand_logo {
                true => this.brand_logo_cleanup().await,
                false => this.navigation_cleanup(&href).await,
            };
        });
    });

    let _ = use_event_listener(use_window(), ev::message, move |event| {
        let origin = event.origin();
        let Some(data) = js_sys::JSON::stringify(&event.data())
            .ok()
            .map(String::from)
            .and_then(|json| serde_json::from_str::<serde_json::Value>(&json).ok())
        else {
            tracing::trace!("Ignoring message without JSON payload");
            return;
        };
        let this = manager.clone();
        manager.page().spawn(async move {
            this.handle_popup_message(&origin, &data).await;
        });
    });
}
