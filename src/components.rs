use leptos::prelude::*;

use crate::hooks::use_user_meta;

/// Show `children` only while the persisted role of the user is one of `roles`.
///
/// Reads the role written by the coordinator, so this renders without a server round trip. The
/// server still decides what the user may actually do.
///
/// # Example
/// ```no_run
/// use leptos::prelude::*;
/// use citizenlink_session::components::ShowForRoles;
///
/// # #[component]
/// # fn Component() -> impl IntoView {
/// view! {
///     <ShowForRoles roles=vec!["lgu-admin".to_owned(), "super-admin".to_owned()]>
///         <a href="/review-queue">"Review queue"</a>
///     </ShowForRoles>
/// }
/// # }
/// ```
#[component(transparent)]
#[allow(clippy::must_use_candidate)]
pub fn ShowForRoles(
    /// Roles allowed to see the content.
    roles: Vec<String>,

    /// Rendered for everyone else.
    #[prop(into, optional)]
    fallback: ViewFn,

    children: ChildrenFn,
) -> impl IntoView {
    let user_meta = use_user_meta();
    let allowed = Memo::new(move |_| {
        user_meta
            .read()
            .as_ref()
            .and_then(|meta| meta.role.as_ref())
            .is_some_and(|role| roles.contains(role))
    });

    move || {
        if allowed.get() {
            children()
        } else {
            fallback.run()
        }
    }
}

/// Starts the browser session coordinator and renders `children` below it.
///
/// Wraps [`init_citizenlink_session`](crate::init_citizenlink_session) for the common case of the
/// Supabase provider, the CitizenLink API and browser storage.
///
/// # Example
/// ```ignore
/// use leptos::prelude::*;
/// use citizenlink_session::{ProviderOptions, SessionOptions, Url};
/// use citizenlink_session::components::CitizenLinkSessionProvider;
///
/// # #[component]
/// # fn Example() -> impl IntoView {
/// let options = SessionOptions::new(
///     Url::parse("https://portal.example.org").expect("valid api url"),
///     ProviderOptions::new(
///         Url::parse("https://abcdefgh.supabase.co").expect("valid project url"),
///         "public-anon-key",
///     ),
/// );
/// view! {
///     <CitizenLinkSessionProvider options=options>
///         <p>"Further app content..."</p>
///     </CitizenLinkSessionProvider>
/// }
/// # }
/// ```
#[cfg(feature = "hydrate")]
#[component]
#[allow(clippy::must_use_candidate)]
pub fn CitizenLinkSessionProvider(
    options: crate::config::SessionOptions,
    children: Children,
) -> impl IntoView {
    let _session =
        crate::hooks::init_citizenlink_session(crate::state::BrowserSessionManager::browser(options));

    view! {
        { children() }
    }
}
