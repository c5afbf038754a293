//! Browser-side session coordination for the CitizenLink portal.
//!
//! Users sign in through Supabase, either with a password or through an OAuth provider. The
//! CitizenLink server does not trust provider tokens on every request but keeps its own HttpOnly
//! cookie session. This crate keeps both in sync:
//!
//! - the provider session is pushed to the server as soon as it is obtained or refreshed,
//! - a monitor checks the server periodically and logs the user out once it rejects the session,
//! - OAuth signups that were abandoned halfway (closed tab, back navigation, popup error) are
//!   rolled back, including the half-created remote user,
//! - the role of the user is served from a short-lived cache and role changes made by an
//!   administrator trigger a page reload.
//!
//! ```ignore
//! use leptos::prelude::*;
//! use citizenlink_session::{use_citizenlink_session, use_user_meta};
//! use citizenlink_session::{BrowserPage, HttpBackend, SupabaseAuth};
//! use citizenlink_session::components::{CitizenLinkSessionProvider, ShowForRoles};
//! use citizenlink_session::{ProviderOptions, SessionOptions, Url};
//!
//! #[component]
//! pub fn App() -> impl IntoView {
//!     // Note: These values should be served from environment variables in production.
//!     let options = SessionOptions::new(
//!         Url::parse("https://portal.example.org").unwrap(),
//!         ProviderOptions::new(Url::parse("https://abcdefgh.supabase.co").unwrap(), "anon-key"),
//!     );
//!
//!     view! {
//!         <CitizenLinkSessionProvider options=options>
//!             <Header/>
//!             <ShowForRoles roles=vec!["lgu-admin".to_owned()]>
//!                 <a href="/review-queue">"Review queue"</a>
//!             </ShowForRoles>
//!         </CitizenLinkSessionProvider>
//!     }
//! }
//!
//! #[component]
//! pub fn Header() -> impl IntoView {
//!     let session = use_citizenlink_session::<SupabaseAuth, HttpBackend, BrowserPage>();
//!     let user_meta = use_user_meta();
//!
//!     view! {
//!         <span>{ move || user_meta.get().and_then(|it| it.name).unwrap_or_default() }</span>
//!         <button on:click=move |_| {
//!             let manager = session.manager();
//!             leptos::task::spawn_local(async move { manager.logout().await });
//!         }>"Log out"</button>
//!     }
//! }
//! ```
//!
//! Everything touching the browser, including the example above, is behind the `hydrate`
//! feature. Without it, the coordinator can be driven with custom [`AuthProvider`], [`Backend`]
//! and [`Page`] implementations.

mod backend;
mod best_effort;
mod code_verifier;
pub mod components;
mod config;
mod context_store;
mod error;
mod hooks;
mod internal;
pub mod navigation;
mod oauth_context;
mod page;
mod popup_bridge;
mod provider;
mod request;
mod response;
mod state;
mod storage;
mod supabase;
mod time_ext;
mod user;

// Library exports (additional to pub modules).
pub use backend::*;
pub use config::*;
pub use context_store::ContextStore;
pub use error::SessionError;
pub use hooks::*;
pub use internal::oauth_flow_controller::{AuthPageKind, CallbackOutcome, ContinuationDecision};
pub use internal::role_cache::RoleOptions;
pub use internal::role_change_watcher::ROLE_CHANGED_EVENT;
pub use internal::session_synchronizer::SyncOutcome;
pub use internal::token_expiry_monitor::MonitorStep;
pub use oauth_context::*;
pub use page::*;
pub use popup_bridge::PopupMessage;
pub use provider::*;
pub use request::RequestError;
pub use response::{CaptchaVerification, OAuthStatusResponse, ProviderErrorResponse, RoleData};
pub use state::*;
pub use storage::{KeyValueStore, MemoryStore, StorageArea, StorageError};
#[cfg(feature = "hydrate")]
pub use storage::BrowserStore;
pub use supabase::SupabaseAuth;
pub use user::*;

pub use url::Url;
