use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use time::OffsetDateTime;

use crate::backend::Backend;
use crate::error::{SessionError, UnauthorizedSnafu};
use crate::page::Page;
use crate::provider::{AuthProvider, ProviderSession};
use crate::response::RoleData;
use crate::state::SessionManager;
use crate::time_ext::elapsed_since;
use crate::user::UserMeta;

#[derive(Debug, Clone, PartialEq, Eq)]
struct CachedRole {
    role: String,
    cached_at: OffsetDateTime,
}

/// Short lived memory of the last role the server reported.
#[derive(Debug, Default)]
pub(crate) struct RoleCache {
    entry: Mutex<Option<CachedRole>>,
}

impl RoleCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get(&self, ttl: Duration, now: OffsetDateTime) -> Option<String> {
        let entry = self.entry.lock().unwrap_or_else(PoisonError::into_inner);
        entry
            .as_ref()
            .filter(|it| elapsed_since(it.cached_at, now) < ttl)
            .map(|it| it.role.clone())
    }

    pub(crate) fn put(&self, role: String, now: OffsetDateTime) {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = Some(CachedRole {
            role,
            cached_at: now,
        });
    }

    pub(crate) fn clear(&self) {
        *self.entry.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RoleOptions {
    /// Skip the persisted user metadata and ask the server. Answers younger than the role
    /// cache TTL are still reused.
    pub refresh: bool,
}

impl RoleOptions {
    pub fn refreshed() -> Self {
        Self { refresh: true }
    }
}

impl<P: AuthProvider, B: Backend, G: Page> SessionManager<P, B, G> {
    /// The role of the current user.
    ///
    /// `Ok(None)` whenever no role can be determined, including during an OAuth signup. The
    /// only error is `SessionError::Unauthorized`, returned when the server rejected the
    /// session outside of auth pages.
    pub async fn get_user_role(&self, options: RoleOptions) -> Result<Option<String>, SessionError> {
        if self.oauth_in_flight() {
            tracing::trace!("OAuth attempt in flight, no role");
            return Ok(None);
        }

        if !options.refresh {
            if let Some(role) = self
                .store()
                .user_meta()
                .and_then(|meta| meta.role)
                .filter(|it| !it.is_empty())
            {
                return Ok(Some(role));
            }
        }

        if let Some(role) = self
            .inner
            .role_cache
            .get(self.timings().role_cache_ttl, self.now())
        {
            tracing::trace!(role = role.as_str(), "Serving role from cache");
            return Ok(Some(role));
        }

        let session = self.provider_session().await;
        let bearer = session.as_ref().map(|it| it.access_token.as_str());
        match self.backend().fetch_role(bearer).await {
            Ok(Some(data)) if data.role.as_deref().is_some_and(|it| !it.is_empty()) => {
                Ok(self.remember_role(data))
            }
            Ok(_) => {
                tracing::warn!("Role endpoint answered without a role");
                Ok(self.derive_meta(session.as_ref()).and_then(|meta| meta.role))
            }
            Err(err) if err.is_unauthorized() => {
                if self.on_auth_page() || self.oauth_in_flight() {
                    tracing::debug!("Ignoring rejected session on auth page or during OAuth");
                    return Ok(None);
                }
                tracing::debug!("Server rejected the session, forgetting user metadata");
                self.store().clear_user_meta();
                UnauthorizedSnafu {}.fail()
            }
            Err(err) => {
                tracing::debug!(?err, "Role lookup failed, deriving role from provider session");
                Ok(self.derive_meta(session.as_ref()).and_then(|meta| meta.role))
            }
        }
    }

    /// Persists a role reported by the server. In citizen mode the staff role is kept aside.
    pub(crate) fn remember_role(&self, data: RoleData) -> Option<String> {
        let mut meta = self.store().user_meta().unwrap_or_default();
        match meta.is_citizen_mode() {
            true => meta.actual_role = data.role.clone(),
            false => meta.role = data.role.clone(),
        }
        if data.name.as_deref().is_some_and(|it| !it.is_empty()) {
            meta.name = data.name;
        }
        self.store().save_user_meta(&meta);

        let role = data.role?;
        self.inner.role_cache.put(role.clone(), self.now());
        Some(role)
    }

    fn derive_meta(&self, session: Option<&ProviderSession>) -> Option<UserMeta> {
        let meta = session?.user.user_meta();
        if meta.is_empty() {
            return None;
        }
        self.store().save_user_meta(&meta);
        Some(meta)
    }

    /// Re-derives role and name from the provider session and persists them when present.
    pub async fn refresh_meta_from_session(&self) -> Option<UserMeta> {
        let session = self.provider_session().await;
        self.derive_meta(session.as_ref())
    }

    /// Whether the persisted role is one of `allowed`. Sends the user to the login page when it
    /// is not.
    pub fn require_role(&self, allowed: &[&str]) -> bool {
        let allowed = self
            .store()
            .user_meta()
            .and_then(|meta| meta.role)
            .is_some_and(|role| allowed.contains(&role.as_str()));
        if !allowed {
            tracing::debug!("Role not allowed on this page, redirecting to login");
            self.page().navigate(&self.pages().login_page);
        }
        allowed
    }

    /// Forgets the last role reported by the server.
    pub fn invalidate_role_cache(&self) {
        self.inner.role_cache.clear();
    }
}
