use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use codee::string::JsonSerdeCodec;
use codee::{Decoder, Encoder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::best_effort::attempt;
use crate::oauth_context::OAuthContext;
use crate::storage::KeyValueStore;
use crate::user::UserMeta;

pub(crate) const USER_META_KEY: &str = "cl_user_meta";
pub(crate) const OAUTH_CONTEXT_KEY: &str = "cl_oauth_context";
const DEVICE_TRUSTED_KEY: &str = "device_trusted";
const AUTH_ERROR_SUPPRESS_KEY: &str = "cl_auth_error_suppress";
const PENDING_DELETION_KEY: &str = "cl_pending_deletion_user_id";
const OAUTH_CLEANUP_KEY: &str = "cl_oauth_cleanup";
const OAUTH_SUCCESS_MESSAGE_KEY: &str = "oauth_success_message";

const SIGNUP_DRAFT_KEYS: [&str; 5] = [
    "cl_oauth_form_data",
    "cl_reg_form_data",
    "cl_signup_form_data",
    "cl_signup_method",
    "cl_signup_step_index",
];

const SESSION_MARKER_KEYS: [&str; 4] = [
    PENDING_DELETION_KEY,
    OAUTH_CLEANUP_KEY,
    OAUTH_SUCCESS_MESSAGE_KEY,
    AUTH_ERROR_SUPPRESS_KEY,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SuppressionWindow {
    #[serde(with = "crate::time_ext::epoch_millis")]
    expires_at: OffsetDateTime,
}

/// Typed access to everything the coordinator keeps in browser storage.
///
/// Every operation is best effort. Storage that is unavailable, full or holds a corrupted
/// record behaves like storage holding nothing.
#[derive(Clone)]
pub struct ContextStore {
    local: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore").finish_non_exhaustive()
    }
}

impl ContextStore {
    pub fn new(local: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { local, session }
    }

    /// Backed by `window.localStorage` and `window.sessionStorage`.
    #[cfg(feature = "hydrate")]
    pub fn browser() -> Self {
        use crate::storage::{BrowserStore, StorageArea};
        Self::new(
            Arc::new(BrowserStore::new(StorageArea::Local)),
            Arc::new(BrowserStore::new(StorageArea::Session)),
        )
    }

    pub fn save_user_meta(&self, meta: &UserMeta) {
        write_json(self.local.as_ref(), USER_META_KEY, meta);
    }

    pub fn user_meta(&self) -> Option<UserMeta> {
        read_json(self.local.as_ref(), USER_META_KEY)
    }

    pub fn clear_user_meta(&self) {
        remove(self.local.as_ref(), USER_META_KEY);
    }

    pub fn oauth_context(&self) -> Option<OAuthContext> {
        read_json(self.local.as_ref(), OAUTH_CONTEXT_KEY)
    }

    /// Only the OAuth flow controller may call this.
    pub(crate) fn set_oauth_context(&self, ctx: &OAuthContext) {
        write_json(self.local.as_ref(), OAUTH_CONTEXT_KEY, ctx);
    }

    pub(crate) fn clear_oauth_context(&self) {
        remove(self.local.as_ref(), OAUTH_CONTEXT_KEY);
    }

    /// Removes a stored OAuth context that can no longer be decoded. Returns whether one was
    /// removed.
    pub(crate) fn discard_unreadable_oauth_context(&self) -> bool {
        if read_raw(self.local.as_ref(), OAUTH_CONTEXT_KEY).is_none() || self.oauth_context().is_some() {
            return false;
        }
        tracing::debug!("Discarding unreadable OAuth context");
        self.clear_oauth_context();
        true
    }

    /// Silences session-expiry handling for `duration`, used around OAuth redirects.
    pub fn suppress_auth_error_notifications(&self, duration: Duration) {
        let window = SuppressionWindow {
            expires_at: OffsetDateTime::now_utc() + duration,
        };
        write_json(self.session.as_ref(), AUTH_ERROR_SUPPRESS_KEY, &window);
    }

    /// Whether an auth error occurring now should be suppressed.
    ///
    /// An active window is consumed by the first suppressed event. An expired one is removed.
    pub fn take_auth_error_suppression(&self) -> bool {
        let Some(window) =
            read_json::<SuppressionWindow>(self.session.as_ref(), AUTH_ERROR_SUPPRESS_KEY)
        else {
            return false;
        };
        remove(self.session.as_ref(), AUTH_ERROR_SUPPRESS_KEY);
        let active = OffsetDateTime::now_utc() <= window.expires_at;
        tracing::trace!(active, "Consumed auth error suppression window");
        active
    }

    pub fn is_device_trusted(&self) -> bool {
        read_raw(self.local.as_ref(), DEVICE_TRUSTED_KEY).as_deref() == Some("true")
    }

    pub fn set_device_trusted(&self, trusted: bool) {
        match trusted {
            true => write_raw(self.local.as_ref(), DEVICE_TRUSTED_KEY, "true"),
            false => remove(self.local.as_ref(), DEVICE_TRUSTED_KEY),
        }
    }

    /// Forgets half-filled signup forms, so that an abandoned attempt starts fresh.
    pub fn clear_signup_drafts(&self) {
        for key in SIGNUP_DRAFT_KEYS {
            remove(self.local.as_ref(), key);
        }
    }

    pub(crate) fn clear_session_markers(&self) {
        for key in SESSION_MARKER_KEYS {
            remove(self.session.as_ref(), key);
        }
    }

    pub(crate) fn set_pending_deletion_user_id(&self, user_id: &str) {
        write_raw(self.session.as_ref(), PENDING_DELETION_KEY, user_id);
    }

    pub fn pending_deletion_user_id(&self) -> Option<String> {
        read_raw(self.session.as_ref(), PENDING_DELETION_KEY)
    }

    pub(crate) fn clear_pending_deletion_user_id(&self) {
        remove(self.session.as_ref(), PENDING_DELETION_KEY);
    }

    /// Tells the next page that an OAuth cleanup just happened and it must not auto-redirect.
    pub(crate) fn mark_oauth_cleanup(&self) {
        write_raw(self.session.as_ref(), OAUTH_CLEANUP_KEY, "true");
    }

    /// Reads and removes the marker set by `mark_oauth_cleanup`.
    pub fn take_oauth_cleanup_flag(&self) -> bool {
        let flag = read_raw(self.session.as_ref(), OAUTH_CLEANUP_KEY).as_deref() == Some("true");
        if flag {
            remove(self.session.as_ref(), OAUTH_CLEANUP_KEY);
        }
        flag
    }

    pub(crate) fn set_oauth_success_message(&self, message: &str) {
        write_raw(self.session.as_ref(), OAUTH_SUCCESS_MESSAGE_KEY, message);
    }

    /// Message to show on the dashboard after an OAuth login. Shown once.
    pub fn take_oauth_success_message(&self) -> Option<String> {
        let message = read_raw(self.session.as_ref(), OAUTH_SUCCESS_MESSAGE_KEY)?;
        remove(self.session.as_ref(), OAUTH_SUCCESS_MESSAGE_KEY);
        Some(message)
    }

    /// Removes every auth provider key from local storage.
    pub fn scrub_provider_keys(&self) {
        let Some(keys) = attempt("Listing local storage keys", || self.local.keys()) else {
            return;
        };
        for key in keys
            .iter()
            .filter(|key| key.starts_with("sb-") || key.contains("supabase"))
        {
            tracing::trace!(key = key.as_str(), "Removing provider key");
            remove(self.local.as_ref(), key);
        }
    }
}

fn read_raw(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    attempt("Reading from storage", || store.get_item(key)).flatten()
}

fn write_raw(store: &dyn KeyValueStore, key: &str, value: &str) {
    attempt("Writing to storage", || store.set_item(key, value));
}

fn remove(store: &dyn KeyValueStore, key: &str) {
    attempt("Removing from storage", || store.remove_item(key));
}

fn read_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let raw = read_raw(store, key)?;
    attempt("Decoding stored value", || {
        <JsonSerdeCodec as Decoder<T>>::decode(raw.as_str())
    })
}

fn write_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) {
    if let Some(encoded) = attempt("Encoding value", || {
        <JsonSerdeCodec as Encoder<T>>::encode(value)
    }) {
        write_raw(store, key, &encoded);
    }
}

#[cfg(test)]
mod tests {
    use assertr::prelude::*;

    use super::*;
    use crate::storage::MemoryStore;

    fn store() -> (ContextStore, Arc<MemoryStore>, Arc<MemoryStore>) {
        let local = Arc::new(MemoryStore::new());
        let session = Arc::new(MemoryStore::new());
        (
            ContextStore::new(local.clone(), session.clone()),
            local,
            session,
        )
    }

    #[test]
    fn corrupted_records_read_as_absent() {
        let (store, local, _) = store();
        local.set_item(USER_META_KEY, "{not json").unwrap();
        local.set_item(OAUTH_CONTEXT_KEY, r#"{"status":"pending"}"#).unwrap();

        assert_that(store.user_meta()).is_equal_to(None);
        assert_that(store.oauth_context()).is_equal_to(None);
    }

    #[test]
    fn user_meta_round_trips() {
        let (store, _, _) = store();
        let meta = UserMeta::new(Some("citizen".to_owned()), Some("Juan".to_owned()));
        store.save_user_meta(&meta);
        assert_that(store.user_meta()).is_equal_to(Some(meta));

        store.clear_user_meta();
        assert_that(store.user_meta()).is_equal_to(None);
    }

    #[test]
    fn suppression_window_is_consumed_once() {
        let (store, _, _) = store();
        store.suppress_auth_error_notifications(Duration::from_secs(8));
        assert_that(store.take_auth_error_suppression()).is_true();
        assert_that(store.take_auth_error_suppression()).is_false();
    }

    #[test]
    fn expired_suppression_window_is_removed_without_suppressing() {
        let (store, _, session) = store();
        session
            .set_item(AUTH_ERROR_SUPPRESS_KEY, r#"{"expiresAt":1000}"#)
            .unwrap();
        assert_that(store.take_auth_error_suppression()).is_false();
        assert_that(session.get_item(AUTH_ERROR_SUPPRESS_KEY).unwrap()).is_equal_to(None);
    }

    #[test]
    fn device_trust_is_stored_as_string_flag() {
        let (store, local, _) = store();
        store.set_device_trusted(true);
        assert_that(local.get_item("device_trusted").unwrap()).is_equal_to(Some("true".to_owned()));
        assert_that(store.is_device_trusted()).is_true();

        store.set_device_trusted(false);
        assert_that(store.is_device_trusted()).is_false();
    }

    #[test]
    fn scrubbing_only_removes_provider_keys() {
        let (store, local, _) = store();
        local.set_item("sb-abc-auth-token", "{}").unwrap();
        local.set_item("my-supabase-cache", "{}").unwrap();
        local.set_item("device_trusted", "true").unwrap();

        store.scrub_provider_keys();

        assert_that(local.keys().unwrap()).is_equal_to(vec!["device_trusted".to_owned()]);
    }

    #[test]
    fn cleanup_flag_is_one_shot() {
        let (store, _, _) = store();
        store.mark_oauth_cleanup();
        assert_that(store.take_oauth_cleanup_flag()).is_true();
        assert_that(store.take_oauth_cleanup_flag()).is_false();
    }
}
