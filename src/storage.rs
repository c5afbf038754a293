use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Mutex, PoisonError};

use codee::{CodecError, Decoder, Encoder};
use leptos::prelude::{
    Effect, Get, GetUntracked, LocalStorage, ReadSignal, Set, Signal, UpdateUntracked,
    WriteSignal, signal,
};
use leptos_use::storage::{
    StorageType, UseStorageError, UseStorageOptions, use_storage_with_options,
};
use snafu::Snafu;

#[derive(Debug, Snafu)]
pub enum StorageError {
    #[snafu(display("StorageError: {area:?} storage is not available"))]
    Unavailable { area: StorageArea },

    #[snafu(display("StorageError: Could not access '{key}': {message}"))]
    Access { key: String, message: String },
}

/// Which browser storage area a value lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageArea {
    /// Survives tab closes. User metadata, OAuth context, device trust.
    Local,

    /// Scoped to the tab. Suppression windows and one-shot markers.
    Session,
}

impl From<StorageArea> for StorageType {
    fn from(area: StorageArea) -> Self {
        match area {
            StorageArea::Local => StorageType::Local,
            StorageArea::Session => StorageType::Session,
        }
    }
}

/// Minimal string key-value storage, modelled after the Web Storage API.
pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    fn remove_item(&self, key: &str) -> Result<(), StorageError>;

    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

/// In-process storage. Used natively, in tests and during SSR.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn items(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.items().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.items().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.items().keys().cloned().collect())
    }
}

#[cfg(feature = "hydrate")]
pub use browser::BrowserStore;

#[cfg(feature = "hydrate")]
mod browser {
    use snafu::OptionExt;

    use super::{AccessSnafu, KeyValueStore, StorageArea, StorageError, UnavailableSnafu};

    /// `window.localStorage` / `window.sessionStorage`.
    ///
    /// The storage object is looked up on every access, so this type holds no JS handles and
    /// can be shared freely.
    #[derive(Debug, Clone, Copy)]
    pub struct BrowserStore {
        area: StorageArea,
    }

    impl BrowserStore {
        pub fn new(area: StorageArea) -> Self {
            Self { area }
        }

        fn storage(&self) -> Result<web_sys::Storage, StorageError> {
            let window = web_sys::window().context(UnavailableSnafu { area: self.area })?;
            let storage = match self.area {
                StorageArea::Local => window.local_storage(),
                StorageArea::Session => window.session_storage(),
            };
            storage
                .ok()
                .flatten()
                .context(UnavailableSnafu { area: self.area })
        }
    }

    fn access_error(key: &str, err: wasm_bindgen::JsValue) -> StorageError {
        AccessSnafu {
            key,
            message: format!("{err:?}"),
        }
        .build()
    }

    impl KeyValueStore for BrowserStore {
        fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
            self.storage()?
                .get_item(key)
                .map_err(|err| access_error(key, err))
        }

        fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
            self.storage()?
                .set_item(key, value)
                .map_err(|err| access_error(key, err))
        }

        fn remove_item(&self, key: &str) -> Result<(), StorageError> {
            self.storage()?
                .remove_item(key)
                .map_err(|err| access_error(key, err))
        }

        fn keys(&self) -> Result<Vec<String>, StorageError> {
            let storage = self.storage()?;
            let len = storage.length().map_err(|err| access_error("*", err))?;
            let mut keys = Vec::with_capacity(len as usize);
            for index in 0..len {
                if let Ok(Some(key)) = storage.key(index) {
                    keys.push(key);
                }
            }
            Ok(keys)
        }
    }
}

pub(crate) struct UsePersistedReturn<T>
where
    T: Send + Sync + 'static,
{
    pub(crate) read: Signal<T>,

    #[expect(unused)]
    decode_err: (ReadSignal<bool>, WriteSignal<bool>),
    #[expect(unused)]
    effect: Effect<LocalStorage>,
}

/// Reactive, read-mostly view onto a persisted value, following changes made by other tabs
/// and by the non-reactive [`KeyValueStore`] writers of this crate.
///
/// A value that no longer decodes (e.g. written by an older client) is removed and replaced
/// by `fallback`.
pub(crate) fn use_persisted<T, C>(
    area: StorageArea,
    key: &'static str,
    fallback: T,
) -> UsePersistedReturn<T>
where
    T: Default + Debug + Clone + PartialEq + Send + Sync,
    C: Encoder<T, Encoded = String> + Decoder<T, Encoded = str>,
    <C as Encoder<T>>::Error: Debug,
    <C as Decoder<T>>::Error: Debug,
{
    let (decode_err, set_decode_err) = signal(false);

    let options = UseStorageOptions::default()
        .initial_value(fallback.clone())
        .listen_to_storage_changes(true)
        .delay_during_hydration(false)
        .on_error(move |err| match &err {
            UseStorageError::ItemCodecError(CodecError::Decode(_)) => {
                // Decode errors can arrive several times before the effect below ran.
                if !decode_err.get_untracked() {
                    tracing::debug!(?err, "Persisted value of '{key}' no longer decodes. Scheduling its removal.");
                    set_decode_err.set(true);
                }
            }
            _ => tracing::error!(?err, "Error reading '{key}' from storage."),
        });

    let (read, write, remove) = use_storage_with_options::<T, C>(area.into(), key, options);

    let effect = Effect::new(move |_| {
        if decode_err.get() {
            tracing::trace!("Removing undecodable value of '{key}', using {fallback:?}");
            remove();
            write.set(fallback.clone());
            set_decode_err.update_untracked(|it| *it = false);
        }
    });

    UsePersistedReturn {
        read,
        decode_err: (decode_err, set_decode_err),
        effect,
    }
}
