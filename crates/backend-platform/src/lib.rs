//! Durable client-state stores and the credential store built on top of them.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

mod auth_store;
mod file_store;

pub use auth_store::{ACCESS_TOKEN_KEY, AuthStore, EMAIL_KEY, REFRESH_TOKEN_KEY, ROLE_KEY};
pub use file_store::FileStore;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Durable string key-value store holding client state between launches.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Apply several writes as one unit; `None` removes the key.
    ///
    /// The provided version writes key by key and restores the earlier
    /// values when one write fails. Stores that can commit everything at
    /// once override it.
    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let previous = entries
            .iter()
            .map(|(key, _)| Ok((*key, self.get(key)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;

        for (written, (key, value)) in entries.iter().enumerate() {
            if let Err(err) = write_one(self, key, *value) {
                for (key, old) in previous[..written].iter().rev() {
                    let _ = write_one(self, key, old.as_deref());
                }
                return Err(err);
            }
        }
        Ok(())
    }
}

fn write_one<S: KeyValueStore + ?Sized>(
    store: &S,
    key: &str,
    value: Option<&str>,
) -> Result<(), StoreError> {
    match value {
        Some(value) => store.set(key, value),
        None => store.remove(key),
    }
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        (**self).remove(key)
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        (**self).write_batch(entries)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryStore {
    data: Arc<RwLock<HashMap<String, String>>>,
}

impl KeyValueStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let data = self
            .data
            .read()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        Ok(data.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        data.remove(key);
        Ok(())
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let mut data = self
            .data
            .write()
            .map_err(|_| StoreError::Backend("poisoned lock".to_owned()))?;
        for (key, value) in entries {
            match value {
                Some(value) => data.insert((*key).to_owned(), (*value).to_owned()),
                None => data.remove(*key),
            };
        }
        Ok(())
    }
}

#[cfg(feature = "os-keyring")]
#[derive(Clone)]
pub struct OsKeyringStore {
    service: String,
}

#[cfg(feature = "os-keyring")]
impl OsKeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<keyring::Entry, StoreError> {
        keyring::Entry::new(&self.service, key).map_err(|err| StoreError::Backend(err.to_string()))
    }
}

#[cfg(feature = "os-keyring")]
impl KeyValueStore for OsKeyringStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(keyring::Error::NoStorageAccess(err)) => Err(StoreError::Unavailable(err.to_string())),
            Err(other) => Err(StoreError::Backend(other.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entry(key)?
            .set_password(value)
            .map_err(|err| StoreError::Backend(err.to_string()))
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(other) => Err(StoreError::Backend(other.to_string())),
        }
    }
}

/// Store view that namespaces every key, so several API hosts can share one
/// backing store without clobbering each other's credentials.
#[derive(Clone)]
pub struct ScopedStore<S: KeyValueStore> {
    inner: S,
    scope: String,
}

impl<S: KeyValueStore> ScopedStore<S> {
    pub fn new(inner: S, scope: impl Into<String>) -> Self {
        Self {
            inner,
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn scoped_key(&self, key: &str) -> String {
        format!("{}:{key}", self.scope)
    }
}

impl<S: KeyValueStore> KeyValueStore for ScopedStore<S> {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(&self.scoped_key(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(&self.scoped_key(key), value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(&self.scoped_key(key))
    }

    fn write_batch(&self, entries: &[(&str, Option<&str>)]) -> Result<(), StoreError> {
        let scoped: Vec<(String, Option<&str>)> = entries
            .iter()
            .map(|(key, value)| (self.scoped_key(key), *value))
            .collect();
        let scoped: Vec<(&str, Option<&str>)> = scoped
            .iter()
            .map(|(key, value)| (key.as_str(), *value))
            .collect();
        self.inner.write_batch(&scoped)
    }
}
