//! Credential store shared by the request pipeline, the reissue coordinator and
//! the chat session.

use std::sync::{Arc, Mutex};

use backend_core::{BackendError, BackendErrorCategory, CredentialPair};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::{InMemoryStore, KeyValueStore, StoreError};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EMAIL_KEY: &str = "email";
pub const ROLE_KEY: &str = "role";

const CREDENTIAL_KEYS: [&str; 4] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EMAIL_KEY, ROLE_KEY];

/// Durable credential state plus a change feed.
///
/// All writes go through this type. Each change reaches the backing store as
/// one batch before the snapshot moves, so the snapshot always matches what
/// was last persisted.
#[derive(Clone)]
pub struct AuthStore {
    store: Arc<dyn KeyValueStore>,
    changes: watch::Sender<CredentialPair>,
    writer: Arc<Mutex<()>>,
}

impl std::fmt::Debug for AuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let current = self.changes.borrow();
        f.debug_struct("AuthStore")
            .field("logged_in", &current.is_logged_in())
            .field("email", &current.email)
            .finish()
    }
}

impl AuthStore {
    /// Open the credential store, loading whatever the backing store holds.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, BackendError> {
        let initial = CredentialPair {
            access_token: read_key(store.as_ref(), ACCESS_TOKEN_KEY)?,
            refresh_token: read_key(store.as_ref(), REFRESH_TOKEN_KEY)?,
            email: read_key(store.as_ref(), EMAIL_KEY)?,
            role: read_key(store.as_ref(), ROLE_KEY)?,
        };
        debug!(
            logged_in = initial.is_logged_in(),
            "loaded credentials from store"
        );
        let (changes, _) = watch::channel(initial);
        Ok(Self {
            store,
            changes,
            writer: Arc::default(),
        })
    }

    pub fn in_memory() -> Self {
        let (changes, _) = watch::channel(CredentialPair::default());
        Self {
            store: Arc::new(InMemoryStore::default()),
            changes,
            writer: Arc::default(),
        }
    }

    /// Current credentials.
    pub fn snapshot(&self) -> CredentialPair {
        self.changes.borrow().clone()
    }

    /// Current non-empty access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.changes.borrow().bearer().map(str::to_owned)
    }

    pub fn email(&self) -> Option<String> {
        self.changes.borrow().email.clone()
    }

    /// Watch credential replacements, including logout and reissue failure.
    pub fn subscribe(&self) -> watch::Receiver<CredentialPair> {
        self.changes.subscribe()
    }

    /// Replace every credential field, as after a successful login.
    pub fn set_credentials(&self, credentials: CredentialPair) -> Result<(), BackendError> {
        self.commit(&CREDENTIAL_KEYS, |current| *current = credentials)
    }

    /// Replace only the access token, as after a successful reissue.
    pub fn set_access_token(&self, token: &str) -> Result<(), BackendError> {
        self.commit(&[ACCESS_TOKEN_KEY], |current| {
            current.access_token = Some(token.to_owned());
        })
    }

    /// Drop the access token but keep the identity fields.
    pub fn clear_access_token(&self) -> Result<(), BackendError> {
        self.commit(&[ACCESS_TOKEN_KEY], |current| current.access_token = None)
    }

    /// Forget every credential field, as on logout.
    pub fn clear(&self) -> Result<(), BackendError> {
        self.set_credentials(CredentialPair::default())
    }

    /// Persist `keys` of the updated credentials as one batch, then publish.
    ///
    /// Writers are serialized on `writer`; the watch channel is only touched
    /// after the store accepted the batch, so readers never wait on disk I/O.
    fn commit(
        &self,
        keys: &[&'static str],
        update: impl FnOnce(&mut CredentialPair),
    ) -> Result<(), BackendError> {
        let _writer = self
            .writer
            .lock()
            .map_err(|_| map_store_error("write", keys, StoreError::Backend("poisoned lock".to_owned())))?;

        let mut next = self.snapshot();
        update(&mut next);

        let batch: Vec<(&str, Option<&str>)> =
            keys.iter().map(|key| (*key, field(&next, key))).collect();
        if let Err(err) = self.store.write_batch(&batch) {
            let err = map_store_error("write", keys, err);
            warn!(code = %err.code, "credential store write failed");
            return Err(err);
        }
        drop(batch);

        self.changes.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        Ok(())
    }
}

fn field<'a>(credentials: &'a CredentialPair, key: &str) -> Option<&'a str> {
    let value = match key {
        ACCESS_TOKEN_KEY => credentials.access_token.as_deref(),
        REFRESH_TOKEN_KEY => credentials.refresh_token.as_deref(),
        EMAIL_KEY => credentials.email.as_deref(),
        ROLE_KEY => credentials.role.as_deref(),
        _ => None,
    };
    value.filter(|value| !value.is_empty())
}

fn read_key(store: &dyn KeyValueStore, key: &'static str) -> Result<Option<String>, BackendError> {
    store
        .get(key)
        .map(|value| value.filter(|value| !value.is_empty()))
        .map_err(|err| map_store_error("read", &[key], err))
}

fn map_store_error(operation: &str, keys: &[&str], err: StoreError) -> BackendError {
    let code = match err {
        StoreError::Unavailable(_) => "store_unavailable",
        StoreError::Backend(_) => "store_failure",
    };
    BackendError::new(
        BackendErrorCategory::Storage,
        code,
        format!("failed to {operation} {}: {err}", keys.join(", ")),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        FileStore,
        tests::{FailingStore, FailsOnWrite},
    };

    fn logged_in() -> CredentialPair {
        CredentialPair {
            access_token: Some("access-1".into()),
            refresh_token: Some("refresh-1".into()),
            email: Some("a@example.com".into()),
            role: Some("ROLE_USER".into()),
        }
    }

    #[test]
    fn open_loads_persisted_credentials() {
        let backing = InMemoryStore::default();
        backing.set(ACCESS_TOKEN_KEY, "persisted").expect("seed");
        backing.set(EMAIL_KEY, "a@example.com").expect("seed");

        let auth = AuthStore::open(Arc::new(backing)).expect("open should work");
        assert_eq!(auth.access_token().as_deref(), Some("persisted"));
        assert_eq!(auth.email().as_deref(), Some("a@example.com"));
        assert_eq!(auth.snapshot().role, None);
    }

    #[test]
    fn reissue_replaces_only_the_access_token() {
        let backing = InMemoryStore::default();
        let auth = AuthStore::open(Arc::new(backing.clone())).expect("open");
        auth.set_credentials(logged_in()).expect("login");

        auth.set_access_token("access-2").expect("reissue");
        let snapshot = auth.snapshot();
        assert_eq!(snapshot.access_token.as_deref(), Some("access-2"));
        assert_eq!(snapshot.refresh_token.as_deref(), Some("refresh-1"));
        assert_eq!(
            backing.get(ACCESS_TOKEN_KEY).expect("get").as_deref(),
            Some("access-2")
        );
    }

    #[test]
    fn clear_access_token_keeps_identity() {
        let backing = InMemoryStore::default();
        let auth = AuthStore::open(Arc::new(backing.clone())).expect("open");
        auth.set_credentials(logged_in()).expect("login");

        auth.clear_access_token().expect("clear");
        assert_eq!(auth.access_token(), None);
        assert_eq!(auth.email().as_deref(), Some("a@example.com"));
        assert_eq!(backing.get(ACCESS_TOKEN_KEY).expect("get"), None);
    }

    #[test]
    fn clear_removes_every_field() {
        let backing = InMemoryStore::default();
        let auth = AuthStore::open(Arc::new(backing.clone())).expect("open");
        auth.set_credentials(logged_in()).expect("login");
        auth.clear().expect("logout");

        assert_eq!(auth.snapshot(), CredentialPair::default());
        for key in [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EMAIL_KEY, ROLE_KEY] {
            assert_eq!(backing.get(key).expect("get"), None, "{key} should be gone");
        }
    }

    #[tokio::test]
    async fn subscribers_observe_replacements() {
        let auth = AuthStore::in_memory();
        let mut rx = auth.subscribe();

        auth.set_credentials(logged_in()).expect("login");
        rx.changed().await.expect("change should be observed");
        assert_eq!(rx.borrow().access_token.as_deref(), Some("access-1"));

        auth.clear_access_token().expect("clear");
        rx.changed().await.expect("change should be observed");
        assert!(!rx.borrow().is_logged_in());
    }

    #[test]
    fn failed_write_keeps_previous_snapshot() {
        let auth = AuthStore::in_memory();
        auth.set_credentials(logged_in()).expect("login");

        let broken = AuthStore {
            store: Arc::new(FailingStore),
            changes: auth.changes.clone(),
            writer: auth.writer.clone(),
        };
        let err = broken.set_access_token("access-2").expect_err("must fail");
        assert_eq!(err.category, BackendErrorCategory::Storage);
        assert_eq!(err.code, "store_unavailable");
        assert_eq!(auth.access_token().as_deref(), Some("access-1"));
    }

    #[test]
    fn open_surfaces_store_outage() {
        let err = AuthStore::open(Arc::new(FailingStore)).expect_err("must fail");
        assert_eq!(err.category, BackendErrorCategory::Storage);
    }

    #[test]
    fn failed_login_write_leaves_store_and_snapshot_on_the_old_session() {
        let backing = InMemoryStore::default();
        let seeded = AuthStore::open(Arc::new(backing.clone())).expect("open");
        seeded.set_credentials(logged_in()).expect("first login");

        let auth = AuthStore::open(Arc::new(FailsOnWrite::new(backing.clone(), 2))).expect("open");
        let err = auth
            .set_credentials(CredentialPair {
                access_token: Some("access-9".into()),
                refresh_token: Some("refresh-9".into()),
                email: Some("b@example.com".into()),
                role: Some("ROLE_ADMIN".into()),
            })
            .expect_err("second key write fails");
        assert_eq!(err.category, BackendErrorCategory::Storage);
        assert_eq!(auth.snapshot(), logged_in());

        let reopened = AuthStore::open(Arc::new(backing)).expect("reopen");
        assert_eq!(reopened.snapshot(), logged_in());
    }

    #[test]
    fn file_backed_login_survives_restart() {
        let path = std::env::temp_dir().join(format!(
            "boardchat-auth-{}.json",
            std::process::id()
        ));
        let auth = AuthStore::open(Arc::new(FileStore::new(&path))).expect("open");
        auth.set_credentials(logged_in()).expect("login");
        auth.set_access_token("access-2").expect("reissue");

        let reopened = AuthStore::open(Arc::new(FileStore::new(&path))).expect("reopen");
        assert_eq!(
            reopened.snapshot(),
            CredentialPair {
                access_token: Some("access-2".into()),
                ..logged_in()
            }
        );
        let _ = std::fs::remove_file(&path);
    }
}
