//! The holder of the current credential

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use tokio::sync::{broadcast, Mutex};

use crate::{
    persistence::{CredentialPersistence, InMemoryPersistence, CREDENTIAL_KEY},
    Credential,
};

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// A synchronous observer of credential changes
///
/// The listener is called without any of the store's locks held, so it may
/// replace or clear itself. A panicking listener is logged and otherwise
/// ignored.
pub type ChangeListener = Arc<dyn Fn(&Credential) + Send + Sync + 'static>;

/// Holds the current credential and writes changes through to persistence
///
/// Every replacement swaps the in-memory value, notifies the registered
/// listener and all subscribers, then persists the new value. Writers are
/// serialized, so persistence sees replacements in the order memory does.
pub struct CredentialStore {
    current: RwLock<Credential>,
    hydrated: AtomicBool,
    write_lock: Mutex<()>,
    listener: RwLock<Option<ChangeListener>>,
    changes: broadcast::Sender<Arc<Credential>>,
    persistence: Box<dyn CredentialPersistence>,
}

impl CredentialStore {
    /// Constructs a store that hydrates from `persistence` on first access
    pub fn new(persistence: impl CredentialPersistence + 'static) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            current: RwLock::new(Credential::Absent),
            hydrated: AtomicBool::new(false),
            write_lock: Mutex::new(()),
            listener: RwLock::new(None),
            changes,
            persistence: Box::new(persistence),
        }
    }

    /// Constructs a store that only keeps credentials in memory
    pub fn in_memory() -> Self {
        Self::new(InMemoryPersistence::new())
    }

    /// Constructs a store, eagerly hydrating from `persistence`
    ///
    /// If nothing is persisted, or the persisted value cannot be read, the
    /// store starts out absent.
    pub async fn load(persistence: impl CredentialPersistence + 'static) -> Self {
        let store = Self::new(persistence);
        store.current().await;
        store
    }

    /// Registers the listener invoked synchronously on every change,
    /// replacing any previous listener
    pub fn set_listener(&self, listener: impl Fn(&Credential) + Send + Sync + 'static) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = Some(Arc::new(listener));
    }

    /// Removes the registered listener, if any
    pub fn clear_listener(&self) {
        *self.listener.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Subscribes to credential changes
    ///
    /// Receivers that fall behind skip to newer values; the latest value is
    /// always available from [`current()`][Self::current()].
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Credential>> {
        self.changes.subscribe()
    }

    /// Gets the current credential
    ///
    /// The first call on a store that has never held a credential hydrates
    /// it from persistence.
    pub async fn current(&self) -> Credential {
        let credential = self.snapshot();
        if !credential.is_absent() || self.hydrated.load(Ordering::Acquire) {
            return credential;
        }

        let _guard = self.write_lock.lock().await;
        if !self.hydrated.load(Ordering::Acquire) {
            self.hydrate().await;
            self.hydrated.store(true, Ordering::Release);
        }

        self.snapshot()
    }

    /// Replaces the current credential
    ///
    /// Replacing with an absent credential does nothing; use
    /// [`clear()`][Self::clear()] to forget a credential.
    pub async fn replace(&self, credential: Credential) {
        if credential.is_absent() {
            tracing::debug!("ignoring replacement with an absent credential");
            return;
        }

        let _guard = self.write_lock.lock().await;
        self.hydrated.store(true, Ordering::Release);
        self.swap(credential.clone());
        self.notify(&credential);

        tracing::debug!(kind = credential.kind(), "replaced current credential");

        if let Err(error) = self.persistence.put(CREDENTIAL_KEY, &credential).await {
            tracing::warn!(
                error = &*error as &dyn std::error::Error,
                "unable to persist credential"
            );
        }
    }

    /// Forgets the current credential, in memory and in persistence
    pub async fn clear(&self) {
        let _guard = self.write_lock.lock().await;
        self.hydrated.store(true, Ordering::Release);
        self.swap(Credential::Absent);
        self.notify(&Credential::Absent);

        tracing::debug!("cleared current credential");

        if let Err(error) = self.persistence.remove(CREDENTIAL_KEY).await {
            tracing::warn!(
                error = &*error as &dyn std::error::Error,
                "unable to remove persisted credential"
            );
        }
    }

    fn snapshot(&self) -> Credential {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn swap(&self, credential: Credential) {
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = credential;
    }

    fn notify(&self, credential: &Credential) {
        let listener = self
            .listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        if let Some(listener) = listener {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(credential))).is_err() {
                tracing::error!(kind = credential.kind(), "credential change listener panicked");
            }
        }

        // No subscribers is fine
        let _ = self.changes.send(Arc::new(credential.clone()));
    }

    async fn hydrate(&self) {
        match self.persistence.get(CREDENTIAL_KEY).await {
            Ok(Some(credential)) if !credential.is_absent() => {
                tracing::debug!(kind = credential.kind(), "hydrated credential from persistence");
                self.swap(credential.clone());
                let _ = self.changes.send(Arc::new(credential));
            }
            Ok(_) => {
                tracing::debug!("no persisted credential");
            }
            Err(error) => {
                tracing::warn!(
                    error = &*error as &dyn std::error::Error,
                    "unable to read persisted credential, starting without one"
                );
            }
        }
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("current", &self.snapshot().kind())
            .field("hydrated", &self.hydrated.load(Ordering::Relaxed))
            .field(
                "has_listener",
                &self
                    .listener
                    .read()
                    .map(|l| l.is_some())
                    .unwrap_or_default(),
            )
            .field("subscribers", &self.changes.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use credo_clock::{DurationSecs, TestClock, UnixTime};

    use super::*;
    use crate::{
        error::BoxError, AccessToken, RefreshToken, Scope, TokenLifetimeConfig, TokenType,
    };

    fn credential(access: &'static str, refresh: &'static str) -> Credential {
        let token = TokenLifetimeConfig::default()
            .with_clock(TestClock::new(UnixTime(1_000)))
            .create_token(
                AccessToken::from_static(access),
                TokenType::from_static("bearer"),
                Scope::from_static("read"),
                DurationSecs(3600),
            );
        Credential::user(token, RefreshToken::from_static(refresh))
    }

    struct BrokenPersistence;

    #[async_trait]
    impl CredentialPersistence for BrokenPersistence {
        async fn get(&self, _: &str) -> Result<Option<Credential>, BoxError> {
            Err("disk on fire".into())
        }

        async fn put(&self, _: &str, _: &Credential) -> Result<(), BoxError> {
            Err("disk on fire".into())
        }

        async fn remove(&self, _: &str) -> Result<(), BoxError> {
            Err("disk on fire".into())
        }
    }

    #[tokio::test]
    async fn starts_absent_without_persisted_state() {
        let store = CredentialStore::in_memory();
        assert_eq!(store.current().await, Credential::Absent);
    }

    #[tokio::test]
    async fn hydrates_lazily_on_first_access() {
        let persisted = credential("abc", "xyz");
        let store = CredentialStore::new(InMemoryPersistence::with_credential(
            CREDENTIAL_KEY,
            persisted.clone(),
        ));

        assert_eq!(store.current().await, persisted);
    }

    #[tokio::test]
    async fn replace_swaps_notifies_and_persists() {
        let store = Arc::new(CredentialStore::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        store.set_listener(move |c| {
            assert_eq!(c.access_token().unwrap().as_str(), "def");
            seen.fetch_add(1, Ordering::SeqCst);
        });
        let mut changes = store.subscribe();

        store.replace(credential("def", "xyz")).await;

        assert_eq!(store.current().await, credential("def", "xyz"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*changes.recv().await.unwrap(), credential("def", "xyz"));
        assert_eq!(
            store.persistence.get(CREDENTIAL_KEY).await.unwrap(),
            Some(credential("def", "xyz"))
        );
    }

    #[tokio::test]
    async fn a_panicking_listener_does_not_stop_persistence() {
        let store = CredentialStore::in_memory();
        store.set_listener(|_| panic!("listener failed"));

        store.replace(credential("abc", "xyz")).await;

        assert_eq!(store.current().await, credential("abc", "xyz"));
        assert_eq!(
            store.persistence.get(CREDENTIAL_KEY).await.unwrap(),
            Some(credential("abc", "xyz"))
        );
    }

    #[tokio::test]
    async fn a_listener_may_clear_itself() {
        let store = Arc::new(CredentialStore::in_memory());
        let calls = Arc::new(AtomicUsize::new(0));
        let (seen, inner) = (calls.clone(), Arc::downgrade(&store));
        store.set_listener(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            if let Some(store) = inner.upgrade() {
                store.clear_listener();
            }
        });

        store.replace(credential("abc", "xyz")).await;
        store.replace(credential("def", "xyz")).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.current().await, credential("def", "xyz"));
    }

    #[tokio::test]
    async fn replacing_with_absent_is_a_no_op() {
        let store = CredentialStore::in_memory();
        store.replace(credential("abc", "xyz")).await;
        let mut changes = store.subscribe();

        store.replace(Credential::Absent).await;

        assert_eq!(store.current().await, credential("abc", "xyz"));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn clear_forgets_in_memory_and_persisted_values() {
        let store = CredentialStore::in_memory();
        store.replace(credential("abc", "xyz")).await;

        store.clear().await;

        assert_eq!(store.current().await, Credential::Absent);
        assert_eq!(store.persistence.get(CREDENTIAL_KEY).await.unwrap(), None);
    }

    #[tokio::test]
    async fn persistence_failures_do_not_undo_replacement() {
        let store = CredentialStore::load(BrokenPersistence).await;
        assert_eq!(store.current().await, Credential::Absent);

        store.replace(credential("abc", "xyz")).await;
        assert_eq!(store.current().await, credential("abc", "xyz"));

        store.clear().await;
        assert_eq!(store.current().await, Credential::Absent);
    }
}
