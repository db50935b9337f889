//! An in-memory persistence bridge

use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;

use super::CredentialPersistence;
use crate::{error::BoxError, Credential};

/// An in-memory credential store, lost when the process exits
#[derive(Default, Debug)]
pub struct InMemoryPersistence {
    entries: Mutex<HashMap<String, Credential>>,
}

impl InMemoryPersistence {
    /// Constructs a new, empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs an in-memory store already holding `credential`
    pub fn with_credential(key: impl Into<String>, credential: Credential) -> Self {
        let mut entries = HashMap::new();
        entries.insert(key.into(), credential);
        Self {
            entries: Mutex::new(entries),
        }
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Credential>> {
        // A panic while holding this lock cannot leave a half-written entry
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialPersistence for InMemoryPersistence {
    async fn get(&self, key: &str) -> Result<Option<Credential>, BoxError> {
        Ok(self.entries().get(key).cloned())
    }

    async fn put(&self, key: &str, credential: &Credential) -> Result<(), BoxError> {
        self.entries().insert(key.to_owned(), credential.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BoxError> {
        self.entries().remove(key);
        Ok(())
    }
}
