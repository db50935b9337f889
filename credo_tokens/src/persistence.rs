//! Persistence bridges for the current credential

use async_trait::async_trait;

use crate::{error::BoxError, Credential};

#[cfg(feature = "file")]
pub mod file;
pub mod in_memory;

#[cfg(feature = "file")]
pub use file::FilePersistence;
pub use in_memory::InMemoryPersistence;

/// The key under which the current credential is persisted
pub const CREDENTIAL_KEY: &str = "credo.credential";

/// Durable storage for credentials
///
/// Implementations store an opaque serialized credential per key. Errors are
/// reported but never fatal to the caller; a credential that cannot be
/// persisted is still used for the lifetime of the process.
#[async_trait]
pub trait CredentialPersistence: Send + Sync {
    /// Reads the credential stored under `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Credential>, BoxError>;

    /// Stores `credential` under `key`, replacing any prior value
    async fn put(&self, key: &str, credential: &Credential) -> Result<(), BoxError>;

    /// Removes the credential stored under `key`
    ///
    /// Removing a key that holds nothing succeeds.
    async fn remove(&self, key: &str) -> Result<(), BoxError>;
}
