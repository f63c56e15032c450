//! Small secrets (API keys, tokens) used by automation scripts.
//!
//! Backends implement [`CredentialStore`]; the binary decides which one to
//! use and hands it to whatever needs credentials.

use std::collections::BTreeMap;

use thiserror::Error;

#[cfg(target_os = "macos")]
pub mod keychain;
pub mod memory;
pub mod migration;

#[cfg(target_os = "macos")]
pub use keychain::KeychainStore;
pub use memory::InMemoryStore;
pub use migration::{migrate_legacy_file, MigrationError, MigrationReport};

/// Keychain service name all den credentials are filed under.
pub const SERVICE_NAME: &str = "den-cli";

/// Account name reserved for the Keychain key registry.
pub const REGISTRY_KEY: &str = "_credential_registry";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Credential key cannot be empty")]
    EmptyKey,
    #[error("Credential key '{0}' is reserved")]
    ReservedKey(String),
    #[error("Keychain access denied (errSecInvalidOwnerEdit). This usually happens when the application is rebuilt with a different signature. Please delete the 'den-cli' items using Keychain Access.app or run: security delete-generic-password -s den-cli")]
    AccessDenied,
    #[error("Failed to {operation} in Keychain: {message}")]
    Backend { operation: String, message: String },
    #[error("Failed to parse credential registry: {0}")]
    Registry(#[from] serde_json::Error),
}

pub trait CredentialStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError>;
    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError>;
    /// Removing a key that is not stored is not an error.
    fn delete(&self, key: &str) -> Result<(), CredentialError>;
    /// Stored keys, sorted.
    fn list(&self) -> Result<Vec<String>, CredentialError>;
}

impl<T: CredentialStore + ?Sized> CredentialStore for Box<T> {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        (**self).set(key, value)
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        (**self).delete(key)
    }

    fn list(&self) -> Result<Vec<String>, CredentialError> {
        (**self).list()
    }
}

pub(crate) fn ensure_key(key: &str) -> Result<(), CredentialError> {
    if key.trim().is_empty() {
        return Err(CredentialError::EmptyKey);
    }
    if key == REGISTRY_KEY {
        return Err(CredentialError::ReservedKey(key.to_string()));
    }
    Ok(())
}

/// Every stored credential. Keys listed but no longer readable are skipped.
pub fn load_credentials(
    store: &dyn CredentialStore,
) -> Result<BTreeMap<String, String>, CredentialError> {
    let mut credentials = BTreeMap::new();
    for key in store.list()? {
        if let Some(value) = store.get(&key)? {
            credentials.insert(key, value);
        }
    }
    Ok(credentials)
}
