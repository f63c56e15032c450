//! macOS Keychain backend (generic passwords under [`SERVICE_NAME`]).
//!
//! The Keychain cannot enumerate items for a service cheaply, so the set of
//! stored keys is kept as a JSON array in a reserved registry item.

use std::collections::BTreeSet;

use security_framework::base::Error as SecError;
use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use tracing::debug;

use super::{ensure_key, CredentialError, CredentialStore, REGISTRY_KEY, SERVICE_NAME};

const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;
const ERR_SEC_INVALID_OWNER_EDIT: i32 = -25244;

#[derive(Debug, Clone)]
pub struct KeychainStore {
    service: String,
}

impl Default for KeychainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeychainStore {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn read(&self, account: &str, operation: &str) -> Result<Option<String>, CredentialError> {
        match get_generic_password(&self.service, account) {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).to_string())),
            Err(err) if err.code() == ERR_SEC_ITEM_NOT_FOUND => Ok(None),
            Err(err) => Err(map_error(&err, operation)),
        }
    }

    fn update_registry(&self, key: &str, add: bool) -> Result<(), CredentialError> {
        let mut keys: BTreeSet<String> = self.list()?.into_iter().collect();
        if add {
            keys.insert(key.to_string());
        } else {
            keys.remove(key);
        }
        let body = serde_json::to_string(&keys)?;
        set_generic_password(&self.service, REGISTRY_KEY, body.as_bytes())
            .map_err(|err| map_error(&err, "update credential registry"))
    }
}

fn map_error(err: &SecError, operation: &str) -> CredentialError {
    if err.code() == ERR_SEC_INVALID_OWNER_EDIT {
        return CredentialError::AccessDenied;
    }
    CredentialError::Backend {
        operation: operation.to_string(),
        message: err.to_string(),
    }
}

impl CredentialStore for KeychainStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        self.read(key, "retrieve credential")
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        ensure_key(key)?;
        set_generic_password(&self.service, key, value.as_bytes())
            .map_err(|err| map_error(&err, "store credential"))?;
        self.update_registry(key, true)
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        ensure_key(key)?;
        match delete_generic_password(&self.service, key) {
            Ok(()) => {}
            Err(err) if err.code() == ERR_SEC_ITEM_NOT_FOUND => {
                debug!(key, "credential already absent from keychain");
            }
            Err(err) => return Err(map_error(&err, "delete credential")),
        }
        self.update_registry(key, false)
    }

    fn list(&self) -> Result<Vec<String>, CredentialError> {
        let Some(raw) = self.read(REGISTRY_KEY, "list credentials")? else {
            return Ok(Vec::new());
        };
        let mut keys: Vec<String> = serde_json::from_str(&raw)?;
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}
