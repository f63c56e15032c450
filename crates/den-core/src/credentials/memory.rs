use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{ensure_key, CredentialError, CredentialStore};

/// Process-local store. Nothing outlives the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<String, String>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for InMemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, CredentialError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), CredentialError> {
        ensure_key(key)?;
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), CredentialError> {
        self.entries().remove(key);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, CredentialError> {
        Ok(self.entries().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_overwrite_delete() {
        let store = InMemoryStore::new();
        assert_eq!(store.get("token").expect("get"), None);
        store.set("token", "one").expect("set");
        store.set("token", "two").expect("overwrite");
        assert_eq!(store.get("token").expect("get").as_deref(), Some("two"));
        store.delete("token").expect("delete");
        assert_eq!(store.get("token").expect("get"), None);
        store.delete("token").expect("delete missing key");
    }

    #[test]
    fn list_is_sorted() {
        let store = InMemoryStore::new();
        store.set("zeta", "1").expect("set");
        store.set("alpha", "2").expect("set");
        assert_eq!(store.list().expect("list"), vec!["alpha", "zeta"]);
    }

    #[test]
    fn blank_keys_are_rejected() {
        let store = InMemoryStore::new();
        assert!(matches!(store.set("  ", "v"), Err(CredentialError::EmptyKey)));
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn registry_key_is_reserved() {
        let store = InMemoryStore::new();
        assert!(matches!(
            store.set(crate::credentials::REGISTRY_KEY, "[]"),
            Err(CredentialError::ReservedKey(_))
        ));
        assert!(store.list().expect("list").is_empty());
    }
}
