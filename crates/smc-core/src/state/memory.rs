// # Memory Key-Value Store
//
// In-memory implementation of KeyValueStore.
//
// ## Crash Behavior
//
// - All values are lost on restart
// - The list registry starts empty, so the first batch per role creates a
//   new list on the appliance
//
// ## When to Use
//
// - Testing environments
// - Ephemeral deployments seeded entirely from the environment

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::KeyValueStore;

/// In-memory key-value store
///
/// Values live in a HashMap protected by a RwLock. Clones share the map.
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `entries`
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// Get the number of keys in the store
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if the store is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.inner.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        self.inner
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        self.inner.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.inner.read().await.keys().cloned().collect())
    }

    async fn persist(&self) -> Result<(), Error> {
        // Nothing to write
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_basic() {
        let store = MemoryKeyValueStore::new();
        assert!(store.is_empty().await);

        store.set("dim_blocklist", "41").await.unwrap();
        assert_eq!(store.len().await, 1);
        assert!(store.is_set("dim_blocklist").await.unwrap());
        assert_eq!(store.get("dim_blocklist").await.unwrap().as_deref(), Some("41"));

        store.remove("dim_blocklist").await.unwrap();
        assert!(!store.is_set("dim_blocklist").await.unwrap());
        store.persist().await.unwrap();
    }

    #[tokio::test]
    async fn test_clones_share_values() {
        let store = MemoryKeyValueStore::with_entries([("smc_port", "8082")]);
        let clone = store.clone();

        clone.set("dim_safelist", "7").await.unwrap();

        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["dim_safelist", "smc_port"]);
    }
}
