// # Key-Value Store Trait
//
// Defines the interface for the persisted configuration store.
//
// ## Purpose
//
// The store holds two kinds of values:
// - Connection settings (`smc_endpoint`, `smc_port`, `smc_api_key`)
// - The list registry: role name -> remote list identifier
//
// Registry entries must survive restarts, otherwise the exporter would
// create a duplicate list on the appliance after every restart.
//
// ## Implementations
//
// - File-based: versioned JSON with atomic writes (`state::file`)
// - In-memory: tests and ephemeral deployments (`state::memory`)

use async_trait::async_trait;

/// Trait for key-value store implementations
///
/// `set` and `remove` only change the in-memory view; `persist` makes the
/// changes durable. Implementations must be safe to call concurrently from
/// multiple tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Get the value stored under `key`
    ///
    /// # Returns
    ///
    /// - `Ok(Some(String))`: The stored value
    /// - `Ok(None)`: Key is not set
    /// - `Err(Error)`: Storage error
    async fn get(&self, key: &str) -> Result<Option<String>, crate::Error>;

    /// Store `value` under `key`
    async fn set(&self, key: &str, value: &str) -> Result<(), crate::Error>;

    /// Whether `key` holds a value
    async fn is_set(&self, key: &str) -> Result<bool, crate::Error> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove `key` (no-op if it was not set)
    async fn remove(&self, key: &str) -> Result<(), crate::Error>;

    /// List all keys in the store
    async fn keys(&self) -> Result<Vec<String>, crate::Error>;

    /// Write pending changes to durable storage
    async fn persist(&self) -> Result<(), crate::Error>;
}
