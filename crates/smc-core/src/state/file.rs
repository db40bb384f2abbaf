// # File Key-Value Store
//
// File-based implementation of KeyValueStore with crash recovery.
//
// ## Purpose
//
// Keeps connection settings and the list registry across restarts. Losing
// the registry would make the exporter create duplicate lists on the
// appliance, so writes are atomic and a backup is kept.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename
// - Automatic backup: `.backup` holds the previous good file
// - Recovery: falls back to the backup if the main file does not parse
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "entries": {
//     "smc_endpoint": "https://smc.example",
//     "dim_blocklist": "41"
//   }
// }
// ```

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::Error;
use crate::traits::KeyValueStore;

/// Store file format version
const STORE_FILE_VERSION: &str = "1.0";

/// File-based key-value store with crash recovery
///
/// `set` and `remove` only mark the store dirty; `persist` writes it.
///
/// # Example
///
/// ```rust,no_run
/// use smc_core::state::FileKeyValueStore;
/// use smc_core::traits::KeyValueStore;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = FileKeyValueStore::new("/var/lib/smc-export/store.json").await?;
///
///     store.set("dim_blocklist", "41").await?;
///     store.persist().await?;
///
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    state: Arc<RwLock<FileState>>,
}

#[derive(Debug)]
struct FileState {
    entries: HashMap<String, String>,
    dirty: bool,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct StoreFileFormat {
    version: String,
    #[serde(default)]
    entries: HashMap<String, String>,
}

impl FileKeyValueStore {
    /// Create or load a file store
    ///
    /// This will:
    /// 1. Create parent directories if needed
    /// 2. Load the existing file
    /// 3. If it is corrupt, load the backup
    /// 4. If both fail, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let entries = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            state: Arc::new(RwLock::new(FileState {
                entries,
                dirty: false,
            })),
        })
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory view with the file contents
    ///
    /// Unpersisted changes are discarded.
    pub async fn reload(&self) -> Result<(), Error> {
        let entries = Self::load_with_recovery(&self.path).await?;
        let mut guard = self.state.write().await;
        tracing::debug!("Reloaded store: {} entries", entries.len());
        guard.entries = entries;
        guard.dirty = false;
        Ok(())
    }

    async fn load_with_recovery(path: &Path) -> Result<HashMap<String, String>, Error> {
        match Self::load(path).await {
            Ok(entries) => {
                tracing::debug!("Loaded store from file: {} entries", entries.len());
                Ok(entries)
            }
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Store file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );

                let backup_path = Self::backup_path(path);
                if !backup_path.exists() {
                    tracing::warn!("No backup file found. Starting with empty store.");
                    return Ok(HashMap::new());
                }

                match Self::load(&backup_path).await {
                    Ok(entries) => {
                        tracing::info!("Recovered store from backup: {} entries", entries.len());
                        if let Err(restore_err) = fs::copy(&backup_path, path).await {
                            tracing::error!(
                                "Failed to restore store file from backup: {}",
                                restore_err
                            );
                        }
                        Ok(entries)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also corrupted: {}. Starting with empty store.",
                            backup_err
                        );
                        Ok(HashMap::new())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<HashMap<String, String>, Error> {
        if !path.exists() {
            tracing::debug!("Store file does not exist: {}", path.display());
            return Ok(HashMap::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            Error::kv_store(format!("Failed to read store file {}: {}", path.display(), e))
        })?;

        let file: StoreFileFormat = serde_json::from_str(&content)?;

        if file.version != STORE_FILE_VERSION {
            tracing::warn!(
                "Store file version mismatch: expected {}, got {}. Attempting to load anyway.",
                STORE_FILE_VERSION,
                file.version
            );
        }

        Ok(file.entries)
    }

    async fn write(&self) -> Result<(), Error> {
        let mut guard = self.state.write().await;

        let file = StoreFileFormat {
            version: STORE_FILE_VERSION.to_string(),
            entries: guard.entries.clone(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let temp_path = self.temp_path();
        {
            let mut tmp = fs::File::create(&temp_path).await.map_err(|e| {
                Error::kv_store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            tmp.write_all(json.as_bytes()).await.map_err(|e| {
                Error::kv_store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            tmp.flush().await.map_err(|e| {
                Error::kv_store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            if let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::kv_store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        guard.dirty = false;
        tracing::trace!("Store written to file: {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        Ok(self.state.read().await.entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        guard.entries.insert(key.to_string(), value.to_string());
        guard.dirty = true;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), Error> {
        let mut guard = self.state.write().await;
        if guard.entries.remove(key).is_some() {
            guard.dirty = true;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, Error> {
        Ok(self.state.read().await.entries.keys().cloned().collect())
    }

    async fn persist(&self) -> Result<(), Error> {
        if self.state.read().await.dirty {
            self.write().await
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_store_basic() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileKeyValueStore::new(&path).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());

        store.set("dim_blocklist", "41").await.unwrap();
        assert_eq!(store.get("dim_blocklist").await.unwrap().as_deref(), Some("41"));

        // Nothing on disk until persist
        assert!(!path.exists());
        store.persist().await.unwrap();
        assert!(path.exists());

        let store2 = FileKeyValueStore::new(&path).await.unwrap();
        assert_eq!(store2.get("dim_blocklist").await.unwrap().as_deref(), Some("41"));
    }

    #[tokio::test]
    async fn test_file_store_reload_discards_unpersisted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileKeyValueStore::new(&path).await.unwrap();
        store.set("smc_port", "8082").await.unwrap();
        store.persist().await.unwrap();

        store.set("smc_port", "9999").await.unwrap();
        store.reload().await.unwrap();
        assert_eq!(store.get("smc_port").await.unwrap().as_deref(), Some("8082"));
    }

    #[tokio::test]
    async fn test_file_store_corruption_recovery() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        let store = FileKeyValueStore::new(&path).await.unwrap();
        store.set("dim_safelist", "1").await.unwrap();
        store.persist().await.unwrap();

        // Second write creates the backup of the first
        store.set("dim_safelist", "2").await.unwrap();
        store.persist().await.unwrap();
        assert!(FileKeyValueStore::backup_path(&path).exists());

        fs::write(&path, b"corrupted json data").await.unwrap();

        let recovered = FileKeyValueStore::new(&path).await.unwrap();
        assert_eq!(
            recovered.get("dim_safelist").await.unwrap().as_deref(),
            Some("1"),
            "backup holds the state before the last write"
        );
    }

    #[tokio::test]
    async fn test_file_store_corrupt_without_backup_starts_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");
        fs::write(&path, b"{not json").await.unwrap();

        let store = FileKeyValueStore::new(&path).await.unwrap();
        assert!(store.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("deeper").join("store.json");

        let store = FileKeyValueStore::new(&path).await.unwrap();
        store.set("k", "v").await.unwrap();
        store.persist().await.unwrap();
        assert!(path.exists());
    }
}
