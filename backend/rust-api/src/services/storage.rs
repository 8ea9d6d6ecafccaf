use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage is unavailable")]
    Unavailable,
    #[error("quota exceeded: {needed} bytes needed, quota is {quota} bytes")]
    QuotaExceeded { needed: usize, quota: usize },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Synchronous string key-value storage, the shape of browser local storage.
pub trait KeyValueStorage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
}

fn entries_size(entries: &BTreeMap<String, String>) -> usize {
    entries.iter().map(|(k, v)| k.len() + v.len()).sum()
}

/// In-process storage with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
    quota: Option<usize>,
    unavailable: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Storage that fails every call, like a browser with storage disabled.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            Err(StorageError::Unavailable)
        } else {
            Ok(())
        }
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check()?;
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check()?;
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        if let Some(quota) = self.quota {
            let current = entries_size(&entries);
            let previous = entries.get(key).map(|v| key.len() + v.len()).unwrap_or(0);
            let needed = current - previous + key.len() + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.check()?;
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.check()?;
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.keys().cloned().collect())
    }
}

/// Write-through JSON file storage. The whole map is rewritten on every
/// mutation; the map is small (a few records per chapter).
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<BTreeMap<String, String>>(&raw) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(
                        "Progress file {} is corrupt, starting empty: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(
            "Progress file {} opened with {} keys",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        let raw = serde_json::to_string_pretty(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, raw)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl KeyValueStorage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        let mut next = entries.clone();
        next.insert(key.to_string(), value.to_string());
        self.flush(&next)?;
        *entries = next;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;
        if entries.contains_key(key) {
            let mut next = entries.clone();
            next.remove(key);
            self.flush(&next)?;
            *entries = next;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_rejects_write_and_keeps_previous_value() {
        let storage = MemoryStorage::with_quota(16);
        storage.set_item("k", "small").unwrap();

        let err = storage.set_item("k", "much too large for the quota").unwrap_err();
        assert!(matches!(err, StorageError::QuotaExceeded { .. }));
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("small"));
    }

    #[test]
    fn quota_counts_replacement_not_addition() {
        let storage = MemoryStorage::with_quota(10);
        storage.set_item("k", "123456789").unwrap();
        storage.set_item("k", "987654321").unwrap();
        assert_eq!(storage.get_item("k").unwrap().as_deref(), Some("987654321"));
    }

    #[test]
    fn unavailable_storage_fails_every_call() {
        let storage = MemoryStorage::unavailable();
        assert!(matches!(storage.get_item("k"), Err(StorageError::Unavailable)));
        assert!(matches!(storage.set_item("k", "v"), Err(StorageError::Unavailable)));
        assert!(matches!(storage.keys(), Err(StorageError::Unavailable)));
    }

    #[test]
    fn file_storage_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");

        {
            let storage = FileStorage::open(&path).unwrap();
            storage.set_item("a", "1").unwrap();
            storage.set_item("b", "2").unwrap();
            storage.remove_item("a").unwrap();
        }

        let reopened = FileStorage::open(&path).unwrap();
        assert_eq!(reopened.keys().unwrap(), vec!["b".to_string()]);
        assert_eq!(reopened.get_item("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.json");
        fs::write(&path, "{not json").unwrap();

        let storage = FileStorage::open(&path).unwrap();
        assert!(storage.keys().unwrap().is_empty());
    }
}
