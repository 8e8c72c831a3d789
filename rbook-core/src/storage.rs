/// Storage adapter contract
///
/// Callers hold an `Arc<dyn StorageAdapter>` and never learn which backend
/// is behind it. Values are opaque bytes; the JSON helpers in `StorageExt`
/// cover the common case of serialized blobs.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::flat::FlatFileStore;
use crate::sqlite::SqliteStore;
use crate::Result;

/// Durable key/value storage
pub trait StorageAdapter: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Write a value, replacing any previous one
    fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored
    fn get_all_keys(&self) -> Result<Vec<String>>;

    /// Read several values; the result keeps the order of `keys`
    fn multi_get(&self, keys: &[String]) -> Result<Vec<(String, Option<Bytes>)>>;

    /// Write several values, one transaction per chunk
    fn multi_set(&self, pairs: Vec<(String, Bytes)>) -> Result<()>;

    /// Delete several values, one transaction per chunk
    fn multi_remove(&self, keys: &[String]) -> Result<()>;

    /// Delete every value
    fn clear(&self) -> Result<()>;

    /// Short backend name for logs
    fn backend_name(&self) -> &'static str;
}

/// JSON convenience layer over any adapter
pub trait StorageExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()>;
}

impl<S: StorageAdapter + ?Sized> StorageExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_vec(value)?;
        self.set(key, Bytes::from(raw))
    }
}

/// Which backend to construct
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageKind {
    /// Single snapshot file holding a flat map
    Flat,
    /// Embedded SQLite database
    Sqlite,
}

/// Open a key/value store of the requested kind.
pub fn open_store(config: &StoreConfig, kind: StorageKind) -> Result<Arc<dyn StorageAdapter>> {
    match kind {
        StorageKind::Flat => {
            let store = if config.in_memory {
                FlatFileStore::in_memory(config.batch_chunk_size)
            } else {
                FlatFileStore::open(&config.path, config.batch_chunk_size)?
            };
            Ok(Arc::new(store))
        }
        StorageKind::Sqlite => Ok(Arc::new(SqliteStore::open(config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        dept: String,
    }

    fn exercise(store: Arc<dyn StorageAdapter>) {
        store.set("a", Bytes::from_static(b"1")).unwrap();
        store
            .multi_set(vec![
                ("b".to_string(), Bytes::from_static(b"2")),
                ("c".to_string(), Bytes::from_static(b"3")),
            ])
            .unwrap();

        assert_eq!(store.get("a").unwrap(), Some(Bytes::from_static(b"1")));

        let mut keys = store.get_all_keys().unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a", "b", "c"]);

        let got = store
            .multi_get(&["c".to_string(), "missing".to_string()])
            .unwrap();
        assert_eq!(got[0], ("c".to_string(), Some(Bytes::from_static(b"3"))));
        assert_eq!(got[1], ("missing".to_string(), None));

        store.multi_remove(&["a".to_string(), "b".to_string()]).unwrap();
        assert_eq!(store.get_all_keys().unwrap(), vec!["c"]);

        store.remove("nope").unwrap();
        store.clear().unwrap();
        assert!(store.get_all_keys().unwrap().is_empty());

        let profile = Profile { name: "Dr. Rao".into(), dept: "CS".into() };
        store.set_json("profile", &profile).unwrap();
        let back: Option<Profile> = store.get_json("profile").unwrap();
        assert_eq!(back, Some(profile));
    }

    #[test]
    fn test_flat_backend_through_trait() {
        let store = open_store(&StoreConfig::in_memory(), StorageKind::Flat).unwrap();
        assert_eq!(store.backend_name(), "flat");
        exercise(store);
    }

    #[test]
    fn test_sqlite_backend_through_trait() {
        let store = open_store(&StoreConfig::in_memory(), StorageKind::Sqlite).unwrap();
        assert_eq!(store.backend_name(), "sqlite");
        exercise(store);
    }
}
