//! JSONL-backed storage with in-memory caching.
//!
//! One `<collection>.jsonl` file per collection. Creates append, updates
//! and deletes rewrite the file from cache. The file is the source of
//! truth; the cache is loaded lazily per collection.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Serialize, de::DeserializeOwned};

use super::{Filter, Keyed, Storage};
use crate::error::{CadenceError, Result};

/// JSONL storage rooted at a base directory.
pub struct JsonlStore {
    base_path: PathBuf,
    cache: RwLock<HashMap<String, Vec<serde_json::Value>>>,
}

impl JsonlStore {
    /// Open (or create) a store at the given directory.
    pub fn open(base_path: impl AsRef<Path>) -> Result<Self> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            cache: RwLock::new(HashMap::new()),
        })
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.base_path.join(format!("{}.jsonl", collection))
    }

    /// Load a collection into cache if not already loaded.
    fn ensure_loaded(&self, collection: &str) -> Result<()> {
        {
            let cache = self
                .cache
                .read()
                .map_err(|e| CadenceError::Storage(e.to_string()))?;
            if cache.contains_key(collection) {
                return Ok(());
            }
        }

        let mut cache = self
            .cache
            .write()
            .map_err(|e| CadenceError::Storage(e.to_string()))?;
        if cache.contains_key(collection) {
            return Ok(());
        }

        let path = self.collection_path(collection);
        let records = if path.exists() {
            let file = File::open(&path)?;
            let reader = BufReader::new(file);
            let mut records = Vec::new();
            for line in reader.lines() {
                let line = line?;
                if !line.trim().is_empty() {
                    let record: serde_json::Value = serde_json::from_str(&line)?;
                    records.push(record);
                }
            }
            records
        } else {
            Vec::new()
        };

        cache.insert(collection.to_string(), records);
        Ok(())
    }

    fn append_to_file(&self, collection: &str, record: &serde_json::Value) -> Result<()> {
        let path = self.collection_path(collection);
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(file, "{}", serde_json::to_string(record)?)?;
        Ok(())
    }

    fn rewrite_file(&self, collection: &str) -> Result<()> {
        let cache = self
            .cache
            .read()
            .map_err(|e| CadenceError::Storage(e.to_string()))?;
        let records = cache
            .get(collection)
            .ok_or_else(|| CadenceError::Storage(format!("collection not loaded: {}", collection)))?;

        let path = self.collection_path(collection);
        let mut file = File::create(&path)?;
        for record in records {
            writeln!(file, "{}", serde_json::to_string(record)?)?;
        }
        Ok(())
    }

    fn record_id(record: &serde_json::Value) -> Option<&str> {
        record.get("id").and_then(|v| v.as_str())
    }
}

impl Storage for JsonlStore {
    fn create<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let value = serde_json::to_value(record)?;

        // File first (source of truth), then cache
        self.append_to_file(collection, &value)?;

        let mut cache = self
            .cache
            .write()
            .map_err(|e| CadenceError::Storage(e.to_string()))?;
        cache
            .get_mut(collection)
            .ok_or_else(|| CadenceError::Storage(format!("collection not loaded: {}", collection)))?
            .push(value);

        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, collection: &str, id: &str) -> Result<Option<T>> {
        self.ensure_loaded(collection)?;

        let cache = self
            .cache
            .read()
            .map_err(|e| CadenceError::Storage(e.to_string()))?;
        let records = cache
            .get(collection)
            .ok_or_else(|| CadenceError::Storage(format!("collection not loaded: {}", collection)))?;

        for record in records {
            if Self::record_id(record) == Some(id) {
                let parsed: T = serde_json::from_value(record.clone())?;
                return Ok(Some(parsed));
            }
        }

        Ok(None)
    }

    fn update<T: Serialize + Keyed>(&self, collection: &str, record: &T) -> Result<()> {
        self.ensure_loaded(collection)?;

        let id = record.key().to_string();
        let value = serde_json::to_value(record)?;

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|e| CadenceError::Storage(e.to_string()))?;
            let records = cache.get_mut(collection).ok_or_else(|| {
                CadenceError::Storage(format!("collection not loaded: {}", collection))
            })?;

            let slot = records
                .iter_mut()
                .find(|r| Self::record_id(r) == Some(id.as_str()));
            match slot {
                Some(r) => *r = value,
                None => {
                    return Err(CadenceError::Storage(format!(
                        "no record '{}' in collection '{}'",
                        id, collection
                    )));
                }
            }
        }

        self.rewrite_file(collection)?;
        Ok(())
    }

    fn delete(&self, collection: &str, id: &str) -> Result<()> {
        self.ensure_loaded(collection)?;

        {
            let mut cache = self
                .cache
                .write()
                .map_err(|e| CadenceError::Storage(e.to_string()))?;
            let records = cache.get_mut(collection).ok_or_else(|| {
                CadenceError::Storage(format!("collection not loaded: {}", collection))
            })?;

            let original_len = records.len();
            records.retain(|r| Self::record_id(r) != Some(id));

            if records.len() == original_len {
                return Err(CadenceError::Storage(format!(
                    "no record '{}' in collection '{}'",
                    id, collection
                )));
            }
        }

        self.rewrite_file(collection)?;
        Ok(())
    }

    fn query<T: DeserializeOwned>(&self, collection: &str, filters: &[Filter]) -> Result<Vec<T>> {
        self.ensure_loaded(collection)?;

        let cache = self
            .cache
            .read()
            .map_err(|e| CadenceError::Storage(e.to_string()))?;
        let records = cache
            .get(collection)
            .ok_or_else(|| CadenceError::Storage(format!("collection not loaded: {}", collection)))?;

        let mut results = Vec::new();
        for record in records {
            if filters.iter().all(|f| f.matches(record)) {
                let parsed: T = serde_json::from_value(record.clone())?;
                results.push(parsed);
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::TempDir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct TestRecord {
        id: String,
        name: String,
        status: String,
    }

    impl Keyed for TestRecord {
        fn key(&self) -> &str {
            &self.id
        }
    }

    fn record(id: &str, name: &str, status: &str) -> TestRecord {
        TestRecord {
            id: id.to_string(),
            name: name.to_string(),
            status: status.to_string(),
        }
    }

    fn open_store() -> (JsonlStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonlStore::open(temp_dir.path()).unwrap();
        (store, temp_dir)
    }

    #[test]
    fn test_create_and_get() {
        let (store, _temp) = open_store();
        let rec = record("1", "test", "active");

        store.create("test", &rec).unwrap();
        let retrieved: Option<TestRecord> = store.get("test", "1").unwrap();

        assert_eq!(retrieved, Some(rec));
    }

    #[test]
    fn test_get_not_found() {
        let (store, _temp) = open_store();
        let retrieved: Option<TestRecord> = store.get("test", "nonexistent").unwrap();
        assert_eq!(retrieved, None);
    }

    #[test]
    fn test_update() {
        let (store, _temp) = open_store();
        store.create("test", &record("1", "test", "active")).unwrap();

        let updated = record("1", "test", "completed");
        store.update("test", &updated).unwrap();

        let retrieved: Option<TestRecord> = store.get("test", "1").unwrap();
        assert_eq!(retrieved, Some(updated));
    }

    #[test]
    fn test_update_not_found() {
        let (store, _temp) = open_store();
        let result = store.update("test", &record("1", "test", "active"));
        assert!(result.is_err());
    }

    #[test]
    fn test_delete() {
        let (store, _temp) = open_store();
        store.create("test", &record("1", "test", "active")).unwrap();
        store.delete("test", "1").unwrap();

        let retrieved: Option<TestRecord> = store.get("test", "1").unwrap();
        assert_eq!(retrieved, None);
    }

    #[test]
    fn test_delete_not_found() {
        let (store, _temp) = open_store();
        assert!(store.delete("test", "nonexistent").is_err());
    }

    #[test]
    fn test_query_with_filters() {
        let (store, _temp) = open_store();
        store.create("test", &record("1", "alice", "active")).unwrap();
        store.create("test", &record("2", "bob", "blocked")).unwrap();
        store.create("test", &record("3", "carol", "active")).unwrap();

        let active: Vec<TestRecord> = store
            .query("test", &[Filter::eq("status", "active")])
            .unwrap();

        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|r| r.status == "active"));
    }

    #[test]
    fn test_list() {
        let (store, _temp) = open_store();
        store.create("test", &record("1", "one", "active")).unwrap();
        store.create("test", &record("2", "two", "active")).unwrap();

        let all: Vec<TestRecord> = store.list("test").unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = JsonlStore::open(temp_dir.path()).unwrap();
            store.create("test", &record("1", "kept", "active")).unwrap();
        }

        {
            let store = JsonlStore::open(temp_dir.path()).unwrap();
            let retrieved: Option<TestRecord> = store.get("test", "1").unwrap();
            assert_eq!(retrieved.unwrap().name, "kept");
        }
    }

    #[test]
    fn test_empty_collection() {
        let (store, _temp) = open_store();
        let all: Vec<TestRecord> = store.list("empty").unwrap();
        assert!(all.is_empty());
    }

    #[test]
    fn test_collections_are_independent() {
        let (store, _temp) = open_store();
        store.create("a", &record("1", "in_a", "active")).unwrap();
        store.create("b", &record("1", "in_b", "active")).unwrap();

        let a: Option<TestRecord> = store.get("a", "1").unwrap();
        let b: Option<TestRecord> = store.get("b", "1").unwrap();

        assert_eq!(a.unwrap().name, "in_a");
        assert_eq!(b.unwrap().name, "in_b");
    }
}
