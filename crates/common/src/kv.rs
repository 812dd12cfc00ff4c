use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to persist {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single JSON document on disk with atomic replace semantics.
///
/// Writes go through a temp file in the same directory followed by a
/// rename, so readers never observe a partially written document and a
/// crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Load the document, or `T::default()` if the file does not exist yet.
    pub fn load<T>(&self) -> Result<T, KvError>
    where
        T: DeserializeOwned + Default,
    {
        if !self.path.exists() {
            return Ok(T::default());
        }
        let data = std::fs::read(&self.path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save<T>(&self, value: &T) -> Result<(), KvError>
    where
        T: Serialize,
    {
        let parent = self
            .path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&parent)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        serde_json::to_writer_pretty(&mut tmp, value)?;
        tmp.flush()?;
        tmp.persist(&self.path).map_err(|e| KvError::Persist {
            path: self.path.clone(),
            source: e.error,
        })?;
        Ok(())
    }

    /// Atomic read-modify-write: load, apply `f`, save, return the result.
    pub fn update<T, F>(&self, f: F) -> Result<T, KvError>
    where
        T: DeserializeOwned + Serialize + Default,
        F: FnOnce(&mut T),
    {
        let mut value: T = self.load()?;
        f(&mut value);
        self.save(&value)?;
        Ok(value)
    }

    pub fn remove(&self) -> Result<(), KvError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("missing.json"));
        let value: Vec<String> = store.load().unwrap();
        assert!(value.is_empty());
    }

    #[test]
    fn test_save_then_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("map.json"));
        let mut map = HashMap::new();
        map.insert("a".to_string(), 1u32);
        store.save(&map).unwrap();
        let loaded: HashMap<String, u32> = store.load().unwrap();
        assert_eq!(loaded, map);
    }

    #[test]
    fn test_update_read_modify_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("list.json"));
        store
            .update(|list: &mut Vec<String>| list.push("one".to_string()))
            .unwrap();
        let after = store
            .update(|list: &mut Vec<String>| list.push("two".to_string()))
            .unwrap();
        assert_eq!(after, vec!["one".to_string(), "two".to_string()]);
    }
}
