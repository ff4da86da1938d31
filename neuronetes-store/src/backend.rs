//! Storage backends.

use async_trait::async_trait;
use dashmap::DashMap;
use neuronetes_types::{ControlError, Result};
use serde_json::Value;
use std::path::Path;

/// Raw keyed JSON storage under the typed store facade.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert or overwrite a value.
    async fn put(&self, key: &str, value: Value) -> Result<()>;

    /// Fetch a value.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// List key/value pairs under a prefix, ordered by key.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>>;

    /// Remove a key. Returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;
}

/// In-memory backend for tests and dry runs.
#[derive(Default)]
pub struct MemoryBackend {
    entries: DashMap<String, Value>,
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let mut out: Vec<(String, Value)> = self
            .entries
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.entries.remove(key).is_some())
    }
}

/// Embedded sled backend used by the daemon and CLI.
pub struct SledBackend {
    db: sled::Db,
}

impl SledBackend {
    /// Open (or create) the database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|e| ControlError::Transient(format!("failed to open record store: {e}")))?;
        Ok(Self { db })
    }
}

fn db_err(e: sled::Error) -> ControlError {
    ControlError::Transient(format!("record store error: {e}"))
}

#[async_trait]
impl Backend for SledBackend {
    async fn put(&self, key: &str, value: Value) -> Result<()> {
        let bytes = serde_json::to_vec(&value)?;
        self.db.insert(key.as_bytes(), bytes).map_err(db_err)?;
        self.db.flush_async().await.map_err(db_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self.db.get(key.as_bytes()).map_err(db_err)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = entry.map_err(db_err)?;
            let key = String::from_utf8_lossy(&key).into_owned();
            out.push((key, serde_json::from_slice(&bytes)?));
        }
        Ok(out)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let existed = self.db.remove(key.as_bytes()).map_err(db_err)?.is_some();
        self.db.flush_async().await.map_err(db_err)?;
        Ok(existed)
    }
}
