//! Key-value backed pending queue.
//!
//! The whole queue lives as one JSON array under a single key. Every write
//! is read-modify-write of that array; writes through one `KeyValueQueue`
//! (and its clones) are serialized, writers in other processes are not.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::QueueError;
use crate::domain::{Item, ItemId};

/// String-keyed string storage medium
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Value under `key`, or `None` if the key was never set
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError>;

    /// Replace the value under `key`
    async fn set(&self, key: &str, value: String) -> Result<(), QueueError>;
}

/// One file per key inside a directory
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Path of the file backing `key`
    pub fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        match fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), QueueError> {
        fs::create_dir_all(&self.dir).await?;

        // Write aside, then rename over the old value
        let path = self.path_for(key);
        let tmp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4().simple()));
        fs::write(&tmp, value.as_bytes()).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }
}

/// In-process medium; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryKeyValueStore {
    map: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>, QueueError> {
        Ok(self.map.lock().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), QueueError> {
        self.map.lock().await.insert(key.to_string(), value);
        Ok(())
    }
}

/// Pending queue stored as a serialized array under `name`
#[derive(Clone)]
pub struct KeyValueQueue {
    name: String,
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl KeyValueQueue {
    pub fn new(name: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            name: name.into(),
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn get_all(&self) -> Result<Vec<Item>, QueueError> {
        self.read_all().await
    }

    pub async fn add(&self, mut record: Item) -> Result<ItemId, QueueError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_all().await?;
        let id = record.ensure_id();
        records.push(record);
        self.write_all(&records).await?;

        debug!(queue = %self.name, %id, "Queued record");
        Ok(id)
    }

    pub async fn delete_by_id(&self, id: &ItemId) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_all().await?;
        let before = records.len();
        records.retain(|r| r.id().map_or(true, |rid| !rid.loosely_eq(id)));

        if records.len() != before {
            self.write_all(&records).await?;
            debug!(queue = %self.name, %id, "Removed record");
        }

        Ok(())
    }

    pub async fn delete_first_without_id(&self) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;

        let mut records = self.read_all().await?;
        if let Some(position) = records.iter().position(|r| r.id().is_none()) {
            records.remove(position);
            self.write_all(&records).await?;
            debug!(queue = %self.name, position, "Removed record without an id");
        }

        Ok(())
    }

    pub async fn clear(&self) -> Result<(), QueueError> {
        let _guard = self.write_lock.lock().await;
        self.store.set(&self.name, "[]".to_string()).await
    }

    /// Decode the stored array.
    ///
    /// An absent key, empty value or `null` is an empty queue. Anything else
    /// that is not an array of objects is corruption and is reported, never
    /// reset.
    async fn read_all(&self) -> Result<Vec<Item>, QueueError> {
        let raw = match self.store.get(&self.name).await? {
            Some(raw) if !raw.trim().is_empty() => raw,
            _ => return Ok(Vec::new()),
        };

        let corrupted = |source| QueueError::Corrupted {
            name: self.name.clone(),
            source,
        };

        let value: Value = serde_json::from_str(&raw).map_err(corrupted)?;
        if value.is_null() {
            return Ok(Vec::new());
        }

        serde_json::from_value(value).map_err(corrupted)
    }

    async fn write_all(&self, records: &[Item]) -> Result<(), QueueError> {
        let raw = serde_json::to_string(records)?;
        self.store.set(&self.name, raw).await
    }
}
