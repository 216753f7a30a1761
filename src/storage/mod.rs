//! Durable pending queues.
//!
//! A `DurableQueue` is a named, typed list of records waiting for upload.
//! Two interchangeable backends exist:
//!
//! - **KeyValue**: the whole queue is one JSON array under a single key
//! - **Transactional**: one SQLite table per queue, opened asynchronously
//!
//! Backends are a closed set, picked by configuration at construction.
//!
//! # Readiness
//!
//! Every operation first waits for the backend to be ready. The key-value
//! backend is ready immediately; the transactional backend becomes ready once
//! its database has opened, and fails every call with
//! [`QueueError::BackendInit`] if the open failed.

pub mod kv;
pub mod readiness;
pub mod transactional;

use std::path::Path;
use std::sync::Arc;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Item, ItemId};

// Re-export key types
pub use kv::{FileKeyValueStore, KeyValueQueue, KeyValueStore, MemoryKeyValueStore};
pub use readiness::{readiness, Readiness, ReadinessSetter, ReadinessSignal};
pub use transactional::TransactionalQueue;

/// Suffix appended to a content type to name its pending queue
pub const PENDING_SUFFIX: &str = ".pending";

/// Queue name for a content type, e.g. `comments.pending`
pub fn pending_queue_name(content_type: &str) -> String {
    format!("{}{}", content_type, PENDING_SUFFIX)
}

/// Errors that can occur with a durable queue
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue '{name}' holds a corrupted payload: {source}")]
    Corrupted {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage backend failed to initialize: {0}")]
    BackendInit(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Which backend a queue uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// Single serialized array under one key
    #[default]
    KeyValue,

    /// Per-queue table in a shared SQLite database
    Transactional,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueueBackend::KeyValue => write!(f, "key_value"),
            QueueBackend::Transactional => write!(f, "transactional"),
        }
    }
}

impl std::str::FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "key_value" | "kv" => Ok(QueueBackend::KeyValue),
            "transactional" | "sqlite" => Ok(QueueBackend::Transactional),
            other => Err(format!("unknown queue backend: {}", other)),
        }
    }
}

/// A durable list of pending records
#[derive(Clone)]
pub enum DurableQueue {
    KeyValue(KeyValueQueue),
    Transactional(TransactionalQueue),
}

impl DurableQueue {
    /// Open a queue on disk.
    ///
    /// The key-value backend stores under `kv_dir`; the transactional backend
    /// opens (in the background) the shared database at `database_path`.
    pub fn open(backend: QueueBackend, name: &str, kv_dir: &Path, database_path: &Path) -> Self {
        match backend {
            QueueBackend::KeyValue => {
                let store = Arc::new(FileKeyValueStore::new(kv_dir.to_path_buf()));
                DurableQueue::KeyValue(KeyValueQueue::new(name, store))
            }
            QueueBackend::Transactional => {
                DurableQueue::Transactional(TransactionalQueue::open(name, database_path))
            }
        }
    }

    /// Backend in use
    pub fn backend(&self) -> QueueBackend {
        match self {
            DurableQueue::KeyValue(_) => QueueBackend::KeyValue,
            DurableQueue::Transactional(_) => QueueBackend::Transactional,
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        match self {
            DurableQueue::KeyValue(q) => q.name(),
            DurableQueue::Transactional(q) => q.name(),
        }
    }

    /// Wait until the backend can serve operations
    pub async fn ready(&self) -> Result<(), QueueError> {
        match self {
            DurableQueue::KeyValue(_) => Ok(()),
            DurableQueue::Transactional(q) => q.ready().await,
        }
    }

    /// Every queued record, in queue order (empty queue gives an empty vec)
    pub async fn get_all(&self) -> Result<Vec<Item>, QueueError> {
        match self {
            DurableQueue::KeyValue(q) => q.get_all().await,
            DurableQueue::Transactional(q) => q.get_all().await,
        }
    }

    /// Persist a record, assigning a local id if it has none.
    ///
    /// Returns the record's id once the write is durable.
    pub async fn add(&self, record: Item) -> Result<ItemId, QueueError> {
        match self {
            DurableQueue::KeyValue(q) => q.add(record).await,
            DurableQueue::Transactional(q) => q.add(record).await,
        }
    }

    /// Remove the record with this id (no-op if absent)
    pub async fn delete_by_id(&self, id: &ItemId) -> Result<(), QueueError> {
        match self {
            DurableQueue::KeyValue(q) => q.delete_by_id(id).await,
            DurableQueue::Transactional(q) => q.delete_by_id(id).await,
        }
    }

    /// Remove the earliest record that carries no usable id (no-op if none).
    ///
    /// Records written by another writer may lack an id; once uploaded they
    /// are removed this way.
    pub async fn delete_first_without_id(&self) -> Result<(), QueueError> {
        match self {
            DurableQueue::KeyValue(q) => q.delete_first_without_id().await,
            DurableQueue::Transactional(q) => q.delete_first_without_id().await,
        }
    }

    /// Remove every record
    pub async fn clear(&self) -> Result<(), QueueError> {
        match self {
            DurableQueue::KeyValue(q) => q.clear().await,
            DurableQueue::Transactional(q) => q.clear().await,
        }
    }
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("backend", &self.backend())
            .field("name", &self.name())
            .finish()
    }
}
