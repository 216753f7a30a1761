//! contentsync - offline-tolerant content synchronization
//!
//! Client-side sync layer for user-generated content (news posts,
//! comments). Content created while disconnected is queued durably and
//! uploaded once connectivity returns; server-confirmed content is merged
//! into a locally observable list.
//!
//! # Architecture
//!
//! - A `DurableQueue` per content type (`<type>.pending`) holds unsynced
//!   records, on a key-value or a transactional (SQLite) backend
//! - A `ContentManager` downloads the confirmed list, drains the queue in
//!   order through a `RemoteStore`, and notifies subscribers
//! - A `ConnectivityObserver` tells the manager when to drain again
//!
//! # Modules
//!
//! - `domain`: Data structures (Item, ItemId)
//! - `storage`: Pending queue backends and readiness
//! - `remote`: Wire contract and HTTP client
//! - `connectivity`: Online/offline observation
//! - `sync`: ContentManager
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Queue a comment while offline
//! contentsync add comments -f name=A -f text=hi --offline
//!
//! # Upload everything pending
//! contentsync sync comments
//!
//! # Print confirmed comments
//! contentsync list comments
//! ```

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod domain;
pub mod remote;
pub mod storage;
pub mod sync;

// Re-export main types at crate root for convenience
pub use connectivity::{ConnectivityObserver, ManualConnectivity, ProbeConnectivity};
pub use domain::{Item, ItemId};
pub use remote::{HttpRemote, RemoteError, RemoteStore};
pub use storage::{DurableQueue, QueueBackend, QueueError};
pub use sync::{ContentManager, DrainReport};
