//! Content synchronization.
//!
//! `ContentManager` ties a durable pending queue to a remote store and keeps
//! an in-memory list of confirmed items that UI code can read and subscribe to.

pub mod manager;

pub use manager::{ContentManager, DrainReport};
