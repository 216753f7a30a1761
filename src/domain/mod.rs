//! Domain types for content sync.
//!
//! - Item: an open JSON record (post or comment)
//! - ItemId: local or server identifier with loose equality

pub mod id;
pub mod item;

// Re-export commonly used types
pub use id::{generate_local_id, ItemId};
pub use item::{Item, ID_FIELD, TIMESTAMP_FIELD};
