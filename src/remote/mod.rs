//! Remote content store.
//!
//! The remote store is a fixed wire contract: one endpoint, form-encoded
//! POST, `action` = `<type>.get` or `<type>.push`. `get` answers with a JSON
//! array of confirmed items, `push` with the stored item including its
//! server id.

pub mod http;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::Item;

// Re-export the HTTP client
pub use http::HttpRemote;

/// Action name for downloading confirmed items of a type
pub fn get_action(content_type: &str) -> String {
    format!("{}.get", content_type)
}

/// Action name for uploading one pending record of a type
pub fn push_action(content_type: &str) -> String {
    format!("{}.push", content_type)
}

/// Errors talking to the remote store
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Pushed item came back without an id")]
    MissingId,
}

/// Trait for the remote side of the sync
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Download every confirmed item of a type
    async fn fetch_all(&self, content_type: &str) -> Result<Vec<Item>, RemoteError>;

    /// Upload one pending record; returns the server's stored copy
    async fn push(&self, content_type: &str, record: &Item) -> Result<Item, RemoteError>;
}
