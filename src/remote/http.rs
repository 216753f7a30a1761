//! HTTP client for the remote content store.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::{get_action, push_action, RemoteError, RemoteStore};
use crate::domain::Item;

/// Timeout for reachability probes (regular requests have none)
const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Remote store reached over HTTP form posts
#[derive(Debug, Clone)]
pub struct HttpRemote {
    /// Endpoint URL all actions are posted to
    endpoint: String,

    /// HTTP client
    client: reqwest::Client,
}

impl HttpRemote {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the endpoint answers at all (any HTTP status counts)
    pub async fn probe(&self) -> bool {
        match self
            .client
            .head(&self.endpoint)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(_) => true,
            Err(e) => {
                debug!(endpoint = %self.endpoint, "Probe failed: {}", e);
                false
            }
        }
    }

    /// POST a form and parse the body as JSON
    async fn post_form(&self, fields: &[(String, String)]) -> Result<Value, RemoteError> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(fields)
            .send()
            .await?
            .error_for_status()?;

        let body = response.text().await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::InvalidResponse(format!("body is not JSON: {}", e)))
    }
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn fetch_all(&self, content_type: &str) -> Result<Vec<Item>, RemoteError> {
        let fields = vec![("action".to_string(), get_action(content_type))];
        let value = self.post_form(&fields).await?;
        parse_item_list(value)
    }

    async fn push(&self, content_type: &str, record: &Item) -> Result<Item, RemoteError> {
        let fields = push_form_fields(content_type, record);
        let value = self.post_form(&fields).await?;
        parse_pushed_item(value)
    }
}

/// Form fields for a push: the action, then every primitive property.
///
/// Strings go as-is, numbers in their JSON form, booleans as `true`/`false`
/// and null as `null`. Nested arrays and objects are not representable in a
/// flat form and are skipped.
pub fn push_form_fields(content_type: &str, record: &Item) -> Vec<(String, String)> {
    let mut fields = vec![("action".to_string(), push_action(content_type))];

    for (key, value) in record.fields() {
        let encoded = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => "null".to_string(),
            Value::Array(_) | Value::Object(_) => {
                warn!(field = %key, "Skipping non-primitive field in push");
                continue;
            }
        };
        fields.push((key.clone(), encoded));
    }

    fields
}

/// Parse a `get` reply: a JSON array of item objects
pub fn parse_item_list(value: Value) -> Result<Vec<Item>, RemoteError> {
    let entries = match value {
        Value::Array(entries) => entries,
        other => {
            return Err(RemoteError::InvalidResponse(format!(
                "expected an array of items, got {}",
                json_kind(&other)
            )))
        }
    };

    entries
        .into_iter()
        .map(|entry| {
            Item::try_from(entry).map_err(|other| {
                RemoteError::InvalidResponse(format!("expected an item object, got {}", json_kind(&other)))
            })
        })
        .collect()
}

/// Parse a `push` reply: one item object carrying its server id
pub fn parse_pushed_item(value: Value) -> Result<Item, RemoteError> {
    let item = Item::try_from(value).map_err(|other| {
        RemoteError::InvalidResponse(format!("expected an item object, got {}", json_kind(&other)))
    })?;

    if item.id().is_none() {
        return Err(RemoteError::MissingId);
    }

    Ok(item)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
