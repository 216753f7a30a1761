//! Item identifiers.
//!
//! A record carries a locally generated numeric id until the remote store
//! confirms it and hands back its own id, which may be a number or a string.
//! Ids from both worlds are compared loosely: `7` and `"7"` are the same id.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Largest integer an f64 represents exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

/// Bits of the last local id handed out, for monotonicity
static LAST_LOCAL_ID: AtomicU64 = AtomicU64::new(0);

/// Identifier of a pending record or confirmed item
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemId {
    /// Numeric id (locally generated ids are always numeric)
    Number(f64),

    /// Server-assigned string id
    Text(String),
}

impl ItemId {
    /// Read an id out of a JSON value.
    ///
    /// Returns `None` for values the id field treats as "unset": missing,
    /// null, `false`, `0` and the empty string.
    ///
    /// Values that cannot serve as an id at all (`true`, arrays, objects) are
    /// unset as well, so a record carrying one gets a fresh local id.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().filter(|f| *f != 0.0).map(ItemId::Number),
            Value::String(s) if !s.is_empty() => Some(ItemId::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert back into a JSON value (integral numbers stay integers)
    pub fn to_value(&self) -> Value {
        match self {
            ItemId::Number(f) if is_safe_integer(*f) => Value::from(*f as i64),
            ItemId::Number(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ItemId::Text(s) => Value::String(s.clone()),
        }
    }

    /// Numeric view of the id, if it has one
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ItemId::Number(f) => Some(*f),
            ItemId::Text(s) => parse_numeric(s),
        }
    }

    /// Canonical storage key.
    ///
    /// Loosely equal ids map to the same key, so `"7"` and `7` address the
    /// same row in keyed storage.
    pub fn key(&self) -> String {
        match self.as_f64() {
            Some(f) => format_number(f),
            None => match self {
                ItemId::Text(s) => s.clone(),
                ItemId::Number(f) => format_number(*f),
            },
        }
    }

    /// Loose equality: numbers compare numerically, numeric-looking text
    /// compares against numbers by value, other text compares exactly.
    pub fn loosely_eq(&self, other: &ItemId) -> bool {
        match (self, other) {
            (ItemId::Text(a), ItemId::Text(b)) => a == b,
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl PartialEq for ItemId {
    fn eq(&self, other: &Self) -> bool {
        self.loosely_eq(other)
    }
}

impl From<f64> for ItemId {
    fn from(value: f64) -> Self {
        ItemId::Number(value)
    }
}

impl From<i64> for ItemId {
    fn from(value: i64) -> Self {
        ItemId::Number(value as f64)
    }
}

impl From<&str> for ItemId {
    fn from(value: &str) -> Self {
        ItemId::Text(value.to_string())
    }
}

impl From<String> for ItemId {
    fn from(value: String) -> Self {
        ItemId::Text(value)
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ItemId::Number(n) => write!(f, "{}", format_number(*n)),
            ItemId::Text(s) => write!(f, "{}", s),
        }
    }
}

/// Generate a local id: current time in milliseconds plus a random fraction.
///
/// Successive calls within one process are strictly increasing, so two ids
/// minted in the same millisecond never collide.
pub fn generate_local_id() -> f64 {
    let now = Utc::now().timestamp_millis() as f64;
    let random_bits = (Uuid::new_v4().as_u128() >> 80) as u64;
    let fraction = random_bits as f64 / (1u64 << 48) as f64;
    let candidate = now + fraction;

    let mut last = LAST_LOCAL_ID.load(Ordering::Acquire);
    loop {
        let previous = f64::from_bits(last);
        let next = if candidate > previous {
            candidate
        } else {
            // Smallest f64 above `previous` (positive, finite)
            f64::from_bits(previous.to_bits() + 1)
        };

        match LAST_LOCAL_ID.compare_exchange_weak(
            last,
            next.to_bits(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => return next,
            Err(actual) => last = actual,
        }
    }
}

fn is_safe_integer(f: f64) -> bool {
    f.fract() == 0.0 && f.abs() < MAX_SAFE_INTEGER
}

fn parse_numeric(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn format_number(f: f64) -> String {
    if is_safe_integer(f) {
        format!("{}", f as i64)
    } else {
        format!("{}", f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_loose_equality() {
        assert_eq!(ItemId::from(7i64), ItemId::from("7"));
        assert_eq!(ItemId::from("7.5"), ItemId::from(7.5));
        assert_ne!(ItemId::from("abc"), ItemId::from(7i64));
        assert_ne!(ItemId::from("07"), ItemId::from("7"));
    }

    #[test]
    fn test_canonical_key() {
        assert_eq!(ItemId::from(7i64).key(), "7");
        assert_eq!(ItemId::from("7").key(), "7");
        assert_eq!(ItemId::from(" 7.0 ").key(), "7");
        assert_eq!(ItemId::from("post-1").key(), "post-1");
    }

    #[test]
    fn test_unset_ids() {
        assert!(ItemId::from_value(&json!(null)).is_none());
        assert!(ItemId::from_value(&json!(0)).is_none());
        assert!(ItemId::from_value(&json!("")).is_none());
        assert!(ItemId::from_value(&json!(false)).is_none());
        assert!(ItemId::from_value(&json!(12)).is_some());

        // Not representable as an id
        assert!(ItemId::from_value(&json!(true)).is_none());
        assert!(ItemId::from_value(&json!([1])).is_none());
        assert!(ItemId::from_value(&json!({"id": 1})).is_none());
    }

    #[test]
    fn test_integral_ids_serialize_as_integers() {
        assert_eq!(ItemId::from(7i64).to_value(), json!(7));
        assert_eq!(ItemId::from(7.25).to_value(), json!(7.25));
    }

    #[test]
    fn test_local_ids_are_time_based_and_distinct() {
        let before = Utc::now().timestamp_millis() as f64;
        let a = generate_local_id();
        let b = generate_local_id();

        assert!(a >= before);
        assert!(b > a);
        assert!(a - before < 60_000.0);
    }
}
