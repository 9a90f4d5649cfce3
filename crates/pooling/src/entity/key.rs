//! Scalar identity values used for primary and foreign keys

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A single hashable key value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl KeyValue {
    /// Convert a column value into a key. Null and non-scalar values have no key.
    ///
    /// Only the canonical lowercase hyphenated form becomes [`KeyValue::Uuid`];
    /// any other text, including hex digests and uppercase or braced UUIDs, stays
    /// [`KeyValue::Text`] so that `to_json` returns the stored text unchanged.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_i64().map(KeyValue::Int),
            Value::String(s) => match Uuid::parse_str(s) {
                Ok(uuid) if uuid.to_string() == *s => Some(KeyValue::Uuid(uuid)),
                _ => Some(KeyValue::Text(s.clone())),
            },
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Int(i) => Value::from(*i),
            KeyValue::Uuid(u) => Value::String(u.to_string()),
            KeyValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Uuid(u) => write!(f, "{}", u),
            KeyValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i64> for KeyValue {
    fn from(value: i64) -> Self {
        KeyValue::Int(value)
    }
}

impl From<i32> for KeyValue {
    fn from(value: i32) -> Self {
        KeyValue::Int(i64::from(value))
    }
}

impl From<Uuid> for KeyValue {
    fn from(value: Uuid) -> Self {
        KeyValue::Uuid(value)
    }
}

impl From<&str> for KeyValue {
    fn from(value: &str) -> Self {
        KeyValue::Text(value.to_string())
    }
}

impl From<String> for KeyValue {
    fn from(value: String) -> Self {
        KeyValue::Text(value)
    }
}

impl From<KeyValue> for Value {
    fn from(key: KeyValue) -> Self {
        key.to_json()
    }
}
