//! Opaque JSON message exchanged between the extension, host and relay.
//!
//! Messages are JSON objects carrying an `action` (browser protocol) or
//! `method` (JSON-RPC) discriminator and an optional `requestId` used for
//! correlation. Unknown fields are preserved untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name carrying the correlation id.
pub const REQUEST_ID: &str = "requestId";

/// A JSON object message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a message with the given `action`.
    pub fn with_action(action: &str) -> Self {
        let mut msg = Self::new();
        msg.insert("action", Value::from(action));
        msg
    }

    /// Build the `{success: false, error}` envelope every caller receives on failure.
    pub fn failure(error: impl std::fmt::Display) -> Self {
        let mut msg = Self::new();
        msg.insert("success", Value::Bool(false));
        msg.insert("error", Value::String(error.to_string()));
        msg
    }

    /// Convert an arbitrary JSON value; non-objects are rejected.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: Value) -> Option<Value> {
        self.0.insert(key.to_string(), value)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    pub fn action(&self) -> Option<&str> {
        self.get_str("action")
    }

    pub fn method(&self) -> Option<&str> {
        self.get_str("method")
    }

    /// The correlation id, normalised to a string.
    ///
    /// Numeric ids are accepted and rendered in decimal so that `7` and `"7"`
    /// correlate to the same pending entry.
    pub fn request_id(&self) -> Option<String> {
        match self.0.get(REQUEST_ID)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// The correlation id exactly as the sender wrote it.
    pub fn request_id_value(&self) -> Option<&Value> {
        self.0.get(REQUEST_ID).filter(|v| !v.is_null())
    }

    pub fn set_request_id(&mut self, id: impl Into<Value>) {
        self.0.insert(REQUEST_ID.to_string(), id.into());
    }

    /// Whether `success` is present and true.
    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Whether this message answers something sent earlier rather than being
    /// a fresh command: it carries a correlation id, no discriminator, and a
    /// result-like field.
    pub fn is_response(&self) -> bool {
        self.request_id().is_some()
            && self.action().is_none()
            && self.method().is_none()
            && (self.contains_key("success")
                || self.contains_key("error")
                || self.contains_key("data"))
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Message> for Value {
    fn from(msg: Message) -> Self {
        msg.into_value()
    }
}
