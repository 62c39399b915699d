//! Serialized guest events delivered to the host

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// A JSON-serialized event produced by the guest.
///
/// The worker never interprets the payload; the schema belongs to the guest
/// runtime. Helpers exist for hosts that do want to decode it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationMessage(String);

impl OperationMessage {
    /// Wrap text the guest already serialized
    pub fn from_raw(json: impl Into<String>) -> Self {
        Self(json.into())
    }

    pub fn serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_string(value).map(Self)
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_str(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for OperationMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    #[test]
    fn test_raw_text_is_not_reencoded() {
        let raw = r#"{"op":"cell-op","data":{"cell_id":"Hbol"}}"#;
        let message = OperationMessage::from_raw(raw);
        assert_eq!(message.as_str(), raw);
        assert!(message
            .decode::<Value>()
            .is_ok_and(|v| v["data"]["cell_id"] == "Hbol"));
    }

    #[test]
    fn test_serialize_produces_json_text() {
        let message = OperationMessage::serialize(&json!({"op": "kernel-ready"}));
        assert!(message.is_ok_and(|m| m.to_string() == r#"{"op":"kernel-ready"}"#));
    }
}
