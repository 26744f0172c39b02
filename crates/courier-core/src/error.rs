//! Errors raised while interpreting inbound queue records.

use thiserror::Error;

/// Result type alias for envelope parsing.
pub type Result<T> = std::result::Result<T, MalformedRecordError>;

/// An inbound record lacks the structure needed to build a delivery request.
///
/// Malformed records are never delivered. The batch processor reports them as
/// failed so the queue can redeliver them or move them to a dead-letter queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedRecordError {
    /// The record body is not valid JSON.
    #[error("record body is not valid JSON: {message}")]
    InvalidJson {
        /// Parser error message
        message: String,
    },

    /// The record body is JSON but not an object.
    #[error("record body must be a JSON object, found {found}")]
    NotAnObject {
        /// JSON type that was found instead
        found: &'static str,
    },

    /// The envelope has no `detail` field.
    #[error("envelope is missing the detail field")]
    MissingDetail,

    /// The `detail` field is present but not an object.
    #[error("envelope detail must be a JSON object, found {found}")]
    DetailNotObject {
        /// JSON type that was found instead
        found: &'static str,
    },
}

impl MalformedRecordError {
    /// Creates an invalid JSON error from a parser message.
    pub fn invalid_json(message: impl Into<String>) -> Self {
        Self::InvalidJson { message: message.into() }
    }
}

/// Returns the JSON type name of a value for error messages.
pub(crate) fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn json_type_names() {
        assert_eq!(json_type_name(&json!(null)), "null");
        assert_eq!(json_type_name(&json!([1, 2])), "array");
        assert_eq!(json_type_name(&json!("x")), "string");
        assert_eq!(json_type_name(&json!({})), "object");
    }

    #[test]
    fn error_display_format() {
        assert_eq!(
            MalformedRecordError::DetailNotObject { found: "array" }.to_string(),
            "envelope detail must be a JSON object, found array"
        );
        assert_eq!(
            MalformedRecordError::MissingDetail.to_string(),
            "envelope is missing the detail field"
        );
    }
}
