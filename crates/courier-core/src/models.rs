//! Domain models for the notification delivery pipeline.
//!
//! Covers the queue-facing shapes (`QueueEvent`, `QueueRecord`,
//! `BatchResponse`), the envelope that wraps each notification, and the
//! delivery request derived from it. Newtype identifiers keep record ids and
//! correlation ids from being mixed up in logs and reports.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{json_type_name, MalformedRecordError, Result};

/// Key holding internal tracing metadata inside an envelope's detail.
pub const META_DATA_KEY: &str = "meta_data";

/// Key holding the correlation id inside `meta_data`.
pub const CORRELATION_ID_KEY: &str = "correlation_id";

/// Queue-assigned identifier of one record in a batch.
///
/// This is the identifier reported back in `batchItemFailures`, so it is
/// kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    /// Creates a record id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Opaque identifier threaded through logs and the `x-correlation-id` header.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Value used when an envelope carries no correlation id.
    pub const UNDEFINED: &'static str = "undefined";

    /// Creates a correlation id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The placeholder id for envelopes without tracing metadata.
    pub fn undefined() -> Self {
        Self(Self::UNDEFINED.to_string())
    }

    /// Returns `true` if this is the placeholder id.
    pub fn is_undefined(&self) -> bool {
        self.0 == Self::UNDEFINED
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::undefined()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One message pulled from the queue.
///
/// The body is the serialized event-bus event; it is parsed lazily by
/// [`NotificationEnvelope::parse`] so that a malformed body fails only its own
/// record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRecord {
    /// Queue-assigned message identifier.
    #[serde(rename = "messageId")]
    pub message_id: RecordId,
    /// Raw message body.
    pub body: String,
}

impl QueueRecord {
    /// Creates a queue record.
    pub fn new(message_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self { message_id: RecordId(message_id.into()), body: body.into() }
    }
}

/// A batch of queue records handed to one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    /// Records in delivery order.
    #[serde(rename = "Records", default)]
    pub records: Vec<QueueRecord>,
}

/// Raw notification event wrapping a business payload and tracing metadata.
///
/// Only `detail` is retained; the remaining event-bus fields (`source`,
/// `detail-type`, ...) carry nothing the delivery needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEnvelope {
    detail: Map<String, Value>,
}

impl NotificationEnvelope {
    /// Parses an envelope from a record body.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if the body is not a JSON object or has
    /// no object-valued `detail`.
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| MalformedRecordError::invalid_json(e.to_string()))?;
        Self::from_value(value)
    }

    /// Builds an envelope from an already-parsed JSON value.
    ///
    /// # Errors
    ///
    /// Returns `MalformedRecordError` if the value is not an object or has no
    /// object-valued `detail`.
    pub fn from_value(value: Value) -> Result<Self> {
        let mut event = match value {
            Value::Object(event) => event,
            other => {
                return Err(MalformedRecordError::NotAnObject { found: json_type_name(&other) })
            },
        };

        match event.remove("detail") {
            Some(Value::Object(detail)) => Ok(Self { detail }),
            Some(other) => {
                Err(MalformedRecordError::DetailNotObject { found: json_type_name(&other) })
            },
            None => Err(MalformedRecordError::MissingDetail),
        }
    }

    /// Returns the envelope detail, including any tracing metadata.
    pub fn detail(&self) -> &Map<String, Value> {
        &self.detail
    }

    /// Extracts the correlation id from `detail.meta_data.correlation_id`.
    ///
    /// Strings are used verbatim, numbers and booleans by their JSON text.
    /// Anything else, or an absent field, yields `"undefined"`.
    pub fn correlation_id(&self) -> CorrelationId {
        let raw = self
            .detail
            .get(META_DATA_KEY)
            .and_then(Value::as_object)
            .and_then(|meta| meta.get(CORRELATION_ID_KEY));

        match raw {
            Some(Value::String(id)) => CorrelationId::new(id.clone()),
            Some(value @ (Value::Number(_) | Value::Bool(_))) => {
                CorrelationId::new(value.to_string())
            },
            _ => CorrelationId::undefined(),
        }
    }

    /// Splits the envelope into its correlation id and the outbound request.
    pub fn into_delivery_request(self) -> (CorrelationId, DeliveryRequest) {
        let correlation_id = self.correlation_id();
        (correlation_id, DeliveryRequest::from_payload(self.detail))
    }
}

/// JSON payload sent to the destination endpoint.
///
/// Never contains the `meta_data` key: every constructor strips it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct DeliveryRequest {
    payload: Map<String, Value>,
}

impl DeliveryRequest {
    /// Creates a request from a payload, dropping internal tracing metadata.
    pub fn from_payload(mut payload: Map<String, Value>) -> Self {
        payload.remove(META_DATA_KEY);
        Self { payload }
    }

    /// Returns the payload fields.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Returns the payload as a JSON value.
    pub fn to_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

/// API key for the destination endpoint.
///
/// `Debug` output is redacted so the key cannot leak through log fields.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wraps a secret value.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret value for use in request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Destination endpoint and credentials for one record's delivery.
///
/// Resolved fresh for every record and dropped when the record completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryTarget {
    /// Absolute URL the payload is posted to.
    pub endpoint: String,
    /// Secret sent in the `x-api-key` header.
    pub api_key: ApiKey,
}

/// Processing stage of a single record.
///
/// Records move strictly forward:
/// `Received → Parsing → ConfigResolved → Delivering → {Delivered | Failed}`.
/// `Failed` is reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordState {
    /// Record taken from the batch.
    Received,
    /// Envelope being parsed.
    Parsing,
    /// Endpoint and API key resolved.
    ConfigResolved,
    /// Delivery attempts in progress.
    Delivering,
    /// Destination accepted the payload.
    Delivered,
    /// Record must be redelivered by the queue.
    Failed,
}

impl RecordState {
    /// Returns `true` for `Delivered` and `Failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Failed)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (from, Self::Failed) => !from.is_terminal(),
            (Self::Received, Self::Parsing)
            | (Self::Parsing, Self::ConfigResolved)
            | (Self::ConfigResolved, Self::Delivering)
            | (Self::Delivering, Self::Delivered) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RecordState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Received => "RECEIVED",
            Self::Parsing => "PARSING",
            Self::ConfigResolved => "CONFIG_RESOLVED",
            Self::Delivering => "DELIVERING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Partial batch response returned to the queue integration.
///
/// Records listed here stay on the queue for redelivery; every other record of
/// the batch is acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResponse {
    /// Records that must be redelivered.
    #[serde(rename = "batchItemFailures")]
    pub batch_item_failures: Vec<BatchItemFailure>,
}

/// One entry of [`BatchResponse::batch_item_failures`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchItemFailure {
    /// Identifier of the failed record.
    #[serde(rename = "itemIdentifier")]
    pub item_identifier: RecordId,
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    proptest! {
        #[test]
        fn delivery_request_never_carries_meta_data(
            fields in prop::collection::btree_map("[a-z_]{1,12}", any::<i64>(), 0..8),
            correlation_id in prop::option::of("[a-zA-Z0-9-]{1,24}"),
        ) {
            let mut detail: Map<String, Value> =
                fields.iter().map(|(k, v)| (k.clone(), json!(v))).collect();
            if let Some(id) = &correlation_id {
                detail.insert(META_DATA_KEY.to_string(), json!({ "correlation_id": id }));
            }

            let envelope = NotificationEnvelope::from_value(json!({ "detail": detail })).unwrap();
            let (extracted, request) = envelope.into_delivery_request();

            prop_assert!(!request.payload().contains_key(META_DATA_KEY));
            match &correlation_id {
                Some(id) => prop_assert_eq!(extracted.as_str(), id.as_str()),
                None => prop_assert!(extracted.is_undefined()),
            }
            for (key, value) in &fields {
                if key != META_DATA_KEY {
                    prop_assert_eq!(request.payload().get(key), Some(&json!(value)));
                }
            }
        }
    }

    #[test]
    fn strips_meta_data_from_delivery_request() {
        let envelope = NotificationEnvelope::parse(
            r#"{"detail": {"meta_data": {"correlation_id": "abc"}, "x": 1}}"#,
        )
        .unwrap();

        let (correlation_id, request) = envelope.into_delivery_request();

        assert_eq!(correlation_id.as_str(), "abc");
        assert_eq!(request.to_value(), json!({"x": 1}));
    }

    #[test]
    fn missing_meta_data_defaults_correlation_id() {
        let envelope = NotificationEnvelope::parse(r#"{"detail": {"x": 1}}"#).unwrap();
        assert!(envelope.correlation_id().is_undefined());
        assert_eq!(envelope.correlation_id().as_str(), "undefined");
    }

    #[test]
    fn non_string_correlation_ids() {
        let numeric = NotificationEnvelope::from_value(
            json!({"detail": {"meta_data": {"correlation_id": 42}}}),
        )
        .unwrap();
        assert_eq!(numeric.correlation_id().as_str(), "42");

        let nested = NotificationEnvelope::from_value(
            json!({"detail": {"meta_data": {"correlation_id": {"id": 1}}}}),
        )
        .unwrap();
        assert!(nested.correlation_id().is_undefined());

        let bad_meta =
            NotificationEnvelope::from_value(json!({"detail": {"meta_data": "oops", "y": 2}}))
                .unwrap();
        assert!(bad_meta.correlation_id().is_undefined());
        assert_eq!(bad_meta.into_delivery_request().1.to_value(), json!({"y": 2}));
    }

    #[test]
    fn malformed_envelopes_rejected() {
        assert!(matches!(
            NotificationEnvelope::parse("not json"),
            Err(MalformedRecordError::InvalidJson { .. })
        ));
        assert_eq!(
            NotificationEnvelope::parse("[1]"),
            Err(MalformedRecordError::NotAnObject { found: "array" })
        );
        assert_eq!(
            NotificationEnvelope::parse(r#"{"source": "orders"}"#),
            Err(MalformedRecordError::MissingDetail)
        );
        assert_eq!(
            NotificationEnvelope::parse(r#"{"detail": "text"}"#),
            Err(MalformedRecordError::DetailNotObject { found: "string" })
        );
    }

    #[test]
    fn queue_event_uses_wire_field_names() {
        let event: QueueEvent = serde_json::from_value(json!({
            "Records": [{"messageId": "m-1", "body": "{}", "receiptHandle": "ignored"}]
        }))
        .unwrap();

        assert_eq!(event.records.len(), 1);
        assert_eq!(event.records[0].message_id, RecordId::from("m-1"));
    }

    #[test]
    fn batch_response_wire_format() {
        let response = BatchResponse {
            batch_item_failures: vec![BatchItemFailure { item_identifier: RecordId::from("m-2") }],
        };

        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"batchItemFailures": [{"itemIdentifier": "m-2"}]})
        );
    }

    #[test]
    fn record_state_transitions() {
        use RecordState::*;

        assert!(Received.can_transition_to(Parsing));
        assert!(Parsing.can_transition_to(ConfigResolved));
        assert!(ConfigResolved.can_transition_to(Delivering));
        assert!(Delivering.can_transition_to(Delivered));
        assert!(Parsing.can_transition_to(Failed));

        assert!(!Received.can_transition_to(Delivering));
        assert!(!Delivered.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Parsing));
        assert_eq!(ConfigResolved.to_string(), "CONFIG_RESOLVED");
    }

    #[test]
    fn api_key_debug_is_redacted() {
        let target = DeliveryTarget {
            endpoint: "https://example.com".to_string(),
            api_key: ApiKey::new("super-secret"),
        };

        let rendered = format!("{target:?}");
        assert!(!rendered.contains("super-secret"));
        assert_eq!(target.api_key.expose(), "super-secret");
    }
}
