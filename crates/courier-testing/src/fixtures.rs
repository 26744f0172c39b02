//! Test data builders for queue records and notification envelopes.
//!
//! Builders produce the wire shapes the pipeline consumes: an event-bus
//! envelope serialized into a queue record body, and a queue event holding a
//! batch of such records.

use courier_core::{QueueEvent, QueueRecord};
use courier_delivery::{
    processor::{DEFAULT_API_KEY_PARAMETER, DEFAULT_ENDPOINT_PARAMETER},
    InMemoryParameterStore,
};
use serde_json::{json, Map, Value};

/// API key stored by [`parameter_store`].
pub const TEST_API_KEY: &str = "test-api-key";

/// Builder for notification envelopes.
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    detail: Map<String, Value>,
    meta_data: Option<Value>,
}

impl Default for EnvelopeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvelopeBuilder {
    /// Creates an envelope with an empty `detail` and no metadata.
    pub fn new() -> Self {
        Self { detail: Map::new(), meta_data: None }
    }

    /// Creates an envelope with an order payload and a correlation id.
    pub fn with_defaults() -> Self {
        Self::new()
            .field("order_id", json!("ord-1001"))
            .field("amount", json!(42))
            .correlation_id("corr-1001")
    }

    /// Adds a business field to `detail`.
    #[must_use]
    pub fn field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.detail.insert(key.into(), value);
        self
    }

    /// Sets `detail.meta_data.correlation_id` to a string.
    #[must_use]
    pub fn correlation_id(self, id: impl Into<String>) -> Self {
        self.meta_data(json!({ "correlation_id": id.into() }))
    }

    /// Sets `detail.meta_data` to an arbitrary value.
    #[must_use]
    pub fn meta_data(mut self, meta_data: Value) -> Self {
        self.meta_data = Some(meta_data);
        self
    }

    /// Payload the destination should receive: `detail` without metadata.
    pub fn expected_payload(&self) -> Value {
        Value::Object(self.detail.clone())
    }

    /// Builds the envelope JSON.
    pub fn build(&self) -> Value {
        let mut detail = self.detail.clone();
        if let Some(meta_data) = &self.meta_data {
            detail.insert("meta_data".to_string(), meta_data.clone());
        }

        json!({
            "version": "0",
            "source": "courier.tests",
            "detail-type": "notification",
            "detail": detail,
        })
    }

    /// Builds a queue record whose body is this envelope.
    pub fn into_record(self, message_id: impl Into<String>) -> QueueRecord {
        QueueRecord::new(message_id, self.build().to_string())
    }
}

/// Builder for queue batches.
#[derive(Debug, Clone, Default)]
pub struct BatchBuilder {
    records: Vec<QueueRecord>,
}

impl BatchBuilder {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a record carrying `envelope`, with id `msg-<position>`.
    #[must_use]
    pub fn envelope(self, envelope: EnvelopeBuilder) -> Self {
        let id = format!("msg-{}", self.records.len() + 1);
        self.record(envelope.into_record(id))
    }

    /// Appends a record with a raw body, with id `msg-<position>`.
    #[must_use]
    pub fn raw(self, body: impl Into<String>) -> Self {
        let id = format!("msg-{}", self.records.len() + 1);
        self.record(QueueRecord::new(id, body))
    }

    /// Appends a prebuilt record.
    #[must_use]
    pub fn record(mut self, record: QueueRecord) -> Self {
        self.records.push(record);
        self
    }

    /// Appends `count` default envelopes, each with its own correlation id.
    #[must_use]
    pub fn envelopes(mut self, count: usize) -> Self {
        for _ in 0..count {
            let n = self.records.len() + 1;
            let envelope = EnvelopeBuilder::new()
                .field("sequence", json!(n))
                .correlation_id(format!("corr-{n}"));
            self = self.envelope(envelope);
        }
        self
    }

    /// Builds the queue event.
    pub fn build(self) -> QueueEvent {
        QueueEvent { records: self.records }
    }
}

/// Parameter store holding `endpoint` and [`TEST_API_KEY`] under the default
/// parameter paths.
pub fn parameter_store(endpoint: impl Into<String>) -> InMemoryParameterStore {
    let store = InMemoryParameterStore::new();
    store.set_parameter(DEFAULT_ENDPOINT_PARAMETER, endpoint);
    store.set_secret(DEFAULT_API_KEY_PARAMETER, TEST_API_KEY);
    store
}

#[cfg(test)]
mod tests {
    use courier_core::NotificationEnvelope;

    use super::*;

    #[test]
    fn envelope_round_trips_through_record() {
        let builder = EnvelopeBuilder::with_defaults();
        let expected = builder.expected_payload();
        let record = builder.into_record("m-1");

        let envelope = NotificationEnvelope::parse(&record.body).unwrap();
        assert_eq!(envelope.correlation_id().as_str(), "corr-1001");

        let (_, request) = envelope.into_delivery_request();
        assert_eq!(request.to_value(), expected);
    }

    #[test]
    fn batch_assigns_positional_ids() {
        let event = BatchBuilder::new().envelopes(2).raw("not json").build();
        let ids: Vec<_> = event.records.iter().map(|r| r.message_id.as_str()).collect();

        assert_eq!(ids, vec!["msg-1", "msg-2", "msg-3"]);
    }
}
