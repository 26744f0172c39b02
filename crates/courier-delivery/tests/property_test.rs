//! Property-based tests for batch processing invariants.
//!
//! Uses the scripted transport so that arbitrary batches can be processed
//! without a network: every input record yields exactly one report entry,
//! delivered payloads never carry tracing metadata, and the batch response
//! lists exactly the failed records.

#![allow(clippy::unwrap_used)]

use std::{collections::HashSet, sync::Arc};

use courier_delivery::{BatchProcessor, HttpDeliveryError, ProcessorConfig, RetryPolicy};
use courier_testing::{
    fixtures::parameter_store, BatchBuilder, EnvelopeBuilder, ScriptedTransport, TestClock,
};
use proptest::prelude::*;
use serde_json::{json, Value};

/// One generated record: a valid envelope or a malformed body.
#[derive(Debug, Clone)]
enum GeneratedRecord {
    Envelope { fields: Vec<(String, i64)>, correlation_id: Option<String> },
    Malformed(String),
}

fn record_strategy() -> impl Strategy<Value = GeneratedRecord> {
    prop_oneof![
        4 => (
            prop::collection::vec(("[a-z]{1,8}", any::<i64>()), 0..5),
            prop::option::of("[a-zA-Z0-9-]{1,16}"),
        )
            .prop_map(|(fields, correlation_id)| GeneratedRecord::Envelope {
                fields,
                correlation_id
            }),
        1 => prop_oneof![
            Just("not json".to_string()),
            Just("[]".to_string()),
            Just(r#"{"source": "orders"}"#.to_string()),
            Just(r#"{"detail": 7}"#.to_string()),
        ]
        .prop_map(GeneratedRecord::Malformed),
    ]
}

fn build_batch(records: &[GeneratedRecord]) -> BatchBuilder {
    records.iter().fold(BatchBuilder::new(), |batch, record| match record {
        GeneratedRecord::Envelope { fields, correlation_id } => {
            let mut envelope = fields
                .iter()
                .fold(EnvelopeBuilder::new(), |env, (key, value)| env.field(key, json!(value)));
            if let Some(id) = correlation_id {
                envelope = envelope.correlation_id(id);
            }
            batch.envelope(envelope)
        },
        GeneratedRecord::Malformed(body) => batch.raw(body),
    })
}

fn processor(transport: &ScriptedTransport) -> BatchProcessor {
    let config = ProcessorConfig {
        retry_policy: RetryPolicy { max_attempts: 2, ..Default::default() },
        ..Default::default()
    };

    BatchProcessor::new(
        Arc::new(transport.clone()),
        Arc::new(parameter_store("https://partner.example.com/orders")),
        config,
        Arc::new(TestClock::new()),
    )
}

proptest! {
    /// Every input record produces exactly one report entry, in order.
    #[test]
    fn one_outcome_per_record(records in prop::collection::vec(record_strategy(), 0..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let event = build_batch(&records).build();
            let transport = ScriptedTransport::new();

            let report = processor(&transport).process_event(&event).await;

            prop_assert_eq!(report.len(), records.len());
            let reported: Vec<_> = report.iter().map(|r| r.record_id.clone()).collect();
            let expected: Vec<_> = event.records.iter().map(|r| r.message_id.clone()).collect();
            prop_assert_eq!(reported, expected);

            let malformed =
                records.iter().filter(|r| matches!(r, GeneratedRecord::Malformed(_))).count();
            prop_assert_eq!(report.failed_count(), malformed);
            prop_assert_eq!(transport.call_count(), records.len() - malformed);
            Ok(())
        })?;
    }

    /// Delivered payloads never contain `meta_data` and headers carry the
    /// envelope's correlation id.
    #[test]
    fn meta_data_never_forwarded(records in prop::collection::vec(record_strategy(), 1..20)) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let event = build_batch(&records).build();
            let transport = ScriptedTransport::new();

            processor(&transport).process_event(&event).await;

            let expected_ids: Vec<String> = records
                .iter()
                .filter_map(|r| match r {
                    GeneratedRecord::Envelope { correlation_id, .. } => {
                        Some(correlation_id.clone().unwrap_or_else(|| "undefined".to_string()))
                    },
                    GeneratedRecord::Malformed(_) => None,
                })
                .collect();

            let calls = transport.calls();
            for call in &calls {
                prop_assert!(call.payload.get("meta_data").is_none());
                prop_assert!(matches!(call.payload, Value::Object(_)));
            }
            let sent_ids: Vec<String> = calls.into_iter().map(|c| c.correlation_id).collect();
            prop_assert_eq!(sent_ids, expected_ids);
            Ok(())
        })?;
    }

    /// The batch response lists exactly the failed records.
    #[test]
    fn batch_response_matches_failures(
        records in prop::collection::vec(record_strategy(), 0..20),
        failing_calls in prop::collection::hash_set(1u32..40, 0..10),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let event = build_batch(&records).build();
            let failing: HashSet<u32> = failing_calls;
            let mut transport = ScriptedTransport::new();
            for call in 1..=40 {
                transport = if failing.contains(&call) {
                    transport.then(Err(HttpDeliveryError::status(500, "boom")))
                } else {
                    transport.then(Ok(json!({})))
                };
            }

            let report = processor(&transport).process_event(&event).await;

            let failed: HashSet<_> =
                report.failed().map(|r| r.record_id.as_str().to_string()).collect();
            let listed: HashSet<_> = report
                .to_batch_response()
                .batch_item_failures
                .into_iter()
                .map(|f| f.item_identifier.as_str().to_string())
                .collect();
            prop_assert_eq!(listed, failed);
            prop_assert_eq!(report.delivered_count() + report.failed_count(), records.len());
            Ok(())
        })?;
    }
}
