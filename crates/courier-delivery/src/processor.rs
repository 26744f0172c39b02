//! Batch record processor.
//!
//! Processes the records of one queue batch sequentially. Each record moves
//! through `RECEIVED → PARSING → CONFIG_RESOLVED → DELIVERING` and ends
//! `DELIVERED` or `FAILED`. Every failure is contained at the record boundary:
//! the batch always yields one report entry per input record.
//!
//! The processor observes a [`CancellationToken`] representing the
//! invocation's time budget. Once it fires, the in-flight record is abandoned
//! and the remaining records are reported failed without being attempted, so
//! the queue redelivers all of them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_core::{
    Clock, CorrelationId, DeliveryRequest, DeliveryTarget, NotificationEnvelope, QueueEvent,
    QueueRecord, RecordState,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info, info_span, warn, Instrument, Span};

use crate::{
    client::DeliveryTransport,
    error::{ErrorCategory, HttpDeliveryError, RecordError, Result},
    params::{ParameterStore, TargetResolver},
    report::{BatchReport, DeliveryOutcome, RecordReport},
    retry::{RetryPolicy, RetryRun},
};

/// Default parameter path of the destination endpoint URL.
pub const DEFAULT_ENDPOINT_PARAMETER: &str = "/sls-observe/delivery/endpoint";

/// Default secret path of the destination API key.
pub const DEFAULT_API_KEY_PARAMETER: &str = "/sls-observe/delivery/api-key";

/// Configuration for the batch processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Parameter path holding the endpoint URL.
    pub endpoint_parameter: String,
    /// Secret path holding the API key.
    pub api_key_parameter: String,
    /// Retry policy wrapped around every delivery.
    pub retry_policy: RetryPolicy,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            endpoint_parameter: DEFAULT_ENDPOINT_PARAMETER.to_string(),
            api_key_parameter: DEFAULT_API_KEY_PARAMETER.to_string(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Processes queue batches into partial-failure reports.
///
/// All collaborators are injected: the transport performing HTTP attempts,
/// the parameter store resolving targets, and the clock used for retry waits.
pub struct BatchProcessor {
    transport: Arc<dyn DeliveryTransport>,
    resolver: TargetResolver,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

/// Mutable bookkeeping for the record currently being processed.
#[derive(Debug)]
struct RecordProgress {
    state: RecordState,
    correlation_id: CorrelationId,
    attempts: u32,
}

impl RecordProgress {
    fn new() -> Self {
        Self {
            state: RecordState::Received,
            correlation_id: CorrelationId::undefined(),
            attempts: 0,
        }
    }

    fn advance(&mut self, next: RecordState) {
        debug_assert!(self.state.can_transition_to(next), "{} -> {next}", self.state);
        debug!(from = %self.state, to = %next, "record state changed");
        self.state = next;
    }
}

impl BatchProcessor {
    /// Creates a processor from its collaborators.
    pub fn new(
        transport: Arc<dyn DeliveryTransport>,
        store: Arc<dyn ParameterStore>,
        config: ProcessorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let resolver =
            TargetResolver::new(store, config.endpoint_parameter, config.api_key_parameter);

        Self {
            transport,
            resolver,
            retry_policy: config.retry_policy,
            clock,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Replaces the cancellation token observed by the processor.
    pub fn with_cancellation_token(mut self, cancellation_token: CancellationToken) -> Self {
        self.cancellation_token = cancellation_token;
        self
    }

    /// Returns the token that abandons processing when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Processes every record of a queue event.
    pub async fn process_event(&self, event: &QueueEvent) -> BatchReport {
        self.process_batch(&event.records).await
    }

    /// Processes records sequentially and reports one outcome per record.
    ///
    /// Never fails as a whole: malformed envelopes, parameter lookup errors,
    /// exhausted deliveries and abandonment are reported against the record
    /// that caused them.
    pub async fn process_batch(&self, records: &[QueueRecord]) -> BatchReport {
        info!(batch_size = records.len(), "processing batch");

        let mut report = BatchReport::with_capacity(records.len());

        for record in records {
            let record_report = if self.cancellation_token.is_cancelled() {
                self.abandoned(record)
            } else {
                self.process_record(record).await
            };
            report.push(record_report);
        }

        info!(
            batch_size = report.len(),
            delivered = report.delivered_count(),
            failed = report.failed_count(),
            "batch processed"
        );

        report
    }

    /// Processes one record inside a span carrying its correlation id.
    async fn process_record(&self, record: &QueueRecord) -> RecordReport {
        let span = info_span!(
            "delivery_record",
            message_id = %record.message_id,
            correlation_id = field::Empty
        );

        async {
            let mut progress = RecordProgress::new();
            let result = tokio::select! {
                biased;
                () = self.cancellation_token.cancelled() => Err(RecordError::Abandoned),
                result = self.run_record(record, &mut progress) => result,
            };

            self.finish(record, progress, result)
        }
        .instrument(span)
        .await
    }

    async fn run_record(
        &self,
        record: &QueueRecord,
        progress: &mut RecordProgress,
    ) -> Result<Value> {
        let parsed = NotificationEnvelope::parse(&record.body);
        if let Ok(envelope) = &parsed {
            progress.correlation_id = envelope.correlation_id();
        }
        Span::current().record("correlation_id", progress.correlation_id.as_str());
        info!(status = "START", "processing delivery notification");

        progress.advance(RecordState::Parsing);
        let (_, request) = parsed?.into_delivery_request();

        let target = self.resolver.resolve().await?;
        progress.advance(RecordState::ConfigResolved);

        progress.advance(RecordState::Delivering);
        let correlation_id = progress.correlation_id.clone();
        let run = self.deliver_with_retry(&target, &correlation_id, &request, progress).await;

        Ok(run.result?)
    }

    /// Runs the retry policy around the transport.
    async fn deliver_with_retry(
        &self,
        target: &DeliveryTarget,
        correlation_id: &CorrelationId,
        request: &DeliveryRequest,
        progress: &mut RecordProgress,
    ) -> RetryRun<Value, HttpDeliveryError> {
        let policy = &self.retry_policy;
        let transport = self.transport.as_ref();

        policy
            .run(self.clock.as_ref(), |attempt| {
                progress.attempts = attempt;
                async move {
                    info!("trying API delivery");
                    policy.classify(transport.deliver(target, correlation_id, request).await)
                }
                .instrument(info_span!("delivery_attempt", attempt))
            })
            .await
    }

    fn finish(
        &self,
        record: &QueueRecord,
        progress: RecordProgress,
        result: Result<Value>,
    ) -> RecordReport {
        let last_stage = progress.state;

        let state = match &result {
            Ok(body) => {
                info!(
                    status = "COMPLETE",
                    attempts = progress.attempts,
                    response = %body,
                    "record delivered"
                );
                RecordState::Delivered
            },
            Err(e) => {
                error!(
                    status = "FAILED",
                    stage = %last_stage,
                    attempts = progress.attempts,
                    category = %ErrorCategory::from(e),
                    status_code = ?e.status_code(),
                    error = %e,
                    "record failed"
                );
                RecordState::Failed
            },
        };

        RecordReport {
            record_id: record.message_id.clone(),
            correlation_id: progress.correlation_id,
            state,
            last_stage,
            attempts: progress.attempts,
            outcome: DeliveryOutcome::from(result),
            completed_at: self.now(),
        }
    }

    /// Report for a record skipped because the budget was already exhausted.
    fn abandoned(&self, record: &QueueRecord) -> RecordReport {
        warn!(message_id = %record.message_id, "invocation budget exhausted, record not attempted");

        RecordReport {
            record_id: record.message_id.clone(),
            correlation_id: CorrelationId::undefined(),
            state: RecordState::Failed,
            last_stage: RecordState::Received,
            attempts: 0,
            outcome: DeliveryOutcome::failure(RecordError::Abandoned),
            completed_at: self.now(),
        }
    }

    fn now(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.clock.now_system())
    }
}
