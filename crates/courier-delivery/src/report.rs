//! Per-record outcomes and the aggregated batch report.

use chrono::{DateTime, Utc};
use courier_core::{BatchItemFailure, BatchResponse, CorrelationId, RecordId, RecordState};
use serde_json::Value;

use crate::error::RecordError;

/// Result of processing one record.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    /// The destination accepted the payload; carries its response body.
    Success(Value),
    /// The record must be redelivered by the queue.
    Failure {
        /// Cause of the failure.
        error: RecordError,
        /// Whether queue-level redelivery could succeed.
        is_retryable: bool,
    },
}

impl DeliveryOutcome {
    /// Creates a failure outcome, deriving retryability from the error.
    pub fn failure(error: RecordError) -> Self {
        let is_retryable = error.is_retryable();
        Self::Failure { error, is_retryable }
    }

    /// Returns `true` for [`DeliveryOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Response body of a successful delivery.
    pub fn response(&self) -> Option<&Value> {
        match self {
            Self::Success(body) => Some(body),
            Self::Failure { .. } => None,
        }
    }

    /// Error of a failed record.
    pub fn error(&self) -> Option<&RecordError> {
        match self {
            Self::Success(_) => None,
            Self::Failure { error, .. } => Some(error),
        }
    }
}

impl From<Result<Value, RecordError>> for DeliveryOutcome {
    fn from(result: Result<Value, RecordError>) -> Self {
        match result {
            Ok(body) => Self::Success(body),
            Err(error) => Self::failure(error),
        }
    }
}

/// Everything known about one processed record.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordReport {
    /// Queue identifier of the record.
    pub record_id: RecordId,
    /// Correlation id used in headers and logs (`undefined` if the envelope
    /// could not be parsed).
    pub correlation_id: CorrelationId,
    /// Terminal state: `Delivered` or `Failed`.
    pub state: RecordState,
    /// Last non-terminal state reached before completion.
    pub last_stage: RecordState,
    /// Delivery attempts made (zero if the record failed before delivering).
    pub attempts: u32,
    /// Outcome of the record.
    pub outcome: DeliveryOutcome,
    /// When processing of the record finished.
    pub completed_at: DateTime<Utc>,
}

/// Outcomes of every record in a batch, in input order.
///
/// Holds exactly one entry per input record, even if the queue repeated an
/// identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    records: Vec<RecordReport>,
}

impl BatchReport {
    /// Creates an empty report with room for `capacity` records.
    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: Vec::with_capacity(capacity) }
    }

    pub(crate) fn push(&mut self, report: RecordReport) {
        self.records.push(report);
    }

    /// Number of records in the report.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterates over all record reports in input order.
    pub fn iter(&self) -> std::slice::Iter<'_, RecordReport> {
        self.records.iter()
    }

    /// Outcome of the first record with the given identifier.
    pub fn get(&self, record_id: &RecordId) -> Option<&DeliveryOutcome> {
        self.records.iter().find(|r| &r.record_id == record_id).map(|r| &r.outcome)
    }

    /// Records that were delivered.
    pub fn delivered(&self) -> impl Iterator<Item = &RecordReport> {
        self.records.iter().filter(|r| r.outcome.is_success())
    }

    /// Records that must be redelivered.
    pub fn failed(&self) -> impl Iterator<Item = &RecordReport> {
        self.records.iter().filter(|r| !r.outcome.is_success())
    }

    /// Number of delivered records.
    pub fn delivered_count(&self) -> usize {
        self.delivered().count()
    }

    /// Number of failed records.
    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    /// Builds the partial batch response for the queue integration.
    ///
    /// Every failed record is listed, including malformed ones, so that the
    /// queue's redrive policy can move them aside. Delivered records are
    /// omitted and therefore acknowledged.
    pub fn to_batch_response(&self) -> BatchResponse {
        BatchResponse {
            batch_item_failures: self
                .failed()
                .map(|r| BatchItemFailure { item_identifier: r.record_id.clone() })
                .collect(),
        }
    }
}

impl<'a> IntoIterator for &'a BatchReport {
    type Item = &'a RecordReport;
    type IntoIter = std::slice::Iter<'a, RecordReport>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
