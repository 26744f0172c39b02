//! Core domain models for the courier delivery pipeline.
//!
//! Provides the queue record and envelope shapes, the delivery request derived
//! from an envelope, strongly-typed identifiers, and the clock abstraction.
//! The delivery crate builds on these types; nothing here performs I/O.

#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod time;

pub use error::MalformedRecordError;
pub use models::{
    ApiKey, BatchItemFailure, BatchResponse, CorrelationId, DeliveryRequest, DeliveryTarget,
    NotificationEnvelope, QueueEvent, QueueRecord, RecordId, RecordState,
};
pub use time::{Clock, RealClock, TestClock};
