//! Reliable notification delivery for queue-fed batches.
//!
//! This crate forwards notification envelopes received from a message queue
//! to a configured HTTP endpoint. Records are processed one at a time and
//! each one is reported delivered or failed, so the queue redelivers only the
//! records that did not make it.
//!
//! # Architecture
//!
//! Each record goes through the same pipeline:
//!
//! 1. **Parse** - Decode the envelope and extract the correlation id
//! 2. **Resolve** - Look up the endpoint URL and API key from the
//!    [`ParameterStore`]
//! 3. **Deliver** - POST the stripped payload, retrying per [`RetryPolicy`]
//! 4. **Report** - Record the outcome in the [`BatchReport`]
//!
//! # Retry tiers
//!
//! - **Transport** - [`DeliveryClient`] retries connection failures without
//!   delay, bounded by [`ClientConfig::transport_max_attempts`]
//! - **Application** - [`RetryPolicy`] retries failed attempts after a flat
//!   delay plus uniform jitter
//! - **Queue** - records listed in the batch response are redelivered
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use courier_core::{QueueEvent, RealClock};
//! use courier_delivery::{BatchProcessor, DeliveryClient, EnvParameterStore, ProcessorConfig};
//!
//! # async fn example(event: QueueEvent) -> Result<(), reqwest::Error> {
//! let processor = BatchProcessor::new(
//!     Arc::new(DeliveryClient::with_defaults()?),
//!     Arc::new(EnvParameterStore::new()),
//!     ProcessorConfig::default(),
//!     Arc::new(RealClock::new()),
//! );
//!
//! let report = processor.process_event(&event).await;
//! println!("{} of {} delivered", report.delivered_count(), report.len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod error;
pub mod params;
pub mod processor;
pub mod report;
pub mod retry;

pub use client::{ClientConfig, DeliveryClient, DeliveryTransport};
pub use error::{ConfigError, ErrorCategory, HttpDeliveryError, RecordError, Result};
pub use params::{EnvParameterStore, InMemoryParameterStore, ParameterStore, TargetResolver};
pub use processor::{BatchProcessor, ProcessorConfig};
pub use report::{BatchReport, DeliveryOutcome, RecordReport};
pub use retry::{AttemptOutcome, RetryOn, RetryPolicy, RetryRun};
