//! Test infrastructure for the courier delivery pipeline.
//!
//! Provides fixture builders for envelopes and batches, a wiremock-backed
//! destination endpoint, and a scripted transport for processor tests that
//! need no network.

#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::panic)]

pub mod fixtures;
pub mod http;
pub mod transport;

pub use courier_core::{Clock, TestClock};
pub use fixtures::{parameter_store, BatchBuilder, EnvelopeBuilder, TEST_API_KEY};
pub use http::{MockEndpoint, MockResponse, MockServer, RecordedRequest};
pub use transport::{DeliveryCall, ScriptedTransport};
