//! HTTP client performing single delivery attempts.
//!
//! One call to [`DeliveryClient::post`] is one application-level attempt. The
//! client itself retries only connection establishment, a small number of
//! times and without delay. That transport tier is separate from the
//! application retry policy in [`crate::retry`].

use std::{future::Future, pin::Pin, time::Duration};

use bytes::Bytes;
use courier_core::{CorrelationId, DeliveryRequest, DeliveryTarget};
use reqwest::{Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::HttpDeliveryError;

/// Header carrying the destination API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Header carrying the record's correlation id.
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

const MAX_ERROR_BODY_CHARS: usize = 256;

/// Configuration for the delivery HTTP transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Maximum time to establish a connection.
    pub connect_timeout: Duration,
    /// Maximum time for a whole request, including the response body.
    pub request_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
    /// Total connection attempts per delivery attempt (1 disables transport
    /// retries).
    pub transport_max_attempts: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(30),
            user_agent: concat!("Courier-Delivery/", env!("CARGO_PKG_VERSION")).to_string(),
            transport_max_attempts: 2,
        }
    }
}

/// Performs one delivery attempt of a request to a target.
///
/// Implemented by [`DeliveryClient`] for real HTTP and by test doubles. The
/// batch processor only depends on this trait.
pub trait DeliveryTransport: Send + Sync {
    /// Posts `request` to `target`, returning the JSON response body.
    ///
    /// # Errors
    ///
    /// Returns `HttpDeliveryError` for transport failures and non-2xx
    /// responses.
    fn deliver<'a>(
        &'a self,
        target: &'a DeliveryTarget,
        correlation_id: &'a CorrelationId,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HttpDeliveryError>> + Send + 'a>>;
}

/// HTTP delivery client.
///
/// Wraps a pooled `reqwest::Client`; cloning is cheap and clones share the
/// connection pool, so one client serves every record of an invocation.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DeliveryClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the TLS backend or resolver cannot be
    /// initialized.
    pub fn new(config: ClientConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    ///
    /// # Errors
    ///
    /// Returns the builder error if the HTTP client cannot be initialized.
    pub fn with_defaults() -> Result<Self, reqwest::Error> {
        Self::new(ClientConfig::default())
    }

    /// Returns the client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Posts the request as JSON with the API key and correlation headers.
    ///
    /// Logs the response status (or transport error) before returning. A 2xx
    /// response body must be JSON and is returned whole; 204 No Content yields
    /// `null`.
    ///
    /// # Errors
    ///
    /// Returns `HttpDeliveryError` with the status code for non-2xx responses
    /// and for 2xx responses whose body is not JSON, and without one for
    /// connect failures, timeouts and other transport errors.
    pub async fn post(
        &self,
        target: &DeliveryTarget,
        correlation_id: &CorrelationId,
        request: &DeliveryRequest,
    ) -> Result<Value, HttpDeliveryError> {
        let span = info_span!("delivery_request", endpoint = %target.endpoint);

        async move {
            let body = serde_json::to_vec(request).map(Bytes::from).map_err(|e| {
                HttpDeliveryError::request(format!("failed to encode payload: {e}"))
            })?;

            let start_time = std::time::Instant::now();
            let response = self.send(target, correlation_id, body).await?;
            let status = response.status();
            let status_code = status.as_u16();

            info!(
                status_code,
                duration_ms = start_time.elapsed().as_millis(),
                "delivery response received"
            );

            if !status.is_success() {
                let text = read_error_body(response).await;
                return Err(HttpDeliveryError::status(status_code, failure_message(status, &text)));
            }

            if status == StatusCode::NO_CONTENT {
                return Ok(Value::Null);
            }

            let body = response.bytes().await.map_err(|e| {
                warn!(error = %e, "failed to read response body");
                classify_transport_error(&e)
            })?;
            decode_success_body(status_code, &body)
        }
        .instrument(span)
        .await
    }

    /// Sends the request, repeating only connection failures up to the
    /// transport attempt limit.
    async fn send(
        &self,
        target: &DeliveryTarget,
        correlation_id: &CorrelationId,
        body: Bytes,
    ) -> Result<Response, HttpDeliveryError> {
        let max_attempts = self.config.transport_max_attempts.max(1);
        let mut transport_attempt = 1;

        loop {
            let result = self
                .client
                .post(&target.endpoint)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .header(API_KEY_HEADER, target.api_key.expose())
                .header(CORRELATION_ID_HEADER, correlation_id.as_str())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && transport_attempt < max_attempts => {
                    debug!(transport_attempt, error = %e, "connection failed, retrying transport");
                    transport_attempt += 1;
                },
                Err(e) => {
                    warn!(transport_attempt, error = %e, "delivery request failed");
                    return Err(classify_transport_error(&e));
                },
            }
        }
    }
}

impl DeliveryTransport for DeliveryClient {
    fn deliver<'a>(
        &'a self,
        target: &'a DeliveryTarget,
        correlation_id: &'a CorrelationId,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HttpDeliveryError>> + Send + 'a>> {
        Box::pin(self.post(target, correlation_id, request))
    }
}

fn classify_transport_error(error: &reqwest::Error) -> HttpDeliveryError {
    if error.is_timeout() {
        HttpDeliveryError::timeout(error.to_string())
    } else if error.is_connect() {
        HttpDeliveryError::connect(error.to_string())
    } else {
        HttpDeliveryError::request(error.to_string())
    }
}

async fn read_error_body(response: Response) -> String {
    match response.bytes().await {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => {
            warn!(error = %e, "failed to read error response body");
            String::new()
        },
    }
}

fn decode_success_body(status_code: u16, body: &[u8]) -> Result<Value, HttpDeliveryError> {
    serde_json::from_slice(body).map_err(|e| {
        warn!(status_code, size = body.len(), error = %e, "response body is not JSON");
        HttpDeliveryError::invalid_body(status_code, format!("response body is not JSON: {e}"))
    })
}

fn failure_message(status: StatusCode, body: &str) -> String {
    let reason = status.canonical_reason().unwrap_or("Unexpected Status");
    let body = body.trim();

    if body.is_empty() {
        return reason.to_string();
    }

    let excerpt: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
    format!("{reason}: {excerpt}")
}
