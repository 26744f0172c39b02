//! HTTP mocking utilities for delivery testing.

use std::collections::HashMap;

use http::{HeaderMap, StatusCode};
use serde_json::Value;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer as WiremockServer, ResponseTemplate,
};

/// HTTP mock server standing in for the destination endpoint.
pub struct MockServer {
    server: WiremockServer,
}

impl MockServer {
    /// Starts a new mock server on a random port.
    pub async fn start() -> Self {
        Self { server: WiremockServer::start().await }
    }

    /// Returns the base URL of the mock server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Returns the absolute URL of `path` on this server.
    pub fn endpoint_url(&self, path: &str) -> String {
        format!("{}{path}", self.server.uri())
    }

    /// Configures an endpoint to return a specific response.
    pub async fn mock_endpoint(&self, endpoint: MockEndpoint) {
        let mut mock = Mock::given(method("POST")).and(path(endpoint.path.clone()));

        for (key, value) in &endpoint.expected_headers {
            mock = mock.and(header(key.as_str(), value.as_str()));
        }

        let mock = mock.respond_with(endpoint.response.into_template());
        match endpoint.times {
            Some(times) => mock.up_to_n_times(times).mount(&self.server).await,
            None => mock.mount(&self.server).await,
        }
    }

    /// Fails the first `failures` requests to `path` with `status`, then
    /// answers `200` with `body`.
    pub async fn mock_failures_then_success(
        &self,
        path: &str,
        failures: u64,
        status: StatusCode,
        body: Value,
    ) {
        if failures > 0 {
            self.mock_endpoint(MockEndpoint::failure(path, status).times(failures)).await;
        }
        self.mock_endpoint(MockEndpoint::json(path, body)).await;
    }

    /// Returns all requests received by the server, in arrival order.
    pub async fn received_requests(&self) -> Vec<RecordedRequest> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|request| RecordedRequest {
                method: request.method.to_string(),
                path: request.url.path().to_string(),
                headers: request.headers,
                body: request.body,
            })
            .collect()
    }

    /// Asserts that exactly `expected` requests were received.
    pub async fn assert_request_count(&self, expected: usize) {
        let requests = self.received_requests().await;
        assert_eq!(
            requests.len(),
            expected,
            "Expected {} requests, received {}",
            expected,
            requests.len()
        );
    }
}

/// Configuration for a mock endpoint.
pub struct MockEndpoint {
    /// Request path to match.
    pub path: String,
    /// Headers the request must carry.
    pub expected_headers: HashMap<String, String>,
    /// Response to return.
    pub response: MockResponse,
    /// Number of matches before the mock stops responding.
    pub times: Option<u64>,
}

impl MockEndpoint {
    /// Creates a mock endpoint that answers `204 No Content`.
    pub fn success(path: impl Into<String>) -> Self {
        Self::with_response(
            path,
            MockResponse::Success { status: StatusCode::NO_CONTENT, body: String::new() },
        )
    }

    /// Creates a mock endpoint that answers `200` with a JSON body.
    pub fn json(path: impl Into<String>, body: Value) -> Self {
        Self::with_response(
            path,
            MockResponse::Success { status: StatusCode::OK, body: body.to_string() },
        )
    }

    /// Creates a mock endpoint that returns a failure status.
    pub fn failure(path: impl Into<String>, status: StatusCode) -> Self {
        Self::with_response(path, MockResponse::Failure { status, body: String::new() })
    }

    /// Creates a mock endpoint that answers `200` with a raw, non-JSON body.
    pub fn text(path: impl Into<String>, body: impl Into<String>) -> Self {
        Self::with_response(
            path,
            MockResponse::Success { status: StatusCode::OK, body: body.into() },
        )
    }

    fn with_response(path: impl Into<String>, response: MockResponse) -> Self {
        Self { path: path.into(), expected_headers: HashMap::new(), response, times: None }
    }

    /// Adds an expected header to the mock.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.expected_headers.insert(key.into(), value.into());
        self
    }

    /// Sets the response body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        match &mut self.response {
            MockResponse::Success { body: current, .. }
            | MockResponse::Failure { body: current, .. } => *current = body.into(),
        }
        self
    }

    /// Limits the mock to the first `times` matching requests.
    #[must_use]
    pub fn times(mut self, times: u64) -> Self {
        self.times = Some(times);
        self
    }
}

/// Types of mock responses.
pub enum MockResponse {
    /// A 2xx response with a body.
    Success {
        /// Status code.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },
    /// A non-2xx response with a body.
    Failure {
        /// Status code.
        status: StatusCode,
        /// Raw response body.
        body: String,
    },
}

impl MockResponse {
    fn into_template(self) -> ResponseTemplate {
        match self {
            Self::Success { status, body } | Self::Failure { status, body } => {
                ResponseTemplate::new(status.as_u16()).set_body_string(body)
            },
        }
    }
}

/// A recorded HTTP request.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method.
    pub method: String,
    /// Request path.
    pub path: String,
    /// Request headers.
    pub headers: HeaderMap,
    /// Raw request body.
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// Returns a header value as a string.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Parses the body as JSON.
    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// HTTP assertions for delivery testing.
pub mod assertions {
    use super::*;

    /// Asserts that a request contains the expected header.
    pub fn assert_header_present(request: &RecordedRequest, key: &str, value: &str) {
        let header_value =
            request.header(key).unwrap_or_else(|| panic!("Header '{}' not present", key));

        assert_eq!(header_value, value, "Header '{}' has unexpected value", key);
    }

    /// Asserts that the request body matches expected JSON.
    pub fn assert_json_body(request: &RecordedRequest, expected: &Value) {
        let actual = request.json().unwrap_or_else(|| panic!("Request body is not JSON"));

        assert_eq!(actual, *expected, "Request body does not match expected JSON");
    }
}
