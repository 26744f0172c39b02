//! Error types for notification delivery.
//!
//! Three failure sources are contained at the single-record boundary: HTTP
//! delivery failures, parameter lookup failures, and malformed envelopes.
//! [`RecordError`] aggregates them so the batch processor can report any of
//! them against the record that caused it.

use std::fmt;

use courier_core::MalformedRecordError;
use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T, E = RecordError> = std::result::Result<T, E>;

/// What went wrong during a single HTTP delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpFailureKind {
    /// Connection could not be established.
    Connect,
    /// Request or connect timeout elapsed.
    Timeout,
    /// Destination answered with a non-2xx status.
    Status,
    /// Request could not be built or sent for another reason.
    Request,
    /// Destination answered 2xx with a body that is not JSON.
    InvalidBody,
}

/// Failure of one HTTP delivery attempt.
///
/// Produced for transport errors, non-2xx responses and 2xx responses whose
/// body cannot be decoded. This is the only signal the retry policy inspects.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", describe_http_failure(.status_code, .message))]
pub struct HttpDeliveryError {
    /// HTTP status code, if a response was received.
    pub status_code: Option<u16>,
    /// Human-readable failure description.
    pub message: String,
    /// Failure classification.
    pub kind: HttpFailureKind,
}

impl HttpDeliveryError {
    /// Creates an error for a non-2xx response.
    pub fn status(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
            kind: HttpFailureKind::Status,
        }
    }

    /// Creates an error for a 2xx response whose body is not usable JSON.
    pub fn invalid_body(status_code: u16, message: impl Into<String>) -> Self {
        Self {
            status_code: Some(status_code),
            message: message.into(),
            kind: HttpFailureKind::InvalidBody,
        }
    }

    /// Creates an error for a failed connection.
    pub fn connect(message: impl Into<String>) -> Self {
        Self { status_code: None, message: message.into(), kind: HttpFailureKind::Connect }
    }

    /// Creates an error for an elapsed timeout.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self { status_code: None, message: message.into(), kind: HttpFailureKind::Timeout }
    }

    /// Creates an error for any other request failure.
    pub fn request(message: impl Into<String>) -> Self {
        Self { status_code: None, message: message.into(), kind: HttpFailureKind::Request }
    }

    /// Returns `true` for failures that may succeed if repeated.
    ///
    /// Transport failures, undecodable 2xx bodies, 408, 429 and 5xx are
    /// transient. Other 4xx responses are not. The default retry policy
    /// ignores this distinction.
    pub fn is_transient(&self) -> bool {
        if self.kind == HttpFailureKind::InvalidBody {
            return true;
        }

        match self.status_code {
            None => true,
            Some(code) => code == 408 || code == 429 || (500..=599).contains(&code),
        }
    }
}

fn describe_http_failure(status_code: &Option<u16>, message: &str) -> String {
    match status_code {
        Some(code) => format!("HTTP {code}: {message}"),
        None => format!("transport error: {message}"),
    }
}

/// Failure to resolve the delivery endpoint or API key.
///
/// Never retried by this crate: the record fails immediately and the queue
/// decides whether to redeliver it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// No value is stored under the path.
    #[error("parameter {path} not found")]
    NotFound {
        /// Parameter path that was looked up
        path: String,
    },

    /// The stored value is empty.
    #[error("parameter {path} is empty")]
    Empty {
        /// Parameter path that was looked up
        path: String,
    },

    /// The stored value cannot be used.
    #[error("parameter {path} has an invalid value: {message}")]
    InvalidValue {
        /// Parameter path that was looked up
        path: String,
        /// Why the value was rejected
        message: String,
    },

    /// The backing store failed.
    #[error("parameter store failed for {path}: {message}")]
    Provider {
        /// Parameter path that was looked up
        path: String,
        /// Provider error message
        message: String,
    },
}

impl ConfigError {
    /// Creates a not-found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates an empty-value error.
    pub fn empty(path: impl Into<String>) -> Self {
        Self::Empty { path: path.into() }
    }

    /// Creates an invalid-value error.
    pub fn invalid_value(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidValue { path: path.into(), message: message.into() }
    }

    /// Creates a provider error.
    pub fn provider(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider { path: path.into(), message: message.into() }
    }

    /// Returns the parameter path involved.
    pub fn path(&self) -> &str {
        match self {
            Self::NotFound { path }
            | Self::Empty { path }
            | Self::InvalidValue { path, .. }
            | Self::Provider { path, .. } => path,
        }
    }
}

/// Reason a single record could not be delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The envelope could not be interpreted.
    #[error("malformed record: {0}")]
    Malformed(#[from] MalformedRecordError),

    /// Endpoint or API key lookup failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Every delivery attempt failed; carries the last attempt's error.
    #[error("delivery failed: {0}")]
    Delivery(#[from] HttpDeliveryError),

    /// The invocation budget ran out before the record completed.
    #[error("record abandoned: invocation budget exhausted")]
    Abandoned,
}

impl RecordError {
    /// Returns `true` if queue-level redelivery could succeed.
    ///
    /// Malformed records fail identically on every redelivery.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Malformed(_))
    }

    /// HTTP status code of the last delivery attempt, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Delivery(error) => error.status_code,
            _ => None,
        }
    }
}

/// Category of record failure for log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Transport-level failure.
    Network,
    /// Delivery timed out.
    Timeout,
    /// HTTP 4xx.
    Client,
    /// HTTP 5xx or other non-2xx.
    Server,
    /// Parameter lookup failure.
    Configuration,
    /// Envelope could not be parsed.
    Malformed,
    /// Invocation budget exhausted.
    Abandoned,
}

impl From<&RecordError> for ErrorCategory {
    fn from(error: &RecordError) -> Self {
        match error {
            RecordError::Malformed(_) => Self::Malformed,
            RecordError::Config(_) => Self::Configuration,
            RecordError::Abandoned => Self::Abandoned,
            RecordError::Delivery(http) => match (http.kind, http.status_code) {
                (HttpFailureKind::Timeout, _) => Self::Timeout,
                (HttpFailureKind::InvalidBody, _) => Self::Server,
                (_, Some(400..=499)) => Self::Client,
                (_, Some(_)) => Self::Server,
                (_, None) => Self::Network,
            },
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network"),
            Self::Timeout => write!(f, "timeout"),
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
            Self::Configuration => write!(f, "configuration"),
            Self::Malformed => write!(f, "malformed"),
            Self::Abandoned => write!(f, "abandoned"),
        }
    }
}
