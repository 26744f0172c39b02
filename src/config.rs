//! Configuration for the courier runner.

use std::{collections::BTreeMap, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_delivery::{
    processor::{DEFAULT_API_KEY_PARAMETER, DEFAULT_ENDPOINT_PARAMETER},
    ClientConfig, EnvParameterStore, InMemoryParameterStore, ParameterStore, ProcessorConfig,
    RetryOn, RetryPolicy,
};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::telemetry::LogFormat;

const CONFIG_FILE: &str = "courier.toml";
const ENV_PREFIX: &str = "COURIER_";

/// Runner configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed `COURIER_` (highest priority)
/// 2. Configuration file (`courier.toml`)
/// 3. Built-in defaults (lowest priority)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Parameters
    /// Parameter path holding the endpoint URL.
    ///
    /// Environment variable: `COURIER_ENDPOINT_PARAMETER`
    pub endpoint_parameter: String,
    /// Secret path holding the API key.
    ///
    /// Environment variable: `COURIER_API_KEY_PARAMETER`
    pub api_key_parameter: String,
    /// Prefix of the environment variables parameters are read from.
    ///
    /// Environment variable: `COURIER_PARAMETER_ENV_PREFIX`
    pub parameter_env_prefix: String,
    /// Fixed parameter values by path. When non-empty, targets are resolved
    /// from this table instead of the environment.
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,

    // Retry
    /// Maximum delivery attempts per record, including the first.
    ///
    /// Environment variable: `COURIER_MAX_ATTEMPTS`
    pub max_attempts: u32,
    /// Fixed wait between attempts in milliseconds.
    ///
    /// Environment variable: `COURIER_RETRY_BASE_DELAY_MS`
    pub retry_base_delay_ms: u64,
    /// Upper bound of the random extra wait in milliseconds.
    ///
    /// Environment variable: `COURIER_RETRY_JITTER_MS`
    pub retry_jitter_ms: u64,
    /// Failures eligible for retry.
    ///
    /// Environment variable: `COURIER_RETRY_ON`
    pub retry_on: RetryOn,

    // Client
    /// Connection timeout in milliseconds.
    ///
    /// Environment variable: `COURIER_CONNECT_TIMEOUT_MS`
    pub connect_timeout_ms: u64,
    /// Whole-request timeout in seconds.
    ///
    /// Environment variable: `COURIER_REQUEST_TIMEOUT_SECONDS`
    pub request_timeout_seconds: u64,
    /// Connection attempts per delivery attempt.
    ///
    /// Environment variable: `COURIER_TRANSPORT_MAX_ATTEMPTS`
    pub transport_max_attempts: u32,

    // Invocation
    /// Time budget for one batch in seconds.
    ///
    /// Environment variable: `COURIER_INVOCATION_TIMEOUT_SECONDS`
    pub invocation_timeout_seconds: u64,
    /// File holding the queue event; stdin when absent.
    ///
    /// Environment variable: `COURIER_EVENT_FILE`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_file: Option<PathBuf>,

    // Logging
    /// Log output format.
    ///
    /// Environment variable: `COURIER_LOG_FORMAT`
    pub log_format: LogFormat,
    /// Log filter directives used when `RUST_LOG` is unset.
    ///
    /// Environment variable: `COURIER_RUST_LOG`
    pub rust_log: String,
}

impl Config {
    /// Loads configuration from defaults, `courier.toml`, and `COURIER_`
    /// environment variables.
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Converts to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_secs(self.request_timeout_seconds),
            transport_max_attempts: self.transport_max_attempts,
            ..ClientConfig::default()
        }
    }

    /// Converts to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            jitter: Duration::from_millis(self.retry_jitter_ms),
            retry_on: self.retry_on,
        }
    }

    /// Converts to processor configuration.
    pub fn to_processor_config(&self) -> ProcessorConfig {
        ProcessorConfig {
            endpoint_parameter: self.endpoint_parameter.clone(),
            api_key_parameter: self.api_key_parameter.clone(),
            retry_policy: self.to_retry_policy(),
        }
    }

    /// Time budget for processing one batch.
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_seconds)
    }

    /// Builds the parameter store targets are resolved from.
    ///
    /// Table values serve both plaintext and secret lookups.
    pub fn parameter_store(&self) -> Arc<dyn ParameterStore> {
        if self.parameters.is_empty() {
            return Arc::new(EnvParameterStore::with_prefix(self.parameter_env_prefix.clone()));
        }

        let store = InMemoryParameterStore::new();
        for (path, value) in &self.parameters {
            store.set_parameter(path.clone(), value.clone());
            store.set_secret(path.clone(), value.clone());
        }
        Arc::new(store)
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.endpoint_parameter.trim().is_empty() {
            anyhow::bail!("endpoint_parameter must not be empty");
        }

        if self.api_key_parameter.trim().is_empty() {
            anyhow::bail!("api_key_parameter must not be empty");
        }

        if self.max_attempts == 0 {
            anyhow::bail!("max_attempts must be greater than 0");
        }

        if self.transport_max_attempts == 0 {
            anyhow::bail!("transport_max_attempts must be greater than 0");
        }

        if self.connect_timeout_ms == 0 {
            anyhow::bail!("connect_timeout_ms must be greater than 0");
        }

        if self.request_timeout_seconds == 0 {
            anyhow::bail!("request_timeout_seconds must be greater than 0");
        }

        if self.invocation_timeout_seconds == 0 {
            anyhow::bail!("invocation_timeout_seconds must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        let client = ClientConfig::default();
        let retry = RetryPolicy::default();

        Self {
            endpoint_parameter: DEFAULT_ENDPOINT_PARAMETER.to_string(),
            api_key_parameter: DEFAULT_API_KEY_PARAMETER.to_string(),
            parameter_env_prefix: String::new(),
            parameters: BTreeMap::new(),
            max_attempts: retry.max_attempts,
            retry_base_delay_ms: duration_ms(retry.base_delay),
            retry_jitter_ms: duration_ms(retry.jitter),
            retry_on: retry.retry_on,
            connect_timeout_ms: duration_ms(client.connect_timeout),
            request_timeout_seconds: client.request_timeout.as_secs(),
            transport_max_attempts: client.transport_max_attempts,
            invocation_timeout_seconds: 900,
            event_file: None,
            log_format: LogFormat::Pretty,
            rust_log: "info,courier=debug".to_string(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
