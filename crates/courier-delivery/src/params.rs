//! Parameter and secret lookup for delivery targets.
//!
//! The endpoint URL and API key live in an external key/value store and are
//! looked up by path-like keys for every record; nothing is cached between
//! records. [`ParameterStore`] is the seam; [`TargetResolver`] turns two
//! lookups into a validated [`DeliveryTarget`].

use std::{
    collections::HashMap,
    future::{ready, Future},
    pin::Pin,
    sync::{Arc, RwLock},
};

use courier_core::{ApiKey, DeliveryTarget};
use tracing::{debug, error};

use crate::error::ConfigError;

/// Boxed future returned by [`ParameterStore`] lookups.
pub type LookupFuture<'a> = Pin<Box<dyn Future<Output = Result<String, ConfigError>> + Send + 'a>>;

/// Read-only key/value store holding delivery configuration.
pub trait ParameterStore: Send + Sync + 'static {
    /// Looks up a plaintext parameter such as the endpoint URL.
    fn get_parameter<'a>(&'a self, path: &'a str) -> LookupFuture<'a>;

    /// Looks up a secret such as the API key.
    fn get_secret<'a>(&'a self, path: &'a str) -> LookupFuture<'a>;
}

/// Parameter store backed by process environment variables.
///
/// A path maps to a variable name by upper-casing it and replacing every
/// non-alphanumeric character with `_`, after trimming leading separators:
/// `/sls-observe/delivery/api-key` becomes `SLS_OBSERVE_DELIVERY_API_KEY`.
/// An optional prefix is prepended verbatim.
#[derive(Debug, Clone, Default)]
pub struct EnvParameterStore {
    prefix: String,
}

impl EnvParameterStore {
    /// Creates a store reading unprefixed variables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store reading variables that start with `prefix`.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    /// Returns the environment variable consulted for `path`.
    pub fn variable_name(&self, path: &str) -> String {
        let body: String = path
            .trim_start_matches(|c: char| !c.is_ascii_alphanumeric())
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
            .collect();
        format!("{}{body}", self.prefix)
    }

    fn lookup(&self, path: &str) -> Result<String, ConfigError> {
        let variable = self.variable_name(path);
        match std::env::var(&variable) {
            Ok(value) if value.trim().is_empty() => Err(ConfigError::empty(path)),
            Ok(value) => Ok(value),
            Err(std::env::VarError::NotPresent) => Err(ConfigError::not_found(path)),
            Err(std::env::VarError::NotUnicode(_)) => {
                Err(ConfigError::invalid_value(path, format!("{variable} is not valid unicode")))
            },
        }
    }
}

impl ParameterStore for EnvParameterStore {
    fn get_parameter<'a>(&'a self, path: &'a str) -> LookupFuture<'a> {
        Box::pin(ready(self.lookup(path)))
    }

    fn get_secret<'a>(&'a self, path: &'a str) -> LookupFuture<'a> {
        Box::pin(ready(self.lookup(path)))
    }
}

/// In-memory parameter store.
///
/// Keeps plaintext parameters and secrets in separate maps and can be told to
/// fail lookups of specific paths. Used by tests and for local runs with
/// explicit overrides.
#[derive(Debug, Clone, Default)]
pub struct InMemoryParameterStore {
    parameters: Arc<RwLock<HashMap<String, String>>>,
    secrets: Arc<RwLock<HashMap<String, String>>>,
    failures: Arc<RwLock<HashMap<String, ConfigError>>>,
    lookups: Arc<RwLock<Vec<String>>>,
}

impl InMemoryParameterStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a plaintext parameter.
    pub fn set_parameter(&self, path: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut parameters) = self.parameters.write() {
            parameters.insert(path.into(), value.into());
        }
    }

    /// Stores a secret.
    pub fn set_secret(&self, path: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(path.into(), value.into());
        }
    }

    /// Makes every lookup of `path` fail with `error` until cleared.
    pub fn fail_path(&self, path: impl Into<String>, error: ConfigError) {
        if let Ok(mut failures) = self.failures.write() {
            failures.insert(path.into(), error);
        }
    }

    /// Removes an injected failure.
    pub fn clear_failure(&self, path: &str) {
        if let Ok(mut failures) = self.failures.write() {
            failures.remove(path);
        }
    }

    /// Paths looked up so far, in call order.
    pub fn lookups(&self) -> Vec<String> {
        self.lookups.read().map(|lookups| lookups.clone()).unwrap_or_default()
    }

    fn lookup(
        &self,
        map: &RwLock<HashMap<String, String>>,
        path: &str,
    ) -> Result<String, ConfigError> {
        if let Ok(mut lookups) = self.lookups.write() {
            lookups.push(path.to_string());
        }

        if let Some(error) = self.failures.read().ok().and_then(|f| f.get(path).cloned()) {
            return Err(error);
        }

        let value = map
            .read()
            .map_err(|_| ConfigError::provider(path, "parameter map lock poisoned"))?
            .get(path)
            .cloned()
            .ok_or_else(|| ConfigError::not_found(path))?;

        if value.trim().is_empty() {
            return Err(ConfigError::empty(path));
        }
        Ok(value)
    }
}

impl ParameterStore for InMemoryParameterStore {
    fn get_parameter<'a>(&'a self, path: &'a str) -> LookupFuture<'a> {
        Box::pin(ready(self.lookup(&self.parameters, path)))
    }

    fn get_secret<'a>(&'a self, path: &'a str) -> LookupFuture<'a> {
        Box::pin(ready(self.lookup(&self.secrets, path)))
    }
}

/// Resolves the delivery target for a record from a parameter store.
#[derive(Clone)]
pub struct TargetResolver {
    store: Arc<dyn ParameterStore>,
    endpoint_path: String,
    api_key_path: String,
}

impl std::fmt::Debug for TargetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetResolver")
            .field("endpoint_path", &self.endpoint_path)
            .field("api_key_path", &self.api_key_path)
            .finish_non_exhaustive()
    }
}

impl TargetResolver {
    /// Creates a resolver reading the endpoint and API key from the given
    /// paths.
    pub fn new(
        store: Arc<dyn ParameterStore>,
        endpoint_path: impl Into<String>,
        api_key_path: impl Into<String>,
    ) -> Self {
        Self { store, endpoint_path: endpoint_path.into(), api_key_path: api_key_path.into() }
    }

    /// Looks up the endpoint and API key and validates the endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if either lookup fails or the endpoint is not an
    /// absolute `http`/`https` URL. The error is logged before returning.
    pub async fn resolve(&self) -> Result<DeliveryTarget, ConfigError> {
        let result = self.lookup_target().await;

        match &result {
            Ok(target) => debug!(endpoint = %target.endpoint, "delivery target resolved"),
            Err(e) => error!(path = e.path(), error = %e, "parameter retrieval failed"),
        }

        result
    }

    async fn lookup_target(&self) -> Result<DeliveryTarget, ConfigError> {
        let endpoint = self.store.get_parameter(&self.endpoint_path).await?;
        let endpoint = validate_endpoint(&self.endpoint_path, endpoint.trim())?;
        let api_key = self.store.get_secret(&self.api_key_path).await?;

        Ok(DeliveryTarget { endpoint, api_key: ApiKey::new(api_key) })
    }
}

fn validate_endpoint(path: &str, endpoint: &str) -> Result<String, ConfigError> {
    let url = reqwest::Url::parse(endpoint)
        .map_err(|e| ConfigError::invalid_value(path, format!("not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(endpoint.to_string()),
        scheme => Err(ConfigError::invalid_value(path, format!("unsupported scheme {scheme}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENDPOINT: &str = "/delivery/endpoint";
    const API_KEY: &str = "/delivery/api-key";

    fn resolver(store: &InMemoryParameterStore) -> TargetResolver {
        TargetResolver::new(Arc::new(store.clone()), ENDPOINT, API_KEY)
    }

    #[test]
    fn env_variable_names() {
        let store = EnvParameterStore::new();
        assert_eq!(
            store.variable_name("/sls-observe/delivery/api-key"),
            "SLS_OBSERVE_DELIVERY_API_KEY"
        );
        assert_eq!(
            EnvParameterStore::with_prefix("COURIER_PARAM_").variable_name("/delivery/endpoint"),
            "COURIER_PARAM_DELIVERY_ENDPOINT"
        );
    }

    #[tokio::test]
    async fn env_store_reports_missing_variables() {
        let store = EnvParameterStore::with_prefix("COURIER_TEST_UNSET_");
        let error = store.get_parameter("/definitely/not/set").await.unwrap_err();
        assert_eq!(error, ConfigError::not_found("/definitely/not/set"));
    }

    #[tokio::test]
    async fn resolves_target_from_store() {
        let store = InMemoryParameterStore::new();
        store.set_parameter(ENDPOINT, "https://partner.example.com/orders");
        store.set_secret(API_KEY, "s3cret");

        let target = resolver(&store).resolve().await.unwrap();

        assert_eq!(target.endpoint, "https://partner.example.com/orders");
        assert_eq!(target.api_key.expose(), "s3cret");
        assert_eq!(store.lookups(), vec![ENDPOINT.to_string(), API_KEY.to_string()]);
    }

    #[tokio::test]
    async fn secrets_and_parameters_are_separate() {
        let store = InMemoryParameterStore::new();
        store.set_parameter(ENDPOINT, "https://partner.example.com");
        store.set_parameter(API_KEY, "stored-as-plaintext");

        let error = resolver(&store).resolve().await.unwrap_err();
        assert_eq!(error, ConfigError::not_found(API_KEY));
    }

    #[tokio::test]
    async fn invalid_endpoints_rejected() {
        let store = InMemoryParameterStore::new();
        store.set_secret(API_KEY, "k");

        store.set_parameter(ENDPOINT, "not a url");
        assert!(matches!(
            resolver(&store).resolve().await,
            Err(ConfigError::InvalidValue { .. })
        ));

        store.set_parameter(ENDPOINT, "ftp://partner.example.com");
        assert!(matches!(
            resolver(&store).resolve().await,
            Err(ConfigError::InvalidValue { .. })
        ));

        store.set_parameter(ENDPOINT, "   ");
        assert_eq!(resolver(&store).resolve().await, Err(ConfigError::empty(ENDPOINT)));
    }

    #[tokio::test]
    async fn injected_failures_apply_until_cleared() {
        let store = InMemoryParameterStore::new();
        store.set_parameter(ENDPOINT, "https://partner.example.com");
        store.set_secret(API_KEY, "k");
        store.fail_path(API_KEY, ConfigError::provider(API_KEY, "throttled"));

        assert_eq!(
            resolver(&store).resolve().await,
            Err(ConfigError::provider(API_KEY, "throttled"))
        );

        store.clear_failure(API_KEY);
        assert!(resolver(&store).resolve().await.is_ok());
    }
}
