//! Scripted delivery transport for processor tests without a network.

use std::{
    collections::VecDeque,
    future::{ready, Future},
    pin::Pin,
    sync::{Arc, Mutex},
};

use courier_core::{CorrelationId, DeliveryRequest, DeliveryTarget};
use courier_delivery::{DeliveryTransport, HttpDeliveryError};
use serde_json::Value;

type CallHook = Arc<dyn Fn(u32) + Send + Sync>;

/// One delivery observed by [`ScriptedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCall {
    /// Endpoint the payload was sent to.
    pub endpoint: String,
    /// API key presented.
    pub api_key: String,
    /// Correlation id header value.
    pub correlation_id: String,
    /// JSON payload.
    pub payload: Value,
}

/// Transport that replays scripted results and records every call.
///
/// Scripted results are consumed in order; once exhausted, every call gets the
/// fallback result (a `200` with `{}` unless changed).
#[derive(Clone)]
pub struct ScriptedTransport {
    script: Arc<Mutex<VecDeque<Result<Value, HttpDeliveryError>>>>,
    fallback: Result<Value, HttpDeliveryError>,
    calls: Arc<Mutex<Vec<DeliveryCall>>>,
    on_call: Option<CallHook>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedTransport {
    /// Creates a transport that always succeeds with `{}`.
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            fallback: Ok(Value::Object(serde_json::Map::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            on_call: None,
        }
    }

    /// Creates a transport that always fails with `error`.
    pub fn always_failing(error: HttpDeliveryError) -> Self {
        Self::new().otherwise(Err(error))
    }

    /// Queues the result of the next unscripted call.
    #[must_use]
    pub fn then(self, result: Result<Value, HttpDeliveryError>) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
        self
    }

    /// Queues `count` failures with `error`.
    #[must_use]
    pub fn fail_times(mut self, count: usize, error: HttpDeliveryError) -> Self {
        for _ in 0..count {
            self = self.then(Err(error.clone()));
        }
        self
    }

    /// Sets the result returned once the script is exhausted.
    #[must_use]
    pub fn otherwise(mut self, result: Result<Value, HttpDeliveryError>) -> Self {
        self.fallback = result;
        self
    }

    /// Runs `hook` with the 1-based call number before each delivery.
    #[must_use]
    pub fn on_call(mut self, hook: impl Fn(u32) + Send + Sync + 'static) -> Self {
        self.on_call = Some(Arc::new(hook));
        self
    }

    /// Calls made so far, in order.
    pub fn calls(&self) -> Vec<DeliveryCall> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    /// Number of calls made so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|calls| calls.len()).unwrap_or_default()
    }

    fn next_result(&self) -> Result<Value, HttpDeliveryError> {
        self.script
            .lock()
            .ok()
            .and_then(|mut script| script.pop_front())
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl DeliveryTransport for ScriptedTransport {
    fn deliver<'a>(
        &'a self,
        target: &'a DeliveryTarget,
        correlation_id: &'a CorrelationId,
        request: &'a DeliveryRequest,
    ) -> Pin<Box<dyn Future<Output = Result<Value, HttpDeliveryError>> + Send + 'a>> {
        let call_number = if let Ok(mut calls) = self.calls.lock() {
            calls.push(DeliveryCall {
                endpoint: target.endpoint.clone(),
                api_key: target.api_key.expose().to_string(),
                correlation_id: correlation_id.as_str().to_string(),
                payload: request.to_value(),
            });
            u32::try_from(calls.len()).unwrap_or(u32::MAX)
        } else {
            0
        };

        if let Some(hook) = &self.on_call {
            hook(call_number);
        }

        Box::pin(ready(self.next_result()))
    }
}

#[cfg(test)]
mod tests {
    use courier_core::ApiKey;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn replays_script_then_fallback() {
        let transport = ScriptedTransport::new()
            .fail_times(2, HttpDeliveryError::status(500, "boom"))
            .otherwise(Ok(json!({"ok": true})));
        let target = DeliveryTarget {
            endpoint: "https://partner.example.com".to_string(),
            api_key: ApiKey::new("k"),
        };
        let correlation_id = CorrelationId::new("c-1");
        let request = DeliveryRequest::default();

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(transport.deliver(&target, &correlation_id, &request).await);
        }

        assert!(results[0].is_err() && results[1].is_err());
        assert_eq!(results[2], Ok(json!({"ok": true})));
        assert_eq!(transport.call_count(), 3);
        assert_eq!(transport.calls()[0].correlation_id, "c-1");
    }
}
