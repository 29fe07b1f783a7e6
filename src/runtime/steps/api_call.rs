/// External API call step
///
/// Builds a request from the step config, applies the auth descriptor and maps
/// the response: 2xx succeeds, 5xx/429 and transport errors are transient,
/// any other status is a non-retryable rejection.

use crate::integrations::{CallError, ExternalCaller};
use crate::runtime::executor::{is_placeholder, Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::{FailureKind, StepResult};
use async_trait::async_trait;
use base64::Engine as _;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};

const METHODS: [&str; 5] = ["GET", "POST", "PUT", "PATCH", "DELETE"];

pub struct ApiCallExecutor {
    caller: Arc<dyn ExternalCaller>,
}

impl ApiCallExecutor {
    pub fn new(caller: Arc<dyn ExternalCaller>) -> Self {
        Self { caller }
    }
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    if !config.get("endpoint").is_some_and(Value::is_string) {
        return Err("api_call requires an 'endpoint' string".to_string());
    }
    if let Some(method) = config.get("method").filter(|m| !is_placeholder(m)) {
        let method = method.as_str().ok_or("api_call 'method' must be a string")?;
        if !METHODS.contains(&method.to_uppercase().as_str()) {
            return Err(format!("unsupported HTTP method: {}", method));
        }
    }
    if let Some(auth) = config.get("auth") {
        let mut scratch = HashMap::new();
        apply_auth(&mut scratch, auth)?;
    }
    Ok(())
}

/// Add the auth header described by `auth` to `headers`
pub(crate) fn apply_auth(headers: &mut HashMap<String, String>, auth: &Value) -> Result<(), String> {
    let kind = auth
        .get("type")
        .and_then(Value::as_str)
        .ok_or("auth descriptor requires a 'type'")?;
    let field = |name: &str| -> Result<String, String> {
        auth.get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| format!("{} auth requires '{}'", kind, name))
    };

    match kind {
        "bearer" => {
            headers.insert("Authorization".to_string(), format!("Bearer {}", field("token")?));
        }
        "basic" => {
            let credentials = format!("{}:{}", field("username")?, field("password")?);
            let encoded = base64::engine::general_purpose::STANDARD.encode(credentials);
            headers.insert("Authorization".to_string(), format!("Basic {}", encoded));
        }
        "api_key" => {
            let header = auth
                .get("header")
                .and_then(Value::as_str)
                .unwrap_or("X-API-Key")
                .to_string();
            headers.insert(header, field("key")?);
        }
        other => return Err(format!("unsupported auth type '{}'", other)),
    }
    Ok(())
}

fn header_map(config: &Value) -> HashMap<String, String> {
    config
        .get("headers")
        .and_then(Value::as_object)
        .map(|headers| {
            headers
                .iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl StepExecutor for ApiCallExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let config = invocation.config;
        let Some(endpoint) = config.get("endpoint").and_then(Value::as_str) else {
            return StepResult::definition("api_call requires an 'endpoint' string");
        };
        let service = config.get("service").and_then(Value::as_str);
        let method = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();

        let mut headers = header_map(config);
        if let Some(auth) = config.get("auth") {
            if let Err(message) = apply_auth(&mut headers, auth) {
                return StepResult::definition(message);
            }
        }
        let body = config.get("body").filter(|b| !b.is_null());

        match self
            .caller
            .invoke(service, endpoint, &method, &headers, body)
            .await
        {
            Ok(response) if response.is_success() => {
                StepResult::ok(response.body).with_metadata("status", response.status)
            }
            Ok(response) => {
                let kind = if response.status >= 500 || response.status == 429 {
                    FailureKind::Transient
                } else {
                    FailureKind::Rejected
                };
                tracing::debug!("📡 {} {} returned HTTP {}", method, endpoint, response.status);
                StepResult::failure(
                    kind,
                    format!("{} {} returned HTTP {}", method, endpoint, response.status),
                )
                .with_data(response.body)
                .with_metadata("status", response.status)
            }
            Err(CallError::Unresolvable(message)) => StepResult::definition(message),
            Err(CallError::Transport(message)) => StepResult::transient(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::testing::{dispatcher_with, run_step, MockCaller};
    use crate::runtime::executor::Collaborators;
    use serde_json::json;

    fn call_step(config: Value) -> Value {
        json!({"id": "call", "kind": "action", "action": "api_call", "config": config})
    }

    #[tokio::test]
    async fn test_success_returns_body_and_status() {
        let caller = Arc::new(MockCaller::new().respond(201, json!({"id": 9})));
        let dispatcher = dispatcher_with(Collaborators::new(caller.clone()));

        let result = run_step(
            &dispatcher,
            call_step(json!({
                "service": "crm", "endpoint": "/contacts", "method": "post",
                "body": {"email": "{{email}}"},
                "auth": {"type": "bearer", "token": "t0k"}
            })),
            json!({"email": "a@b.com"}),
        )
        .await;

        assert!(result.success);
        assert_eq!(result.data, Some(json!({"id": 9})));
        assert_eq!(result.metadata["status"], json!(201));

        let requests = caller.requests.lock().unwrap();
        let (service, endpoint, method, headers, body) = &requests[0];
        assert_eq!(service.as_deref(), Some("crm"));
        assert_eq!(endpoint, "/contacts");
        assert_eq!(method, "POST");
        assert_eq!(headers["Authorization"], "Bearer t0k");
        assert_eq!(body, &Some(json!({"email": "a@b.com"})));
    }

    #[tokio::test]
    async fn test_status_classification() {
        let caller = Arc::new(
            MockCaller::new()
                .respond(503, json!({"error": "busy"}))
                .respond(429, Value::Null)
                .respond(404, json!({"error": "missing"})),
        );
        let dispatcher = dispatcher_with(Collaborators::new(caller));
        let step = call_step(json!({"endpoint": "https://api.example.com/x"}));

        let unavailable = run_step(&dispatcher, step.clone(), json!({})).await;
        assert_eq!(unavailable.failure_kind(), Some(FailureKind::Transient));
        assert_eq!(unavailable.data, Some(json!({"error": "busy"})));

        let throttled = run_step(&dispatcher, step.clone(), json!({})).await;
        assert_eq!(throttled.failure_kind(), Some(FailureKind::Transient));

        let missing = run_step(&dispatcher, step, json!({})).await;
        assert_eq!(missing.failure_kind(), Some(FailureKind::Rejected));
        assert_eq!(missing.metadata["status"], json!(404));
    }

    #[tokio::test]
    async fn test_transport_failure_is_transient() {
        let caller = Arc::new(MockCaller::new().fail("connection refused"));
        let dispatcher = dispatcher_with(Collaborators::new(caller));
        let result = run_step(
            &dispatcher,
            call_step(json!({"endpoint": "https://api.example.com/x"})),
            json!({}),
        )
        .await;
        assert!(result.is_retryable());
    }

    #[test]
    fn test_auth_descriptors() {
        let mut headers = HashMap::new();
        apply_auth(&mut headers, &json!({"type": "basic", "username": "u", "password": "p"})).unwrap();
        assert_eq!(headers["Authorization"], "Basic dTpw");

        apply_auth(&mut headers, &json!({"type": "api_key", "header": "X-Token", "key": "k"})).unwrap();
        assert_eq!(headers["X-Token"], "k");

        assert!(apply_auth(&mut headers, &json!({"type": "oauth"})).is_err());
        assert!(apply_auth(&mut headers, &json!({"type": "bearer"})).is_err());
    }

    #[test]
    fn test_check_config() {
        assert!(check_config(&json!({"endpoint": "/x", "method": "get"})).is_ok());
        assert!(check_config(&json!({"endpoint": "/x", "method": "TRACE"})).is_err());
        assert!(check_config(&json!({"method": "GET"})).is_err());
    }
}
