/// External call collaborator
///
/// `ExternalCaller` abstracts outbound requests made by `api_call` steps.
/// `HttpCaller` is the reqwest-backed implementation with a logical
/// service name → base URL map.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::{collections::HashMap, time::Duration};
use thiserror::Error;

/// Response as seen by the step executor
#[derive(Debug, Clone, Serialize)]
pub struct ExternalResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Parsed JSON when possible, otherwise the raw text
    pub body: Value,
}

impl ExternalResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[derive(Debug, Clone, Error)]
pub enum CallError {
    /// The request could not be built (unknown service, bad method)
    #[error("{0}")]
    Unresolvable(String),
    /// The request was sent but no response arrived
    #[error("{0}")]
    Transport(String),
}

#[async_trait]
pub trait ExternalCaller: Send + Sync {
    async fn invoke(
        &self,
        service: Option<&str>,
        endpoint: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<ExternalResponse, CallError>;
}

#[derive(Debug, Clone)]
pub struct HttpCaller {
    client: reqwest::Client,
    services: HashMap<String, String>,
}

impl HttpCaller {
    pub fn new(services: HashMap<String, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, services }
    }

    /// Join a service base URL with an endpoint; absolute endpoints are used as-is
    pub fn url_for(&self, service: Option<&str>, endpoint: &str) -> Result<String, CallError> {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        let Some(service) = service else {
            return Err(CallError::Unresolvable(format!(
                "endpoint '{}' is relative and no service was named",
                endpoint
            )));
        };
        let base = self
            .services
            .get(service)
            .ok_or_else(|| CallError::Unresolvable(format!("unknown service '{}'", service)))?;

        Ok(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        ))
    }
}

#[async_trait]
impl ExternalCaller for HttpCaller {
    async fn invoke(
        &self,
        service: Option<&str>,
        endpoint: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<ExternalResponse, CallError> {
        let url = self.url_for(service, endpoint)?;

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "DELETE" => self.client.delete(&url),
            "PATCH" => self.client.patch(&url),
            other => {
                return Err(CallError::Unresolvable(format!("unsupported HTTP method: {}", other)))
            }
        };

        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }

        if let Some(body) = body {
            request = match body {
                Value::String(text) => request
                    .header("Content-Type", "text/plain")
                    .body(text.clone()),
                other => request.json(other),
            };
        }

        tracing::debug!("🌍 HTTP request: {} {}", method, url);
        let response = request
            .send()
            .await
            .map_err(|e| CallError::Transport(format!("HTTP request to {} failed: {}", url, e)))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| CallError::Transport(format!("failed to read response body: {}", e)))?;
        let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::debug!("📡 Response status: {} ({} {})", status, method, url);

        Ok(ExternalResponse {
            status,
            headers,
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> HttpCaller {
        let services = HashMap::from([(
            "crm".to_string(),
            "https://crm.example.com/api/".to_string(),
        )]);
        HttpCaller::new(services, Duration::from_secs(5))
    }

    #[test]
    fn test_url_for_joins_service_base() {
        let caller = caller();
        assert_eq!(
            caller.url_for(Some("crm"), "/contacts").unwrap(),
            "https://crm.example.com/api/contacts"
        );
        assert_eq!(
            caller.url_for(None, "https://other.example.com/x").unwrap(),
            "https://other.example.com/x"
        );
    }

    #[test]
    fn test_url_for_rejects_unknown_service() {
        let caller = caller();
        assert!(matches!(
            caller.url_for(Some("billing"), "/x"),
            Err(CallError::Unresolvable(_))
        ));
        assert!(matches!(caller.url_for(None, "/x"), Err(CallError::Unresolvable(_))));
    }
}
