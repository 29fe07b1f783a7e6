/// Uniform step result envelope
///
/// Every executor returns a `StepResult`; failures carry a `FailureKind` that the
/// engine uses to decide whether a retry is worthwhile.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Classification of a failed step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Malformed config or unknown operation
    Definition,
    /// Network failures, timeouts, HTTP 5xx/429, storage errors
    Transient,
    /// Well-formed remote refusal (HTTP 4xx)
    Rejected,
    /// Business-rule violations
    Validation,
    /// One or more notification channels failed
    Delivery,
    /// Failed after some writes were already committed
    Partial,
}

impl FailureKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: FailureKind,
    pub message: String,
}

/// Result of executing one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl StepResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: Map::new(),
        }
    }

    /// Successful no-op, e.g. a notification whose gating condition did not hold
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::ok(json!({ "skipped": true, "reason": reason.into() }))
            .with_metadata("outcome", "skipped")
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(StepError {
                kind,
                message: message.into(),
            }),
            metadata: Map::new(),
        }
    }

    pub fn definition(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Definition, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::failure(FailureKind::Transient, message)
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.message.as_str())
    }

    pub fn is_retryable(&self) -> bool {
        !self.success && self.failure_kind().is_some_and(FailureKind::is_retryable)
    }

    /// JSON form stored in the run context under the step id
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_failures_retry() {
        assert!(StepResult::transient("timeout").is_retryable());
        assert!(!StepResult::failure(FailureKind::Rejected, "404").is_retryable());
        assert!(!StepResult::failure(FailureKind::Delivery, "smtp").is_retryable());
        assert!(!StepResult::failure(FailureKind::Partial, "row 2").is_retryable());
        assert!(!StepResult::ok(json!(1)).is_retryable());
    }

    #[test]
    fn test_skipped_shape() {
        let value = StepResult::skipped("condition false").to_value();
        assert_eq!(value["success"], json!(true));
        assert_eq!(value["data"]["skipped"], json!(true));
        assert_eq!(value["metadata"]["outcome"], json!("skipped"));
        assert!(value.get("error").is_none());
    }
}
