/// Core workflow type definitions
///
/// Definitions are plain serde data: a trigger step, a list of typed steps wired
/// together by successor ids, a retry policy and an optional overall timeout.
/// They are stored as JSON in SQLite and compiled into a validated step graph
/// before any run may use them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

/// A complete workflow definition
///
/// Immutable once compiled; runs hold an `Arc` to the compiled form they started
/// with, so replacing a definition never affects runs already in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow name (e.g., "user_registration")
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Inactive workflows are kept in the registry but refuse new runs
    #[serde(default = "default_active")]
    pub active: bool,
    /// Entry step; always executed first with the trigger payload
    pub trigger: Step,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Falls back to the engine's default policy when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_active() -> bool {
    true
}

impl WorkflowDefinition {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Trigger first, then the declared steps in order
    pub fn all_steps(&self) -> impl Iterator<Item = &Step> {
        std::iter::once(&self.trigger).chain(self.steps.iter())
    }

    pub fn display_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// Structural kind of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Trigger,
    Action,
    Condition,
    Parallel,
    Wait,
}

/// Executor named by an `action` step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    DataValidation,
    ApiCall,
    DatabaseOperation,
    Notification,
    Calculation,
}

/// Closed set of step handlers; one executor exists per variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Trigger,
    DataValidation,
    ApiCall,
    DatabaseOperation,
    Notification,
    Calculation,
    Conditional,
    Parallel,
    Wait,
}

impl ExecutorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutorKind::Trigger => "trigger",
            ExecutorKind::DataValidation => "data_validation",
            ExecutorKind::ApiCall => "api_call",
            ExecutorKind::DatabaseOperation => "database_operation",
            ExecutorKind::Notification => "notification",
            ExecutorKind::Calculation => "calculation",
            ExecutorKind::Conditional => "conditional",
            ExecutorKind::Parallel => "parallel",
            ExecutorKind::Wait => "wait",
        }
    }
}

impl From<ActionKind> for ExecutorKind {
    fn from(action: ActionKind) -> Self {
        match action {
            ActionKind::DataValidation => ExecutorKind::DataValidation,
            ActionKind::ApiCall => ExecutorKind::ApiCall,
            ActionKind::DatabaseOperation => ExecutorKind::DatabaseOperation,
            ActionKind::Notification => ExecutorKind::Notification,
            ActionKind::Calculation => ExecutorKind::Calculation,
        }
    }
}

/// A single step in the workflow graph
///
/// Steps are shared read-only across concurrent runs. `config` is free-form JSON
/// interpreted by the executor after placeholder resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique step identifier within the workflow (e.g., "validate")
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub kind: StepKind,
    /// Required for `action` steps, ignored otherwise
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ActionKind>,
    #[serde(default = "empty_config")]
    pub config: Value,
    /// Successor step ids; empty means terminal
    #[serde(default)]
    pub next: Vec<String>,
}

fn empty_config() -> Value {
    Value::Object(Map::new())
}

impl Step {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }

    /// Map the structural kind (plus `action` attribute) to an executor
    pub fn executor_kind(&self) -> Result<ExecutorKind, String> {
        match self.kind {
            StepKind::Trigger => Ok(ExecutorKind::Trigger),
            StepKind::Condition => Ok(ExecutorKind::Conditional),
            StepKind::Parallel => Ok(ExecutorKind::Parallel),
            StepKind::Wait => Ok(ExecutorKind::Wait),
            StepKind::Action => self
                .action
                .map(ExecutorKind::from)
                .ok_or_else(|| format!("action step '{}' does not name an action", self.id)),
        }
    }

    /// Branch successors declared by a condition step (`on_true` / `on_false`)
    pub fn branch(&self, outcome: bool) -> Vec<String> {
        let key = if outcome { "on_true" } else { "on_false" };
        string_list(self.config.get(key))
    }

    /// Every edge leaving this step, used for graph validation
    pub fn successors(&self) -> Vec<String> {
        let mut out = Vec::new();
        if self.kind == StepKind::Condition {
            out.extend(self.branch(true));
            out.extend(self.branch(false));
        }
        out.extend(self.next.iter().cloned());
        out
    }
}

/// Accepts either a single id or a list of ids
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

/// Per-step retry policy
///
/// `max_attempts` counts total attempts, so 1 disables retries. The delay before
/// retry `n` (0 for the first retry) is `base_delay_ms * backoff_coefficient^n`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_backoff_coefficient")]
    pub backoff_coefficient: f64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_backoff_coefficient() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            backoff_coefficient: default_backoff_coefficient(),
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay_ms(mut self, base_delay_ms: u64) -> Self {
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub fn with_backoff_coefficient(mut self, coefficient: f64) -> Self {
        self.backoff_coefficient = coefficient;
        self
    }

    /// Total attempts, never below one
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Delay before retry `retry` (0-based)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = self.backoff_coefficient.powi(retry as i32);
        let millis = self.base_delay_ms as f64 * factor;
        if millis.is_finite() && millis > 0.0 {
            Duration::from_micros((millis * 1000.0).round() as u64)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_definition_defaults() {
        let def: WorkflowDefinition = serde_json::from_value(json!({
            "name": "onboarding",
            "trigger": {"id": "start", "kind": "trigger", "next": ["check"]},
            "steps": [
                {"id": "check", "kind": "action", "action": "data_validation",
                 "config": {"rules": {"email": ["required"]}}}
            ]
        }))
        .unwrap();

        assert!(def.active);
        assert!(def.retry.is_none());
        assert_eq!(def.display_name(), "onboarding");
        assert_eq!(def.all_steps().count(), 2);
        assert_eq!(
            def.steps[0].executor_kind().unwrap(),
            ExecutorKind::DataValidation
        );
    }

    #[test]
    fn test_action_step_without_action_is_rejected() {
        let step: Step = serde_json::from_value(json!({"id": "x", "kind": "action"})).unwrap();
        assert!(step.executor_kind().unwrap_err().contains("'x'"));
    }

    #[test]
    fn test_condition_successors_include_branches() {
        let step: Step = serde_json::from_value(json!({
            "id": "gate",
            "kind": "condition",
            "config": {"expression": "score > 3", "on_true": "high", "on_false": ["low"]},
            "next": ["done"]
        }))
        .unwrap();

        assert_eq!(step.branch(true), vec!["high"]);
        assert_eq!(step.successors(), vec!["high", "low", "done"]);
    }

    #[test]
    fn test_retry_delay_follows_coefficient() {
        let policy = RetryPolicy::default()
            .with_base_delay_ms(100)
            .with_backoff_coefficient(3.0);

        assert_eq!(policy.delay_for_retry(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_retry(1), Duration::from_millis(300));
        assert_eq!(policy.delay_for_retry(2), Duration::from_millis(900));
        assert_eq!(RetryPolicy::no_retry().attempts(), 1);
        assert_eq!(RetryPolicy::default().with_max_attempts(0).attempts(), 1);
    }
}
