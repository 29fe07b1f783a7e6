/// Run state model
///
/// A `Run` is one execution of a workflow definition: status, context, the
/// append-only log, and failure details once terminal.

use crate::runtime::result::StepResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{fmt, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "paused" => Ok(RunStatus::Paused),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            "cancelled" => Ok(RunStatus::Cancelled),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

/// External run-control signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Signal {
    Pause,
    Resume,
    Cancel,
}

impl FromStr for Signal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pause" => Ok(Signal::Pause),
            "resume" => Ok(Signal::Resume),
            "cancel" => Ok(Signal::Cancel),
            other => Err(format!("unknown signal '{}'", other)),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Signal::Pause => "pause",
            Signal::Resume => "resume",
            Signal::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub message: String,
}

/// One execution of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
    /// Trigger payload fields at top level plus each step result under its id
    pub context: Map<String, Value>,
    pub log: Vec<LogEntry>,
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

/// Compact listing form
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub current_step: Option<String>,
}

impl Run {
    pub fn new(workflow_name: &str, payload: &Value) -> Self {
        let context = match payload {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };

        Self {
            id: uuid::Uuid::new_v4().to_string(),
            workflow_name: workflow_name.to_string(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            current_step: None,
            context,
            log: Vec::new(),
            failed_step: None,
            error: None,
        }
    }

    /// Append a log entry; timestamps never go backwards
    pub fn append_log(&mut self, level: LogLevel, step: Option<&str>, message: impl Into<String>) -> LogEntry {
        let mut timestamp = Utc::now();
        if let Some(last) = self.log.last() {
            if last.timestamp > timestamp {
                timestamp = last.timestamp;
            }
        }

        let entry = LogEntry {
            timestamp,
            level,
            step: step.map(str::to_string),
            message: message.into(),
        };
        self.log.push(entry.clone());
        entry
    }

    pub fn record_step(&mut self, step_id: &str, result: &StepResult) {
        self.context.insert(step_id.to_string(), result.to_value());
    }

    pub fn context_value(&self) -> Value {
        Value::Object(self.context.clone())
    }

    /// Move to a terminal status, clearing the current step
    pub fn finish(&mut self, status: RunStatus) {
        self.status = status;
        self.current_step = None;
        self.ended_at = Some(Utc::now());
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            id: self.id.clone(),
            workflow_name: self.workflow_name.clone(),
            status: self.status,
            started_at: self.started_at,
            ended_at: self.ended_at,
            current_step: self.current_step.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_payload_is_merged_into_context() {
        let run = Run::new("wf", &json!({"email": "a@b.com"}));
        assert_eq!(run.context_value(), json!({"email": "a@b.com"}));
        assert_eq!(run.status, RunStatus::Running);

        let scalar = Run::new("wf", &json!(7));
        assert_eq!(scalar.context_value(), json!({"payload": 7}));
    }

    #[test]
    fn test_log_is_monotonic() {
        let mut run = Run::new("wf", &json!({}));
        for i in 0..20 {
            run.append_log(LogLevel::Info, None, format!("entry {}", i));
        }
        assert!(run.log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(RunStatus::Cancelled.to_string(), "cancelled");
        assert_eq!("paused".parse::<RunStatus>().unwrap(), RunStatus::Paused);
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Paused.is_terminal());
        assert_eq!("Cancel".parse::<Signal>().unwrap(), Signal::Cancel);
    }
}
