/// Notification step
///
/// Sends one message to every configured channel concurrently. An optional
/// `condition` gates delivery; when it does not hold the step is skipped.

use crate::integrations::{Notifier, Severity};
use crate::runtime::condition::Condition;
use crate::runtime::executor::{is_placeholder, Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::{FailureKind, StepResult};
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq)]
struct ChannelTarget {
    channel: String,
    recipients: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ChannelOutcome {
    channel: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

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

fn targets(config: &Value) -> Result<Vec<ChannelTarget>, String> {
    let channels = config
        .get("channels")
        .and_then(Value::as_array)
        .ok_or("notification requires a 'channels' list")?;
    let default_recipients = string_list(config.get("recipients"));

    channels
        .iter()
        .map(|entry| match entry {
            Value::String(name) => Ok(ChannelTarget {
                channel: name.clone(),
                recipients: default_recipients.clone(),
            }),
            Value::Object(map) => {
                let channel = map
                    .get("channel")
                    .and_then(Value::as_str)
                    .ok_or("channel entries require a 'channel' name")?;
                let recipients = match map.get("recipients") {
                    Some(list) => string_list(Some(list)),
                    None => default_recipients.clone(),
                };
                Ok(ChannelTarget {
                    channel: channel.to_string(),
                    recipients,
                })
            }
            _ => Err("channel entries must be names or objects".to_string()),
        })
        .collect()
}

fn severity(config: &Value) -> Result<Severity, String> {
    match config.get("severity") {
        None | Some(Value::Null) => Ok(Severity::default()),
        Some(value) => serde_json::from_value(value.clone())
            .map_err(|_| "severity must be one of info, warning, critical".to_string()),
    }
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    targets(config)?;
    if config.get("message").is_none() {
        return Err("notification requires a 'message'".to_string());
    }
    if !config.get("severity").is_some_and(is_placeholder) {
        severity(config)?;
    }
    if let Some(condition) = config.get("condition") {
        let expression = condition.as_str().ok_or("condition must be a string")?;
        if !expression.contains("{{") {
            expression.parse::<Condition>()?;
        }
    }
    Ok(())
}

pub struct NotificationExecutor {
    notifier: Notifier,
}

impl NotificationExecutor {
    pub fn new(notifier: Notifier) -> Self {
        Self { notifier }
    }

    async fn deliver(&self, target: &ChannelTarget, message: &str, severity: Severity) -> ChannelOutcome {
        let result = match self.notifier.get(&target.channel) {
            Some(channel) => channel
                .send(message, &target.recipients, severity)
                .await
                .map_err(|e| e.to_string()),
            None => Err(format!("unknown channel '{}'", target.channel)),
        };

        ChannelOutcome {
            channel: target.channel.clone(),
            success: result.is_ok(),
            error: result.err(),
        }
    }
}

#[async_trait]
impl StepExecutor for NotificationExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let config = invocation.config;

        if let Some(expression) = config.get("condition").and_then(Value::as_str) {
            let condition = match expression.parse::<Condition>() {
                Ok(condition) => condition,
                Err(message) => return StepResult::definition(message),
            };
            if !condition.evaluate(invocation.context, invocation.previous) {
                tracing::debug!("🔕 Notification {} skipped: condition '{}' is false", invocation.step_id, expression);
                return StepResult::skipped(format!("condition '{}' did not hold", expression));
            }
        }

        let targets = match targets(config) {
            Ok(targets) => targets,
            Err(message) => return StepResult::definition(message),
        };
        let severity = match severity(config) {
            Ok(severity) => severity,
            Err(message) => return StepResult::definition(message),
        };
        let message = match config.get("message") {
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
            None => return StepResult::definition("notification requires a 'message'"),
        };

        let outcomes = join_all(
            targets
                .iter()
                .map(|target| self.deliver(target, &message, severity)),
        )
        .await;

        let failed: Vec<&str> = outcomes
            .iter()
            .filter(|o| !o.success)
            .map(|o| o.channel.as_str())
            .collect();
        let data = json!({
            "channels": outcomes,
            "delivered": outcomes.len() - failed.len(),
            "severity": severity,
        });

        if failed.is_empty() {
            StepResult::ok(data)
        } else {
            StepResult::failure(
                FailureKind::Delivery,
                format!("notification failed on channels: {}", failed.join(", ")),
            )
            .with_data(data)
        }
    }
}
