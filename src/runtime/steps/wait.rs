/// Delay step
///
/// Sleeps on the tokio timer, so a waiting run holds no worker thread.

use crate::runtime::executor::{is_placeholder, Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::StepResult;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct WaitExecutor;

/// `duration_ms` wins over `seconds`; numeric strings are accepted
pub(crate) fn duration_of(config: &Value) -> Result<Duration, String> {
    if let Some(ms) = config.get("duration_ms") {
        let ms = number(ms).ok_or("duration_ms must be a non-negative number")?;
        return Ok(Duration::from_millis(ms.round() as u64));
    }
    if let Some(seconds) = config.get("seconds") {
        let seconds = number(seconds).ok_or("seconds must be a non-negative number")?;
        return Ok(Duration::from_millis((seconds * 1000.0).round() as u64));
    }
    Err("wait step requires 'duration_ms' or 'seconds'".to_string())
}

fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    (n.is_finite() && n >= 0.0).then_some(n)
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    let deferred = ["duration_ms", "seconds"]
        .iter()
        .any(|k| config.get(*k).is_some_and(is_placeholder));
    if deferred {
        return Ok(());
    }
    duration_of(config).map(|_| ())
}

#[async_trait]
impl StepExecutor for WaitExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let duration = match duration_of(invocation.config) {
            Ok(duration) => duration,
            Err(message) => return StepResult::definition(message),
        };

        tracing::debug!("⏳ Step {} waiting {:?}", invocation.step_id, duration);
        tokio::time::sleep(duration).await;

        StepResult::ok(json!({ "waited_ms": duration.as_millis() as u64 }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::testing::{default_dispatcher, run_step};

    #[test]
    fn test_duration_parsing() {
        assert_eq!(duration_of(&json!({"duration_ms": 250})).unwrap(), Duration::from_millis(250));
        assert_eq!(duration_of(&json!({"seconds": 1.5})).unwrap(), Duration::from_millis(1500));
        assert_eq!(duration_of(&json!({"seconds": "2"})).unwrap(), Duration::from_secs(2));
        assert!(duration_of(&json!({"duration_ms": -5})).is_err());
        assert!(duration_of(&json!({})).is_err());
        assert!(check_config(&json!({"seconds": "{{delay}}"})).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_sleeps_for_duration() {
        let dispatcher = default_dispatcher();
        let started = tokio::time::Instant::now();

        let result = run_step(
            &dispatcher,
            json!({"id": "pause", "kind": "wait", "config": {"seconds": 30}}),
            json!({}),
        )
        .await;

        assert!(result.success);
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(result.data.unwrap()["waited_ms"], json!(30000));
    }
}
