/// Parallel group step
///
/// Runs the embedded sub-steps concurrently and waits for all of them; there
/// is no fail-fast. Each sub-step gets its own retries, so the group itself is
/// never retried as a whole.

use crate::runtime::executor::{check_config as check_step_config, Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::{FailureKind, StepResult};
use crate::workflow::types::{Step, StepKind};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ParallelExecutor;

pub(crate) fn sub_steps(config: &Value) -> Result<Vec<Step>, String> {
    let raw = config
        .get("steps")
        .and_then(Value::as_array)
        .ok_or("parallel step requires a 'steps' list")?;

    let mut seen = HashSet::new();
    let mut steps = Vec::with_capacity(raw.len());
    for entry in raw {
        let step: Step = serde_json::from_value(entry.clone())
            .map_err(|e| format!("invalid parallel sub-step: {}", e))?;
        if matches!(step.kind, StepKind::Trigger | StepKind::Parallel) {
            return Err(format!(
                "parallel sub-step '{}' cannot be a {:?} step",
                step.id, step.kind
            ));
        }
        if !seen.insert(step.id.clone()) {
            return Err(format!("duplicate parallel sub-step id '{}'", step.id));
        }
        steps.push(step);
    }
    Ok(steps)
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    for step in sub_steps(config)? {
        let kind = step.executor_kind()?;
        check_step_config(kind, &step.config)
            .map_err(|e| format!("sub-step '{}': {}", step.id, e))?;
    }
    Ok(())
}

#[async_trait]
impl StepExecutor for ParallelExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, dispatcher: &Dispatcher) -> StepResult {
        let steps = match sub_steps(invocation.config) {
            Ok(steps) => steps,
            Err(message) => return StepResult::definition(message),
        };

        tracing::debug!("🔀 Fanning out {} sub-steps in {}", steps.len(), invocation.step_id);
        let results = join_all(steps.iter().map(|step| {
            dispatcher.dispatch_with_retry(
                step,
                invocation.context,
                invocation.previous,
                invocation.payload,
                invocation.retry,
            )
        }))
        .await;

        let failed: Vec<(&Step, &StepResult)> = steps
            .iter()
            .zip(results.iter())
            .filter(|(_, result)| !result.success)
            .collect();

        let entries: Vec<Value> = steps
            .iter()
            .zip(results.iter())
            .map(|(step, result)| {
                let mut entry = result.to_value();
                if let Value::Object(map) = &mut entry {
                    map.insert("id".to_string(), json!(step.id));
                    map.insert("name".to_string(), json!(step.display_name()));
                }
                entry
            })
            .collect();

        let data = json!({
            "results": entries,
            "succeeded": steps.len() - failed.len(),
            "failed": failed.len(),
        });

        if failed.is_empty() {
            return StepResult::ok(data);
        }

        let names: Vec<&str> = failed.iter().map(|(step, _)| step.id.as_str()).collect();
        // sub-steps already spent their retries
        let kind = failed
            .iter()
            .find_map(|(_, result)| result.failure_kind().filter(|k| !k.is_retryable()))
            .unwrap_or(FailureKind::Rejected);
        StepResult::failure(kind, format!("parallel sub-steps failed: {}", names.join(", ")))
            .with_data(data)
    }
}
