use crate::runtime::condition::Condition;
use crate::runtime::executor::{Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::StepResult;
use async_trait::async_trait;
use serde_json::{json, Value};

/// Evaluates `expression`; the engine follows `on_true` / `on_false` from `data.result`
#[derive(Debug, Default)]
pub struct ConditionalExecutor;

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    let expression = config
        .get("expression")
        .and_then(Value::as_str)
        .ok_or("condition step requires an 'expression' string")?;
    if expression.contains("{{") {
        return Ok(());
    }
    expression.parse::<Condition>().map(|_| ())
}

#[async_trait]
impl StepExecutor for ConditionalExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        let Some(expression) = invocation.config.get("expression").and_then(Value::as_str) else {
            return StepResult::definition("condition step requires an 'expression' string");
        };
        let condition = match expression.parse::<Condition>() {
            Ok(condition) => condition,
            Err(message) => return StepResult::definition(message),
        };

        let outcome = condition.evaluate(invocation.context, invocation.previous);
        tracing::debug!("🔀 Condition '{}' evaluated to {}", expression, outcome);
        StepResult::ok(json!({ "result": outcome, "expression": expression }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::executor::testing::{default_dispatcher, run_step};

    #[tokio::test]
    async fn test_reports_boolean_result() {
        let dispatcher = default_dispatcher();
        let step = json!({"id": "gate", "kind": "condition",
                          "config": {"expression": "quality_score < 80"}});

        let low = run_step(&dispatcher, step.clone(), json!({"quality_score": 60})).await;
        assert_eq!(low.data.unwrap()["result"], json!(true));

        let high = run_step(&dispatcher, step, json!({"quality_score": 95})).await;
        assert_eq!(high.data.unwrap()["result"], json!(false));
    }

    #[test]
    fn test_check_config() {
        assert!(check_config(&json!({"expression": "previous_succeeded"})).is_ok());
        assert!(check_config(&json!({"expression": "a ~ b"})).is_err());
        assert!(check_config(&json!({})).is_err());
    }
}
