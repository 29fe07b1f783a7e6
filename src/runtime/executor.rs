/// Step executor seam and dispatch
///
/// Every step kind has exactly one `StepExecutor`. The `ExecutorRegistry` holds
/// one field per `ExecutorKind` and resolves them with an exhaustive match, so a
/// new kind cannot be added without an executor. The `Dispatcher` resolves
/// placeholders in a step's config, picks the executor and runs it; it is also
/// handed to executors so parallel groups can dispatch their sub-steps.

use crate::integrations::{DataStore, ExternalCaller, MemoryDataStore, Notifier};
use crate::runtime::{
    resolver,
    result::StepResult,
    steps::{
        api_call::ApiCallExecutor, calculation::CalculationExecutor,
        conditional::ConditionalExecutor, database::DatabaseExecutor,
        notification::NotificationExecutor, parallel::ParallelExecutor, trigger::TriggerExecutor,
        validation::ValidationExecutor, wait::WaitExecutor,
    },
};
use crate::workflow::types::{ExecutorKind, RetryPolicy, Step};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::Value;
use std::sync::Arc;

/// Everything an executor sees for one attempt of one step
#[derive(Debug)]
pub struct StepInvocation<'a> {
    pub step_id: &'a str,
    pub step_name: &'a str,
    pub kind: ExecutorKind,
    /// Config after placeholder resolution
    pub config: &'a Value,
    pub context: &'a Value,
    pub previous: Option<&'a StepResult>,
    pub payload: &'a Value,
    /// Policy applied to sub-steps dispatched by this step
    pub retry: &'a RetryPolicy,
}

#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// Never fails: errors are reported through the returned `StepResult`
    async fn execute(&self, invocation: &StepInvocation<'_>, dispatcher: &Dispatcher) -> StepResult;
}

/// Collaborators shared by the built-in executors
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn DataStore>,
    pub caller: Arc<dyn ExternalCaller>,
    pub notifier: Notifier,
}

impl Collaborators {
    pub fn new(caller: Arc<dyn ExternalCaller>) -> Self {
        Self {
            store: Arc::new(MemoryDataStore::new()),
            caller,
            notifier: Notifier::new(),
        }
    }
}

/// One executor per step kind
pub struct ExecutorRegistry {
    trigger: Arc<dyn StepExecutor>,
    data_validation: Arc<dyn StepExecutor>,
    api_call: Arc<dyn StepExecutor>,
    database_operation: Arc<dyn StepExecutor>,
    notification: Arc<dyn StepExecutor>,
    calculation: Arc<dyn StepExecutor>,
    conditional: Arc<dyn StepExecutor>,
    parallel: Arc<dyn StepExecutor>,
    wait: Arc<dyn StepExecutor>,
}

impl ExecutorRegistry {
    /// Built-in executors wired to the given collaborators
    pub fn standard(collaborators: Collaborators) -> Self {
        Self {
            trigger: Arc::new(TriggerExecutor),
            data_validation: Arc::new(ValidationExecutor::new(Arc::clone(&collaborators.store))),
            api_call: Arc::new(ApiCallExecutor::new(Arc::clone(&collaborators.caller))),
            database_operation: Arc::new(DatabaseExecutor::new(Arc::clone(&collaborators.store))),
            notification: Arc::new(NotificationExecutor::new(collaborators.notifier.clone())),
            calculation: Arc::new(CalculationExecutor),
            conditional: Arc::new(ConditionalExecutor),
            parallel: Arc::new(ParallelExecutor),
            wait: Arc::new(WaitExecutor),
        }
    }

    /// Replace the executor for one kind
    pub fn with_executor(mut self, kind: ExecutorKind, executor: Arc<dyn StepExecutor>) -> Self {
        match kind {
            ExecutorKind::Trigger => self.trigger = executor,
            ExecutorKind::DataValidation => self.data_validation = executor,
            ExecutorKind::ApiCall => self.api_call = executor,
            ExecutorKind::DatabaseOperation => self.database_operation = executor,
            ExecutorKind::Notification => self.notification = executor,
            ExecutorKind::Calculation => self.calculation = executor,
            ExecutorKind::Conditional => self.conditional = executor,
            ExecutorKind::Parallel => self.parallel = executor,
            ExecutorKind::Wait => self.wait = executor,
        }
        self
    }

    pub fn get(&self, kind: ExecutorKind) -> &dyn StepExecutor {
        match kind {
            ExecutorKind::Trigger => self.trigger.as_ref(),
            ExecutorKind::DataValidation => self.data_validation.as_ref(),
            ExecutorKind::ApiCall => self.api_call.as_ref(),
            ExecutorKind::DatabaseOperation => self.database_operation.as_ref(),
            ExecutorKind::Notification => self.notification.as_ref(),
            ExecutorKind::Calculation => self.calculation.as_ref(),
            ExecutorKind::Conditional => self.conditional.as_ref(),
            ExecutorKind::Parallel => self.parallel.as_ref(),
            ExecutorKind::Wait => self.wait.as_ref(),
        }
    }
}

/// Static config checks run at registration time
pub fn check_config(kind: ExecutorKind, config: &Value) -> Result<(), String> {
    use crate::runtime::steps;

    if !config.is_object() {
        return Err("config must be a JSON object".to_string());
    }
    match kind {
        ExecutorKind::Trigger => Ok(()),
        ExecutorKind::DataValidation => steps::validation::check_config(config),
        ExecutorKind::ApiCall => steps::api_call::check_config(config),
        ExecutorKind::DatabaseOperation => steps::database::check_config(config),
        ExecutorKind::Notification => steps::notification::check_config(config),
        ExecutorKind::Calculation => steps::calculation::check_config(config),
        ExecutorKind::Conditional => steps::conditional::check_config(config),
        ExecutorKind::Parallel => steps::parallel::check_config(config),
        ExecutorKind::Wait => steps::wait::check_config(config),
    }
}

/// True when a string still holds a placeholder that resolves at run time
pub(crate) fn is_placeholder(value: &Value) -> bool {
    value.as_str().is_some_and(|s| s.contains("{{"))
}

/// Resolves and runs single steps
#[derive(Clone)]
pub struct Dispatcher {
    executors: Arc<ExecutorRegistry>,
}

impl Dispatcher {
    pub fn new(executors: ExecutorRegistry) -> Self {
        Self {
            executors: Arc::new(executors),
        }
    }

    /// Run one attempt of `step`
    pub fn dispatch<'a>(
        &'a self,
        step: &'a Step,
        context: &'a Value,
        previous: Option<&'a StepResult>,
        payload: &'a Value,
        retry: &'a RetryPolicy,
    ) -> BoxFuture<'a, StepResult> {
        async move {
            let kind = match step.executor_kind() {
                Ok(kind) => kind,
                Err(message) => return StepResult::definition(message),
            };

            // sub-steps of a group resolve their own config when dispatched
            let config = match kind {
                ExecutorKind::Parallel => step.config.clone(),
                _ => resolver::resolve(&step.config, context),
            };
            let invocation = StepInvocation {
                step_id: &step.id,
                step_name: step.display_name(),
                kind,
                config: &config,
                context,
                previous,
                payload,
                retry,
            };

            let started = tokio::time::Instant::now();
            tracing::debug!("⚙️ Executing {} step: {}", kind.as_str(), step.id);
            let result = self.executors.get(kind).execute(&invocation, self).await;
            tracing::debug!(
                "⏱️ Step {} finished in {:?} (success: {})",
                step.id,
                started.elapsed(),
                result.success
            );
            result
        }
        .boxed()
    }

    /// Run `step` with retries on transient failures
    ///
    /// Used for sub-steps of parallel groups; top-level steps are retried by the
    /// engine so each retry lands in the run log.
    pub async fn dispatch_with_retry(
        &self,
        step: &Step,
        context: &Value,
        previous: Option<&StepResult>,
        payload: &Value,
        retry: &RetryPolicy,
    ) -> StepResult {
        let attempts = retry.attempts();
        let mut attempt = 1;
        loop {
            let result = self.dispatch(step, context, previous, payload, retry).await;
            if !result.is_retryable() || attempt >= attempts {
                return result.with_metadata("attempts", attempt);
            }

            let delay = retry.delay_for_retry(attempt - 1);
            tracing::warn!(
                "🔁 Sub-step {} attempt {}/{} failed: {}; retrying in {:?}",
                step.id,
                attempt,
                attempts,
                result.error_message().unwrap_or("unknown error"),
                delay
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use serde_json::json;

    struct Fixed;

    #[async_trait]
    impl StepExecutor for Fixed {
        async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
            StepResult::ok(json!({"config": invocation.config.clone()}))
        }
    }

    #[tokio::test]
    async fn test_dispatch_resolves_config_before_execution() {
        let registry = ExecutorRegistry::standard(Collaborators::new(Arc::new(MockCaller::new())))
            .with_executor(ExecutorKind::Calculation, Arc::new(Fixed));
        let dispatcher = Dispatcher::new(registry);

        let result = run_step(
            &dispatcher,
            json!({"id": "calc", "kind": "action", "action": "calculation",
                   "config": {"value": "{{amount}}", "label": "total {{amount}}"}}),
            json!({"amount": 12}),
        )
        .await;

        assert!(result.success);
        assert_eq!(
            result.data.unwrap()["config"],
            json!({"value": 12, "label": "total 12"})
        );
    }

    #[tokio::test]
    async fn test_dispatch_reports_missing_action_as_definition_failure() {
        let dispatcher = default_dispatcher();
        let result = run_step(&dispatcher, json!({"id": "x", "kind": "action"}), json!({})).await;
        assert!(!result.success);
        assert_eq!(
            result.failure_kind(),
            Some(crate::runtime::result::FailureKind::Definition)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_with_retry_stops_after_max_attempts() {
        let caller = Arc::new(MockCaller::new().fail("down").fail("down").fail("down").fail("down"));
        let dispatcher = dispatcher_with(Collaborators::new(caller.clone()));
        let step: Step = serde_json::from_value(json!({
            "id": "call", "kind": "action", "action": "api_call",
            "config": {"endpoint": "https://api.example.com/x"}
        }))
        .unwrap();
        let policy = RetryPolicy::default().with_max_attempts(3).with_base_delay_ms(10);

        let result = dispatcher
            .dispatch_with_retry(&step, &json!({}), None, &json!({}), &policy)
            .await;

        assert!(!result.success);
        assert_eq!(caller.request_count(), 3);
        assert_eq!(result.metadata["attempts"], json!(3));
    }
}
