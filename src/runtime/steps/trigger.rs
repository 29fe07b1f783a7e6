use crate::runtime::executor::{Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::StepResult;
use async_trait::async_trait;

/// Passes the trigger payload through as the step's data
#[derive(Debug, Default)]
pub struct TriggerExecutor;

#[async_trait]
impl StepExecutor for TriggerExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        StepResult::ok(invocation.payload.clone())
    }
}
