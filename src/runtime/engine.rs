/// Workflow execution engine
///
/// Drives runs through their step graph: the trigger step first, then a
/// depth-first walk over successors where each step executes at most once.
/// Step results land in the run context under the step id. Transient failures
/// are retried with exponential backoff; any other failure ends the run.
/// Pause/cancel signals and the definition timeout are honoured at step
/// boundaries only, so an in-flight step always finishes.

use crate::error::{EngineError, EngineResult};
use crate::integrations::{
    AuditSink, DataStore, ExternalCaller, HttpCaller, LogChannel, Notifier, TracingAuditSink,
};
use crate::runtime::executor::{Collaborators, Dispatcher, ExecutorRegistry, StepExecutor};
use crate::runtime::history::RunHistory;
use crate::runtime::result::StepResult;
use crate::runtime::run::{LogEntry, LogLevel, Run, RunStatus, RunSummary, Signal};
use crate::runtime::runs::{RunControl, RunHandle, RunRegistry};
use crate::workflow::registry::{CompiledWorkflow, WorkflowRegistry};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ExecutorKind, RetryPolicy, Step, StepKind, WorkflowDefinition};
use serde::Serialize;
use serde_json::Value;
use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};
use tokio::sync::watch;
use tokio::time::Instant;

/// Terminal view of a run returned to callers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RunOutcome {
    Completed {
        run_id: String,
        context: Value,
    },
    Failed {
        run_id: String,
        failed_step: Option<String>,
        error: String,
        /// Full result of the failing step, e.g. validation violations
        #[serde(skip_serializing_if = "Option::is_none")]
        step_result: Option<Value>,
        log: Vec<LogEntry>,
    },
    Cancelled {
        run_id: String,
        log: Vec<LogEntry>,
    },
}

impl RunOutcome {
    /// `None` while the run has not terminated
    pub fn from_run(run: &Run) -> Option<Self> {
        let outcome = match run.status {
            RunStatus::Completed => RunOutcome::Completed {
                run_id: run.id.clone(),
                context: run.context_value(),
            },
            RunStatus::Failed => RunOutcome::Failed {
                run_id: run.id.clone(),
                failed_step: run.failed_step.clone(),
                error: run.error.clone().unwrap_or_default(),
                step_result: run
                    .failed_step
                    .as_ref()
                    .and_then(|step| run.context.get(step))
                    .cloned(),
                log: run.log.clone(),
            },
            RunStatus::Cancelled => RunOutcome::Cancelled {
                run_id: run.id.clone(),
                log: run.log.clone(),
            },
            RunStatus::Running | RunStatus::Paused => return None,
        };
        Some(outcome)
    }

    pub fn run_id(&self) -> &str {
        match self {
            RunOutcome::Completed { run_id, .. }
            | RunOutcome::Failed { run_id, .. }
            | RunOutcome::Cancelled { run_id, .. } => run_id,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            RunOutcome::Completed { .. } => RunStatus::Completed,
            RunOutcome::Failed { .. } => RunStatus::Failed,
            RunOutcome::Cancelled { .. } => RunStatus::Cancelled,
        }
    }
}

/// Why a walk stopped before exhausting the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StopReason {
    Cancelled,
    TimedOut(Duration),
}

enum Termination {
    Completed,
    Failed { step: String, message: String },
    Stopped(StopReason),
}

#[derive(Clone)]
pub struct Engine {
    /// Published definitions; runs hold their own `Arc` snapshot
    workflows: Arc<WorkflowRegistry>,
    /// Live run handles plus optional history
    runs: Arc<RunRegistry>,
    /// Routes each step to its executor
    dispatcher: Dispatcher,
    /// Used when a definition carries no retry policy
    default_retry: RetryPolicy,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn workflows(&self) -> &Arc<WorkflowRegistry> {
        &self.workflows
    }

    pub fn runs(&self) -> &Arc<RunRegistry> {
        &self.runs
    }

    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> EngineResult<Arc<CompiledWorkflow>> {
        self.workflows.register(definition).await
    }

    /// Start a run in the background and return its id immediately
    pub async fn start_workflow(&self, name: &str, input: Value) -> EngineResult<String> {
        let (handle, workflow) = self.create_run(name, &input).await?;
        let run_id = handle.id.clone();

        let engine = self.clone();
        tokio::spawn(async move {
            engine.drive(handle, workflow, input).await;
        });

        Ok(run_id)
    }

    /// Start a run and wait for it to terminate
    pub async fn execute_workflow(&self, name: &str, input: Value) -> EngineResult<RunOutcome> {
        let run_id = self.start_workflow(name, input).await?;
        self.wait_for_run(&run_id).await
    }

    /// Deliver pause/resume/cancel to a live run
    pub async fn signal(&self, run_id: &str, signal: Signal) -> EngineResult<()> {
        let Some(handle) = self.runs.get(run_id).await else {
            let run = self.runs.snapshot(run_id).await?;
            return Err(EngineError::RunTerminated {
                run_id: run_id.to_string(),
                status: run.status,
            });
        };

        let status = handle.status();
        if status.is_terminal() {
            return Err(EngineError::RunTerminated {
                run_id: run_id.to_string(),
                status,
            });
        }

        let requested = match signal {
            Signal::Pause => RunControl::Paused,
            Signal::Resume => RunControl::Running,
            Signal::Cancel => RunControl::Cancelled,
        };
        let changed = handle.request(requested);
        tracing::info!("📨 Signal {} for run {} (state changed: {})", signal, run_id, changed);
        Ok(())
    }

    pub async fn query_status(&self, run_id: &str) -> EngineResult<RunStatus> {
        match self.runs.get(run_id).await {
            Some(handle) => Ok(handle.status()),
            None => Ok(self.runs.snapshot(run_id).await?.status),
        }
    }

    pub async fn get_log(&self, run_id: &str) -> EngineResult<Vec<LogEntry>> {
        Ok(self.runs.snapshot(run_id).await?.log)
    }

    pub async fn get_run(&self, run_id: &str) -> EngineResult<Run> {
        self.runs.snapshot(run_id).await
    }

    pub async fn list_runs(&self) -> EngineResult<Vec<RunSummary>> {
        self.runs.list().await
    }

    pub async fn purge_run(&self, run_id: &str) -> EngineResult<bool> {
        self.runs.purge(run_id).await
    }

    /// Wait for a run to reach a terminal state
    pub async fn wait_for_run(&self, run_id: &str) -> EngineResult<RunOutcome> {
        if let Some(handle) = self.runs.get(run_id).await {
            handle.wait_terminal().await;
        }
        let run = self.runs.snapshot(run_id).await?;
        RunOutcome::from_run(&run).ok_or(EngineError::RunActive {
            run_id: run_id.to_string(),
            status: run.status,
        })
    }

    async fn create_run(&self, name: &str, input: &Value) -> EngineResult<(Arc<RunHandle>, Arc<CompiledWorkflow>)> {
        let workflow = self
            .workflows
            .get_workflow(name)
            .ok_or_else(|| EngineError::WorkflowNotFound(name.to_string()))?;
        if !workflow.definition.active {
            return Err(EngineError::WorkflowInactive(name.to_string()));
        }

        let handle = self.runs.create(Run::new(name, input)).await;
        self.runs
            .append_log(&handle, LogLevel::Debug, None, format!("run started for workflow {}", name))
            .await;
        tracing::info!("🚀 Starting run {} of workflow {}", handle.id, name);

        Ok((handle, workflow))
    }

    async fn drive(&self, handle: Arc<RunHandle>, workflow: Arc<CompiledWorkflow>, payload: Value) {
        let started = Instant::now();
        let termination = self.walk(&handle, &workflow, &payload).await;

        match termination {
            Termination::Completed => {
                self.runs
                    .append_log(
                        &handle,
                        LogLevel::Info,
                        None,
                        format!("workflow {} completed in {:?}", workflow.name(), started.elapsed()),
                    )
                    .await;
                handle.update(|run| run.finish(RunStatus::Completed)).await;
            }
            Termination::Failed { step, message } => {
                let name = workflow
                    .step(&step)
                    .map(|s| s.display_name().to_string())
                    .unwrap_or_else(|| step.clone());
                self.runs
                    .append_log(
                        &handle,
                        LogLevel::Error,
                        Some(step.as_str()),
                        format!("step {} failed: {}", name, message),
                    )
                    .await;
                handle
                    .update(|run| {
                        run.failed_step = Some(step);
                        run.error = Some(message);
                        run.finish(RunStatus::Failed);
                    })
                    .await;
            }
            Termination::Stopped(reason) => {
                let message = match reason {
                    StopReason::Cancelled => "run cancelled".to_string(),
                    StopReason::TimedOut(limit) => format!("run timed out after {:?}", limit),
                };
                self.runs
                    .append_log(&handle, LogLevel::Warn, None, message)
                    .await;
                handle.update(|run| run.finish(RunStatus::Cancelled)).await;
            }
        }

        if let Err(e) = self.runs.persist(&handle).await {
            tracing::error!("❌ Failed to persist run {}: {}", handle.id, e);
        }
    }

    async fn walk(&self, handle: &RunHandle, workflow: &CompiledWorkflow, payload: &Value) -> Termination {
        let definition = &workflow.definition;
        let retry = definition
            .retry
            .clone()
            .unwrap_or_else(|| self.default_retry.clone());
        let timeout = definition.timeout();
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut control = handle.control();

        let trigger = &definition.trigger;
        handle
            .update(|run| run.current_step = Some(trigger.id.clone()))
            .await;
        self.runs
            .append_log(handle, LogLevel::Debug, Some(trigger.id.as_str()), "trigger fired")
            .await;
        let context = handle.read(Run::context_value).await;
        let mut previous = self
            .dispatcher
            .dispatch(trigger, &context, None, payload, &retry)
            .await;
        handle.update(|run| run.record_step(&trigger.id, &previous)).await;
        if !previous.success {
            return Termination::Failed {
                step: trigger.id.clone(),
                message: previous.error_message().unwrap_or("trigger failed").to_string(),
            };
        }

        let mut visited = HashSet::from([trigger.id.clone()]);
        let mut pending = Vec::new();
        push_successors(&mut pending, trigger, &previous);

        while let Some(step_id) = pending.pop() {
            if !visited.insert(step_id.clone()) {
                continue;
            }

            if let Some(reason) = self
                .boundary(handle, &mut control, deadline, timeout, &step_id)
                .await
            {
                return Termination::Stopped(reason);
            }

            let Some(step) = workflow.step(&step_id) else {
                return Termination::Failed {
                    step: step_id.clone(),
                    message: format!("unknown step '{}'", step_id),
                };
            };

            handle
                .update(|run| run.current_step = Some(step.id.clone()))
                .await;
            self.runs
                .append_log(
                    handle,
                    LogLevel::Debug,
                    Some(step.id.as_str()),
                    format!("starting step {}", step.display_name()),
                )
                .await;

            let context = handle.read(Run::context_value).await;
            let inputs = StepAttempt {
                step,
                context: &context,
                previous: &previous,
                payload,
                retry: &retry,
            };
            let result = match self
                .execute_step(handle, inputs, &mut control, deadline, timeout)
                .await
            {
                Ok(result) => result,
                Err(reason) => return Termination::Stopped(reason),
            };
            handle.update(|run| run.record_step(&step.id, &result)).await;

            if !result.success {
                return Termination::Failed {
                    step: step.id.clone(),
                    message: result.error_message().unwrap_or("step failed").to_string(),
                };
            }

            self.runs
                .append_log(
                    handle,
                    LogLevel::Info,
                    Some(step.id.as_str()),
                    format!("step {} completed", step.display_name()),
                )
                .await;

            push_successors(&mut pending, step, &result);
            previous = result;
        }

        Termination::Completed
    }

    /// Run one step, retrying transient failures per the policy
    ///
    /// Cancel and the deadline are observed between attempts; an attempt in
    /// flight always finishes.
    async fn execute_step(
        &self,
        handle: &RunHandle,
        inputs: StepAttempt<'_>,
        control: &mut watch::Receiver<RunControl>,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
    ) -> Result<StepResult, StopReason> {
        let StepAttempt {
            step,
            context,
            previous,
            payload,
            retry,
        } = inputs;
        // parallel groups retry their sub-steps individually
        let attempts = match step.executor_kind() {
            Ok(ExecutorKind::Parallel) => 1,
            _ => retry.attempts(),
        };

        let mut attempt = 1;
        loop {
            let result = self
                .dispatcher
                .dispatch(step, context, Some(previous), payload, retry)
                .await;
            if !result.is_retryable() || attempt >= attempts {
                return Ok(result.with_metadata("attempts", attempt));
            }

            let delay = retry.delay_for_retry(attempt - 1);
            self.runs
                .append_log(
                    handle,
                    LogLevel::Warn,
                    Some(step.id.as_str()),
                    format!(
                        "attempt {}/{} of step {} failed: {}; retrying in {:?}",
                        attempt,
                        attempts,
                        step.display_name(),
                        result.error_message().unwrap_or("unknown error"),
                        delay
                    ),
                )
                .await;
            if let Some(reason) = backoff(control, delay, deadline, timeout).await {
                return Err(reason);
            }
            attempt += 1;
        }
    }

    /// Observe signals and the deadline before `next_step` starts
    async fn boundary(
        &self,
        handle: &RunHandle,
        control: &mut watch::Receiver<RunControl>,
        deadline: Option<Instant>,
        timeout: Option<Duration>,
        next_step: &str,
    ) -> Option<StopReason> {
        let timed_out = StopReason::TimedOut(timeout.unwrap_or_default());
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(timed_out);
        }

        let requested = *control.borrow_and_update();
        match requested {
            RunControl::Running => return None,
            RunControl::Cancelled => return Some(StopReason::Cancelled),
            RunControl::Paused => {}
        }

        handle.update(|run| run.status = RunStatus::Paused).await;
        self.runs
            .append_log(
                handle,
                LogLevel::Warn,
                None,
                format!("run paused before step {}", next_step),
            )
            .await;

        loop {
            let changed = match deadline {
                Some(deadline) => tokio::select! {
                    changed = control.changed() => changed,
                    _ = tokio::time::sleep_until(deadline) => return Some(timed_out),
                },
                None => control.changed().await,
            };
            if changed.is_err() {
                return Some(StopReason::Cancelled);
            }

            let requested = *control.borrow_and_update();
            match requested {
                RunControl::Paused => continue,
                RunControl::Cancelled => return Some(StopReason::Cancelled),
                RunControl::Running => {
                    handle.update(|run| run.status = RunStatus::Running).await;
                    self.runs
                        .append_log(
                            handle,
                            LogLevel::Warn,
                            None,
                            format!("run resumed before step {}", next_step),
                        )
                        .await;
                    return None;
                }
            }
        }
    }
}

/// Inputs shared by every attempt of one step
struct StepAttempt<'a> {
    step: &'a Step,
    context: &'a Value,
    previous: &'a StepResult,
    payload: &'a Value,
    retry: &'a RetryPolicy,
}

/// Sleep out a retry delay unless cancel or the deadline comes first
///
/// Pause is left for the next step boundary.
async fn backoff(
    control: &mut watch::Receiver<RunControl>,
    delay: Duration,
    deadline: Option<Instant>,
    timeout: Option<Duration>,
) -> Option<StopReason> {
    let timed_out = StopReason::TimedOut(timeout.unwrap_or_default());
    let wake = Instant::now() + delay;
    let stop_at = match deadline {
        Some(deadline) if deadline <= wake => Some(deadline),
        _ => None,
    };
    let mut listening = true;

    loop {
        if *control.borrow_and_update() == RunControl::Cancelled {
            return Some(StopReason::Cancelled);
        }
        let until = stop_at.unwrap_or(wake);
        if Instant::now() >= until {
            return stop_at.map(|_| timed_out);
        }

        if !listening {
            tokio::time::sleep_until(until).await;
            continue;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(until) => {}
            changed = control.changed() => {
                // no sender left, nothing more can be requested
                if changed.is_err() {
                    listening = false;
                }
            }
        }
    }
}

/// Push successors so the first declared one is popped first
fn push_successors(pending: &mut Vec<String>, step: &Step, result: &StepResult) {
    let mut successors = Vec::new();
    if step.kind == StepKind::Condition {
        let outcome = result
            .data
            .as_ref()
            .and_then(|d| d.get("result"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        successors.extend(step.branch(outcome));
    }
    successors.extend(step.next.iter().cloned());

    for id in successors.into_iter().rev() {
        pending.push(id);
    }
}

/// Wires collaborators, registries and executors into an `Engine`
pub struct EngineBuilder {
    store: Option<Arc<dyn DataStore>>,
    caller: Option<Arc<dyn ExternalCaller>>,
    notifier: Option<Notifier>,
    audit: Option<Arc<dyn AuditSink>>,
    workflow_storage: Option<WorkflowStorage>,
    history: Option<RunHistory>,
    default_retry: RetryPolicy,
    services: HashMap<String, String>,
    overrides: Vec<(ExecutorKind, Arc<dyn StepExecutor>)>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self {
            store: None,
            caller: None,
            notifier: None,
            audit: None,
            workflow_storage: None,
            history: None,
            default_retry: RetryPolicy::default(),
            services: HashMap::new(),
            overrides: Vec::new(),
        }
    }
}

impl EngineBuilder {
    pub fn data_store(mut self, store: Arc<dyn DataStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn caller(mut self, caller: Arc<dyn ExternalCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Base URLs for the default `HttpCaller`
    pub fn services(mut self, services: HashMap<String, String>) -> Self {
        self.services = services;
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn workflow_storage(mut self, storage: WorkflowStorage) -> Self {
        self.workflow_storage = Some(storage);
        self
    }

    pub fn history(mut self, history: RunHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn default_retry(mut self, policy: RetryPolicy) -> Self {
        self.default_retry = policy;
        self
    }

    pub fn executor(mut self, kind: ExecutorKind, executor: Arc<dyn StepExecutor>) -> Self {
        self.overrides.push((kind, executor));
        self
    }

    pub fn build(self) -> Engine {
        let caller = self
            .caller
            .unwrap_or_else(|| Arc::new(HttpCaller::new(self.services, Duration::from_secs(30))));
        let notifier = self
            .notifier
            .unwrap_or_else(|| Notifier::new().with_channel("log", Arc::new(LogChannel::new("log"))));

        let mut collaborators = Collaborators::new(caller);
        if let Some(store) = self.store {
            collaborators.store = store;
        }
        collaborators.notifier = notifier;

        let mut executors = ExecutorRegistry::standard(collaborators);
        for (kind, executor) in self.overrides {
            executors = executors.with_executor(kind, executor);
        }

        let audit = self
            .audit
            .unwrap_or_else(|| Arc::new(TracingAuditSink));

        Engine {
            workflows: Arc::new(WorkflowRegistry::new(self.workflow_storage)),
            runs: Arc::new(RunRegistry::new(audit, self.history)),
            dispatcher: Dispatcher::new(executors),
            default_retry: self.default_retry,
        }
    }
}
