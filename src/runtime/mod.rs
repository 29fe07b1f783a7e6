/// Runtime execution layer
///
/// Everything that happens once a workflow is registered:
/// - Placeholder resolution and condition evaluation
/// - Step executors behind a dispatcher
/// - The engine that drives runs with retries, signals and timeouts
/// - Run registry, durable history and the cron scheduler

// Placeholder substitution over JSON configs
pub mod resolver;

// Fixed-form condition language
pub mod condition;

// Step outcomes and failure classification
pub mod result;

// Run state, log entries and signals
pub mod run;

// In-memory run registry with per-run control channels
pub mod runs;

// SQLite snapshots of finished runs
pub mod history;

// Executor trait, registry and dispatcher
pub mod executor;

// One executor per step kind
pub mod steps;

// Run driver
pub mod engine;

// Cron schedules
pub mod scheduler;

pub use engine::{Engine, EngineBuilder, RunOutcome};
pub use result::{FailureKind, StepError, StepResult};
pub use run::{LogEntry, LogLevel, Run, RunStatus, RunSummary, Signal};
pub use scheduler::{Schedule, ScheduleRequest, ScheduleStorage, SchedulerService};
