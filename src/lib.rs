/// Flowrelay: workflow execution engine
///
/// Registers declarative workflow definitions, drives runs through their step
/// graph with retries, signals and timeouts, fires them on cron schedules and
/// exposes the whole thing over a small HTTP API.

// Configuration loaded from the environment
pub mod config;

// Engine-level error type
pub mod error;

// Collaborators: storage, external calls, notifications, audit
pub mod integrations;

// Workflow definitions, validation, storage and registry
pub mod workflow;

// Engine, executors, runs and scheduler
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub use error::{EngineError, EngineResult};
pub use runtime::{Engine, RunOutcome, RunStatus, SchedulerService, Signal};
pub use server::start_server;
pub use workflow::{Step, WorkflowDefinition};
