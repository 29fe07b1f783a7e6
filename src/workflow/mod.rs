/// Workflow definition layer
///
/// Definitions, their validation into a step graph, SQLite persistence and the
/// lock-free registry runs read from.

// Definition types (WorkflowDefinition, Step, RetryPolicy)
pub mod types;

// Graph validation with petgraph
pub mod graph;

// SQLite persistence layer for workflow storage
pub mod storage;

// Hot-swappable registry using ArcSwap
pub mod registry;

pub use registry::{CompiledWorkflow, WorkflowRegistry};
pub use storage::WorkflowStorage;
pub use types::{ActionKind, ExecutorKind, RetryPolicy, Step, StepKind, WorkflowDefinition};
