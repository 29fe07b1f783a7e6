/// Hot-reload workflow registry using ArcSwap
///
/// Lock-free reads of compiled workflows. Every update swaps the whole map, and
/// each entry is an `Arc<CompiledWorkflow>`, so runs that already hold a
/// definition keep executing it unchanged while new runs see the replacement.

use crate::error::{EngineError, EngineResult};
use crate::workflow::{graph::StepGraph, storage::WorkflowStorage, types::{Step, WorkflowDefinition}};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

/// Validated definition plus lookup tables for execution
#[derive(Debug)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: StepGraph,
    /// step id → position in `definition.steps` (`None` for the trigger)
    positions: HashMap<String, Option<usize>>,
}

impl CompiledWorkflow {
    pub fn compile(definition: WorkflowDefinition) -> EngineResult<Self> {
        let graph = StepGraph::build(&definition)
            .map_err(|reason| EngineError::invalid_definition(&definition.name, reason))?;

        let unreachable = graph.unreachable();
        if !unreachable.is_empty() {
            tracing::warn!(
                "⚠️ Workflow {} has steps unreachable from its trigger: {:?}",
                definition.name,
                unreachable
            );
        }

        let mut positions = HashMap::with_capacity(definition.steps.len() + 1);
        positions.insert(definition.trigger.id.clone(), None);
        for (i, step) in definition.steps.iter().enumerate() {
            positions.insert(step.id.clone(), Some(i));
        }

        Ok(Self {
            definition,
            graph,
            positions,
        })
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        match self.positions.get(id)? {
            None => Some(&self.definition.trigger),
            Some(i) => self.definition.steps.get(*i),
        }
    }
}

#[derive(Debug)]
pub struct WorkflowRegistry {
    /// Key: workflow name
    workflows: ArcSwap<HashMap<String, Arc<CompiledWorkflow>>>,
    /// Optional persistence; registrations are written through
    storage: Option<WorkflowStorage>,
}

impl WorkflowRegistry {
    pub fn new(storage: Option<WorkflowStorage>) -> Self {
        Self {
            workflows: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(None)
    }

    /// Populate the registry from storage at startup
    ///
    /// Definitions that no longer validate are skipped with an error log.
    pub async fn init_from_storage(&self) -> EngineResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };

        let stored = storage.load_all_workflows().await?;
        let mut compiled = HashMap::with_capacity(stored.len());
        for (name, definition) in stored {
            match CompiledWorkflow::compile(definition) {
                Ok(workflow) => {
                    compiled.insert(name, Arc::new(workflow));
                }
                Err(e) => tracing::error!("❌ Skipping stored workflow {}: {}", name, e),
            }
        }

        self.workflows.store(Arc::new(compiled));
        tracing::info!(
            "📊 Initialized workflow registry with {} workflows",
            self.workflows.load().len()
        );
        Ok(())
    }

    /// Validate, persist and publish a definition (create or replace)
    pub async fn register(&self, definition: WorkflowDefinition) -> EngineResult<Arc<CompiledWorkflow>> {
        let compiled = Arc::new(CompiledWorkflow::compile(definition)?);

        if let Some(storage) = &self.storage {
            storage.save_workflow(&compiled.definition).await?;
        }

        self.publish(Arc::clone(&compiled));
        tracing::info!("🔄 Registered workflow: {}", compiled.name());
        Ok(compiled)
    }

    fn publish(&self, compiled: Arc<CompiledWorkflow>) {
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(compiled.name().to_string(), Arc::clone(&compiled));
            next
        });
    }

    pub fn get_workflow(&self, name: &str) -> Option<Arc<CompiledWorkflow>> {
        self.workflows.load().get(name).cloned()
    }

    /// All workflows sorted by name
    pub fn list(&self) -> Vec<Arc<CompiledWorkflow>> {
        let mut workflows: Vec<_> = self.workflows.load().values().cloned().collect();
        workflows.sort_by(|a, b| a.name().cmp(b.name()));
        workflows
    }

    /// Remove from memory and storage; returns whether it existed
    pub async fn remove_workflow(&self, name: &str) -> EngineResult<bool> {
        if let Some(storage) = &self.storage {
            storage.delete_workflow(name).await?;
        }

        let removed = self.get_workflow(name).is_some();
        self.workflows.rcu(|current| {
            let mut next = (**current).clone();
            next.remove(name);
            next
        });
        if removed {
            tracing::info!("🗑️ Removed workflow from registry: {}", name);
        }
        Ok(removed)
    }
}
