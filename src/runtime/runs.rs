/// Run registry
///
/// In-memory store of active and finished runs, with optional durable history.
/// Each run's state sits behind its own lock. Two `watch` channels accompany
/// it: one carries the requested control state (signals), the other publishes
/// status changes to waiters.

use crate::error::{EngineError, EngineResult};
use crate::integrations::{AuditRecord, AuditSink};
use crate::runtime::history::RunHistory;
use crate::runtime::run::{LogLevel, Run, RunStatus, RunSummary};
use serde_json::json;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{watch, RwLock};

/// Control state requested by signals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunControl {
    Running,
    Paused,
    Cancelled,
}

/// Shared handle to one live run
#[derive(Debug)]
pub struct RunHandle {
    pub id: String,
    /// Authoritative run state
    state: RwLock<Run>,
    /// Latest signal request, read by the engine at step boundaries
    control: watch::Sender<RunControl>,
    /// Mirrors `state.status` so waiters need not take the lock
    status: watch::Sender<RunStatus>,
}

impl RunHandle {
    fn new(run: Run) -> Self {
        let (control, _) = watch::channel(RunControl::Running);
        let (status, _) = watch::channel(run.status);
        Self {
            id: run.id.clone(),
            state: RwLock::new(run),
            control,
            status,
        }
    }

    pub async fn snapshot(&self) -> Run {
        self.state.read().await.clone()
    }

    /// Read part of the run without cloning all of it
    pub async fn read<R>(&self, f: impl FnOnce(&Run) -> R) -> R {
        f(&*self.state.read().await)
    }

    /// Mutate the run under its lock; status changes are published
    pub async fn update<R>(&self, f: impl FnOnce(&mut Run) -> R) -> R {
        let mut run = self.state.write().await;
        let out = f(&mut run);
        let status = run.status;
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        out
    }

    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    pub fn control(&self) -> watch::Receiver<RunControl> {
        self.control.subscribe()
    }

    /// Record a control request; cancellation is final
    pub fn request(&self, requested: RunControl) -> bool {
        self.control.send_if_modified(|current| {
            if *current == RunControl::Cancelled || *current == requested {
                false
            } else {
                *current = requested;
                true
            }
        })
    }

    /// Wait until the run reaches a terminal status
    pub async fn wait_terminal(&self) -> RunStatus {
        let mut status = self.status.subscribe();
        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() {
                return current;
            }
            if status.changed().await.is_err() {
                return *status.borrow();
            }
        }
    }
}

pub struct RunRegistry {
    /// Every run since startup, live or terminal, until purged
    runs: RwLock<HashMap<String, Arc<RunHandle>>>,
    /// Terminal runs are written here when configured
    history: Option<RunHistory>,
    /// Receives a mirror of every log entry
    audit: Arc<dyn AuditSink>,
}

impl RunRegistry {
    pub fn new(audit: Arc<dyn AuditSink>, history: Option<RunHistory>) -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            history,
            audit,
        }
    }

    pub async fn create(&self, run: Run) -> Arc<RunHandle> {
        let handle = Arc::new(RunHandle::new(run));
        self.runs
            .write()
            .await
            .insert(handle.id.clone(), Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, run_id: &str) -> Option<Arc<RunHandle>> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Current state from memory, falling back to history
    pub async fn snapshot(&self, run_id: &str) -> EngineResult<Run> {
        if let Some(handle) = self.get(run_id).await {
            return Ok(handle.snapshot().await);
        }
        if let Some(history) = &self.history {
            if let Some(run) = history.get(run_id).await? {
                return Ok(run);
            }
        }
        Err(EngineError::RunNotFound(run_id.to_string()))
    }

    /// In-memory runs plus persisted ones not already listed, newest first
    pub async fn list(&self) -> EngineResult<Vec<RunSummary>> {
        let handles: Vec<Arc<RunHandle>> = self.runs.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            summaries.push(handle.read(Run::summary).await);
        }

        if let Some(history) = &self.history {
            for summary in history.list(500).await? {
                if !summaries.iter().any(|s| s.id == summary.id) {
                    summaries.push(summary);
                }
            }
        }

        summaries.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(summaries)
    }

    /// Drop a terminal run from memory and history
    pub async fn purge(&self, run_id: &str) -> EngineResult<bool> {
        if let Some(handle) = self.get(run_id).await {
            let status = handle.status();
            if !status.is_terminal() {
                return Err(EngineError::RunActive {
                    run_id: run_id.to_string(),
                    status,
                });
            }
        }

        let removed = self.runs.write().await.remove(run_id).is_some();
        let deleted = match &self.history {
            Some(history) => history.delete(run_id).await?,
            None => false,
        };
        Ok(removed || deleted)
    }

    /// Append to the run log and mirror the entry to the audit sink
    pub async fn append_log(&self, handle: &RunHandle, level: LogLevel, step: Option<&str>, message: impl Into<String>) {
        let entry = handle
            .update(|run| run.append_log(level, step, message))
            .await;

        self.audit.record(AuditRecord {
            timestamp: entry.timestamp,
            level,
            message: entry.message,
            source: format!("run:{}", handle.id),
            context: json!({ "step": entry.step }),
        });
    }

    /// Write a terminal snapshot to history when configured
    pub async fn persist(&self, handle: &RunHandle) -> EngineResult<()> {
        if let Some(history) = &self.history {
            let run = handle.snapshot().await;
            history.save(&run).await?;
        }
        Ok(())
    }
}
