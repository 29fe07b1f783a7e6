/// Audit sink for run log entries
///
/// Every entry appended to a run log is mirrored here with source `run:<id>`.

use crate::runtime::run::LogLevel;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
    pub context: Value,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, record: AuditRecord);
}

/// Forwards audit records to `tracing`
#[derive(Debug, Default, Clone)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: AuditRecord) {
        let source = record.source.as_str();
        match record.level {
            LogLevel::Debug => tracing::debug!(source, "{}", record.message),
            LogLevel::Info => tracing::info!(source, "{}", record.message),
            LogLevel::Warn => tracing::warn!(source, "{}", record.message),
            LogLevel::Error => tracing::error!(source, "{}", record.message),
        }
    }
}

/// Keeps records in memory, for tests and inspection
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: AuditRecord) {
        let mut records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        records.push(record);
    }
}
