/// Collaborators consumed by step executors
///
/// Each concern is a trait injected at construction, with a production
/// implementation and an in-memory or logging one:
/// - Storage (`DataStore`): SQLite JSON documents or memory
/// - External calls (`ExternalCaller`): reqwest
/// - Notifications (`NotificationChannel`): tracing log or webhook POST
/// - Audit (`AuditSink`): tracing or memory

pub mod audit;
pub mod database;
pub mod http;
pub mod notify;
pub mod store;

pub use audit::{AuditRecord, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use database::DatabaseManager;
pub use http::{CallError, ExternalCaller, ExternalResponse, HttpCaller};
pub use notify::{LogChannel, NotificationChannel, Notifier, Severity, WebhookChannel};
pub use store::{AggregateFn, DataStore, Filter, MemoryDataStore, SqliteDataStore};
