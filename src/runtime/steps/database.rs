/// Storage operation step
///
/// Supported operations: insert, update, delete, select (alias find),
/// aggregate and health_check, all delegated to the `DataStore`.

use crate::integrations::{AggregateFn, DataStore, Filter};
use crate::runtime::executor::{is_placeholder, Dispatcher, StepExecutor, StepInvocation};
use crate::runtime::result::{FailureKind, StepResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Insert,
    Update,
    Delete,
    Select,
    Aggregate,
    HealthCheck,
}

impl Operation {
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "insert" | "create" => Some(Operation::Insert),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            "select" | "find" => Some(Operation::Select),
            "aggregate" => Some(Operation::Aggregate),
            "health_check" | "health-check" => Some(Operation::HealthCheck),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
            Operation::Select => "select",
            Operation::Aggregate => "aggregate",
            Operation::HealthCheck => "health_check",
        }
    }
}

struct AggregateSpec {
    function: AggregateFn,
    field: Option<String>,
}

fn aggregate_spec(config: &Value) -> Result<AggregateSpec, String> {
    let spec = config
        .get("aggregate")
        .ok_or("aggregate operation requires an 'aggregate' object")?;
    let function = spec
        .get("function")
        .cloned()
        .ok_or("aggregate requires a 'function'")?;
    let function: AggregateFn = serde_json::from_value(function)
        .map_err(|_| "aggregate function must be one of count, sum, avg, min, max".to_string())?;
    let field = spec.get("field").and_then(Value::as_str).map(str::to_string);
    if function != AggregateFn::Count && field.is_none() {
        return Err(format!("aggregate {} requires a 'field'", function));
    }
    Ok(AggregateSpec { function, field })
}

pub(crate) fn check_config(config: &Value) -> Result<(), String> {
    let name = config
        .get("operation")
        .and_then(Value::as_str)
        .ok_or("database_operation requires an 'operation'")?;
    let operation =
        Operation::parse(name).ok_or_else(|| format!("unsupported database operation '{}'", name))?;

    if operation != Operation::HealthCheck {
        let table = config.get("table").ok_or("database_operation requires a 'table'")?;
        if let Some(table) = table.as_str().filter(|_| !is_placeholder(table)) {
            crate::integrations::store::validate_table_name(table).map_err(|e| e.to_string())?;
        }
    }
    if operation == Operation::Aggregate {
        aggregate_spec(config)?;
    }
    Ok(())
}

pub struct DatabaseExecutor {
    store: Arc<dyn DataStore>,
}

impl DatabaseExecutor {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    async fn run(&self, operation: Operation, config: &Value) -> Result<Result<Value, StepResult>, String> {
        let table = config.get("table").and_then(Value::as_str).unwrap_or_default();
        let filter: Filter = config
            .get("where")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let limit = config
            .get("limit")
            .and_then(Value::as_u64)
            .map(|l| l as usize);

        let outcome = match operation {
            Operation::HealthCheck => self
                .store
                .health_check()
                .await
                .map(|_| json!({ "healthy": true })),
            Operation::Insert => {
                let records = match config.get("data") {
                    Some(Value::Array(items)) => items.clone(),
                    Some(record @ Value::Object(_)) => vec![record.clone()],
                    _ => return Err("insert requires 'data' object or array".to_string()),
                };
                let total = records.len();
                let mut inserted = Vec::with_capacity(total);
                for record in records {
                    match self.store.insert(table, record).await {
                        Ok(stored) => inserted.push(stored),
                        Err(e) if inserted.is_empty() => return Ok(Err(storage_failure("insert", e))),
                        Err(e) => {
                            // committed rows must not be written again by a retry
                            let message = format!(
                                "storage insert failed after {} of {} records: {}",
                                inserted.len(),
                                total,
                                e
                            );
                            let data = json!({ "inserted": inserted, "count": inserted.len() });
                            return Ok(Err(StepResult::failure(FailureKind::Partial, message).with_data(data)));
                        }
                    }
                }
                Ok(json!({ "inserted": inserted, "count": inserted.len() }))
            }
            Operation::Update => {
                let changes = config
                    .get("data")
                    .filter(|d| d.is_object())
                    .ok_or("update requires a 'data' object")?;
                self.store
                    .update(table, &filter, changes)
                    .await
                    .map(|n| json!({ "updated": n }))
            }
            Operation::Delete => {
                if filter.is_empty() {
                    return Err("delete requires a non-empty 'where' filter".to_string());
                }
                self.store
                    .delete(table, &filter)
                    .await
                    .map(|n| json!({ "deleted": n }))
            }
            Operation::Select => self
                .store
                .find(table, &filter, limit)
                .await
                .map(|rows| json!({ "count": rows.len(), "rows": rows })),
            Operation::Aggregate => {
                let spec = aggregate_spec(config)?;
                self.store
                    .aggregate(table, &filter, spec.function, spec.field.as_deref())
                    .await
                    .map(|value| {
                        json!({ "function": spec.function, "field": spec.field, "value": value })
                    })
            }
        };
        Ok(outcome.map_err(|e| storage_failure(operation.as_str(), e)))
    }
}

fn storage_failure(operation: &str, error: anyhow::Error) -> StepResult {
    StepResult::transient(format!("storage {} failed: {}", operation, error))
}

#[async_trait]
impl StepExecutor for DatabaseExecutor {
    async fn execute(&self, invocation: &StepInvocation<'_>, _dispatcher: &Dispatcher) -> StepResult {
        if let Err(message) = check_config(invocation.config) {
            return StepResult::definition(message);
        }
        let name = invocation
            .config
            .get("operation")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let Some(operation) = Operation::parse(name) else {
            return StepResult::definition(format!("unsupported database operation '{}'", name));
        };

        match self.run(operation, invocation.config).await {
            Ok(Ok(data)) => StepResult::ok(data).with_metadata("operation", name),
            Ok(Err(failure)) => {
                tracing::warn!(
                    "💽 Storage {} failed in step {}: {}",
                    name,
                    invocation.step_id,
                    failure.error_message().unwrap_or_default()
                );
                failure.with_metadata("operation", name)
            }
            Err(message) => StepResult::definition(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::MemoryDataStore;
    use crate::runtime::executor::testing::{dispatcher_with, run_step, MockCaller};
    use crate::runtime::executor::Collaborators;
    use crate::runtime::result::FailureKind;

    fn db_step(config: Value) -> Value {
        json!({"id": "store", "kind": "action", "action": "database_operation", "config": config})
    }

    fn dispatcher(store: Arc<MemoryDataStore>) -> Dispatcher {
        let mut collaborators = Collaborators::new(Arc::new(MockCaller::new()));
        collaborators.store = store;
        dispatcher_with(collaborators)
    }

    #[tokio::test]
    async fn test_insert_then_select_and_aggregate() {
        let store = Arc::new(MemoryDataStore::new());
        let dispatcher = dispatcher(store.clone());

        let inserted = run_step(
            &dispatcher,
            db_step(json!({"operation": "insert", "table": "orders",
                           "data": [{"email": "{{email}}", "total": 10}, {"email": "x@y.z", "total": 5}]})),
            json!({"email": "a@b.com"}),
        )
        .await;
        assert!(inserted.success);
        assert_eq!(inserted.data.as_ref().unwrap()["count"], json!(2));

        let selected = run_step(
            &dispatcher,
            db_step(json!({"operation": "find", "table": "orders", "where": {"email": "a@b.com"}})),
            json!({}),
        )
        .await;
        assert_eq!(selected.data.as_ref().unwrap()["count"], json!(1));

        let total = run_step(
            &dispatcher,
            db_step(json!({"operation": "aggregate", "table": "orders",
                           "aggregate": {"function": "sum", "field": "total"}})),
            json!({}),
        )
        .await;
        assert_eq!(total.data.unwrap()["value"].as_f64(), Some(15.0));
    }

    #[tokio::test]
    async fn test_update_delete_and_health() {
        let store = Arc::new(MemoryDataStore::new());
        store.insert("users", json!({"email": "a@b.com", "plan": "free"})).await.unwrap();
        let dispatcher = dispatcher(store.clone());

        let updated = run_step(
            &dispatcher,
            db_step(json!({"operation": "update", "table": "users",
                           "where": {"email": "a@b.com"}, "data": {"plan": "pro"}})),
            json!({}),
        )
        .await;
        assert_eq!(updated.data.unwrap()["updated"], json!(1));

        let unfiltered = run_step(
            &dispatcher,
            db_step(json!({"operation": "delete", "table": "users"})),
            json!({}),
        )
        .await;
        assert_eq!(unfiltered.failure_kind(), Some(FailureKind::Definition));

        let health = run_step(&dispatcher, db_step(json!({"operation": "health_check"})), json!({})).await;
        assert!(health.success);
    }

    #[test]
    fn test_check_config() {
        assert!(check_config(&json!({"operation": "select", "table": "users"})).is_ok());
        assert!(check_config(&json!({"operation": "upsert", "table": "users"})).is_err());
        assert!(check_config(&json!({"operation": "insert"})).is_err());
        assert!(check_config(&json!({"operation": "insert", "table": "bad name"})).is_err());
        assert!(check_config(&json!({"operation": "aggregate", "table": "t",
                                     "aggregate": {"function": "median", "field": "x"}})).is_err());
        assert!(check_config(&json!({"operation": "aggregate", "table": "t",
                                     "aggregate": {"function": "count"}})).is_ok());
    }
}
