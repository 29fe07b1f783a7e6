/// Storage collaborator for `database_operation` steps
///
/// Records are JSON objects grouped into logical tables and matched by a flat
/// equality filter. `SqliteDataStore` keeps each record as a JSON document in a
/// per-table SQLite table; `MemoryDataStore` is the in-process equivalent.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::{
    sqlite::{SqliteArguments, SqlitePool},
    Row, Sqlite,
};
use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicI64, Ordering},
};
use tokio::sync::RwLock;

/// Field → expected value; all entries must match
pub type Filter = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl fmt::Display for AggregateFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregateFn::Count => "count",
            AggregateFn::Sum => "sum",
            AggregateFn::Avg => "avg",
            AggregateFn::Min => "min",
            AggregateFn::Max => "max",
        };
        f.write_str(s)
    }
}

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Store a record and return it with its assigned `id`
    async fn insert(&self, table: &str, record: Value) -> Result<Value>;
    /// Merge `changes` into every matching record; returns the number updated
    async fn update(&self, table: &str, filter: &Filter, changes: &Value) -> Result<u64>;
    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64>;
    async fn find(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Value>>;
    /// `count` ignores `field`; the numeric functions yield `null` over no values
    async fn aggregate(
        &self,
        table: &str,
        filter: &Filter,
        function: AggregateFn,
        field: Option<&str>,
    ) -> Result<Value>;
    async fn health_check(&self) -> Result<()>;
}

/// Validate table name to prevent SQL injection
pub fn validate_table_name(table: &str) -> Result<()> {
    if table.is_empty() || !table.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(anyhow::anyhow!("Invalid table name: {}", table));
    }
    Ok(())
}

fn validate_field_name(field: &str) -> Result<()> {
    let valid = !field.is_empty()
        && field
            .split('.')
            .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_alphanumeric() || c == '_'));
    if !valid {
        return Err(anyhow::anyhow!("Invalid field name: {}", field));
    }
    Ok(())
}

fn number_value(value: Option<f64>) -> Value {
    value
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// RFC 7386 merge: `null` removes a key, objects merge recursively
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

// ----------------------------------------------------------------------------
// SQLite
// ----------------------------------------------------------------------------

type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

/// JSON-document tables in the data database
#[derive(Debug, Clone)]
pub struct SqliteDataStore {
    pool: SqlitePool,
}

impl SqliteDataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn ensure_table(&self, table: &str) -> Result<()> {
        validate_table_name(table)?;
        let create_sql = format!(
            "CREATE TABLE IF NOT EXISTS {} (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL, created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP)",
            table
        );
        sqlx::query(&create_sql).execute(&self.pool).await?;
        Ok(())
    }

    /// Build ` WHERE ...` plus bind values for a filter
    fn where_clause(filter: &Filter) -> Result<(String, Vec<Value>)> {
        if filter.is_empty() {
            return Ok((String::new(), Vec::new()));
        }

        let mut parts = Vec::new();
        let mut binds = Vec::new();
        for (field, value) in filter {
            validate_field_name(field)?;
            let column = if field == "id" {
                "id".to_string()
            } else {
                format!("json_extract(doc, '$.{}')", field)
            };

            match value {
                Value::Null => parts.push(format!("{} IS NULL", column)),
                Value::Object(_) | Value::Array(_) => {
                    parts.push(format!("{} = json(?)", column));
                    binds.push(Value::String(value.to_string()));
                }
                _ => {
                    parts.push(format!("{} = ?", column));
                    binds.push(value.clone());
                }
            }
        }

        Ok((format!(" WHERE {}", parts.join(" AND ")), binds))
    }

    fn bind_value<'q>(query: SqliteQuery<'q>, value: &Value) -> SqliteQuery<'q> {
        match value {
            Value::String(s) => query.bind(s.clone()),
            Value::Number(n) => match n.as_i64() {
                Some(i) => query.bind(i),
                None => query.bind(n.as_f64().unwrap_or_default()),
            },
            Value::Bool(b) => query.bind(*b),
            Value::Null => query.bind(None::<String>),
            other => query.bind(other.to_string()),
        }
    }

    fn bind_all<'q>(mut query: SqliteQuery<'q>, values: &[Value]) -> SqliteQuery<'q> {
        for value in values {
            query = Self::bind_value(query, value);
        }
        query
    }
}

#[async_trait]
impl DataStore for SqliteDataStore {
    async fn insert(&self, table: &str, record: Value) -> Result<Value> {
        let Value::Object(mut fields) = record else {
            return Err(anyhow::anyhow!("records must be JSON objects"));
        };
        self.ensure_table(table).await?;

        fields.remove("id");
        let doc = Value::Object(fields);
        let sql = format!("INSERT INTO {} (doc) VALUES (?)", table);
        let result = sqlx::query(&sql)
            .bind(doc.to_string())
            .execute(&self.pool)
            .await?;

        let mut stored = doc;
        if let Value::Object(map) = &mut stored {
            map.insert("id".to_string(), Value::from(result.last_insert_rowid()));
        }
        tracing::debug!("💾 Inserted record {} into {}", result.last_insert_rowid(), table);
        Ok(stored)
    }

    async fn update(&self, table: &str, filter: &Filter, changes: &Value) -> Result<u64> {
        if !changes.is_object() {
            return Err(anyhow::anyhow!("update changes must be a JSON object"));
        }
        self.ensure_table(table).await?;

        let (clause, binds) = Self::where_clause(filter)?;
        let sql = format!("UPDATE {} SET doc = json_patch(doc, ?){}", table, clause);
        let query = sqlx::query(&sql).bind(changes.to_string());
        let result = Self::bind_all(query, &binds).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        self.ensure_table(table).await?;
        let (clause, binds) = Self::where_clause(filter)?;
        let sql = format!("DELETE FROM {}{}", table, clause);
        let result = Self::bind_all(sqlx::query(&sql), &binds)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn find(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Value>> {
        self.ensure_table(table).await?;
        let (clause, binds) = Self::where_clause(filter)?;
        let mut sql = format!("SELECT id, doc FROM {}{} ORDER BY id", table, clause);
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let rows = Self::bind_all(sqlx::query(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get("id")?;
            let doc: String = row.try_get("doc")?;
            let mut record: Value = serde_json::from_str(&doc)?;
            if let Value::Object(map) = &mut record {
                map.insert("id".to_string(), Value::from(id));
            }
            records.push(record);
        }
        Ok(records)
    }

    async fn aggregate(
        &self,
        table: &str,
        filter: &Filter,
        function: AggregateFn,
        field: Option<&str>,
    ) -> Result<Value> {
        self.ensure_table(table).await?;
        let (clause, binds) = Self::where_clause(filter)?;

        if function == AggregateFn::Count {
            let sql = format!("SELECT COUNT(*) FROM {}{}", table, clause);
            let row = Self::bind_all(sqlx::query(&sql), &binds)
                .fetch_one(&self.pool)
                .await?;
            let count: i64 = row.try_get(0)?;
            return Ok(Value::from(count));
        }

        let field = field.ok_or_else(|| anyhow::anyhow!("aggregate {} requires a field", function))?;
        validate_field_name(field)?;
        let expr = if field == "id" {
            "id".to_string()
        } else {
            format!("json_extract(doc, '$.{}')", field)
        };
        let sql = format!(
            "SELECT CAST({}({}) AS REAL) FROM {}{}",
            function.to_string().to_uppercase(),
            expr,
            table,
            clause
        );
        let row = Self::bind_all(sqlx::query(&sql), &binds)
            .fetch_one(&self.pool)
            .await?;
        let value: Option<f64> = row.try_get(0)?;
        Ok(number_value(value))
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryDataStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
    next_id: AtomicI64,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn matches(record: &Value, filter: &Filter) -> bool {
        filter.iter().all(|(field, expected)| {
            let actual = crate::runtime::resolver::lookup(record, field).unwrap_or(&Value::Null);
            match (actual.as_f64(), expected.as_f64()) {
                (Some(a), Some(b)) => a == b,
                _ => actual == expected,
            }
        })
    }
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn insert(&self, table: &str, record: Value) -> Result<Value> {
        validate_table_name(table)?;
        let Value::Object(mut fields) = record else {
            return Err(anyhow::anyhow!("records must be JSON objects"));
        };
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        fields.insert("id".to_string(), Value::from(id));
        let stored = Value::Object(fields);

        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, table: &str, filter: &Filter, changes: &Value) -> Result<u64> {
        validate_table_name(table)?;
        if !changes.is_object() {
            return Err(anyhow::anyhow!("update changes must be a JSON object"));
        }
        let mut tables = self.tables.write().await;
        let mut updated = 0;
        if let Some(rows) = tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| Self::matches(r, filter)) {
                let id = row.get("id").cloned();
                merge_patch(row, changes);
                if let (Some(id), Value::Object(map)) = (id, &mut *row) {
                    map.insert("id".to_string(), id);
                }
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filter: &Filter) -> Result<u64> {
        validate_table_name(table)?;
        let mut tables = self.tables.write().await;
        let Some(rows) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !Self::matches(r, filter));
        Ok((before - rows.len()) as u64)
    }

    async fn find(&self, table: &str, filter: &Filter, limit: Option<usize>) -> Result<Vec<Value>> {
        validate_table_name(table)?;
        let tables = self.tables.read().await;
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|r| Self::matches(r, filter))
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn aggregate(
        &self,
        table: &str,
        filter: &Filter,
        function: AggregateFn,
        field: Option<&str>,
    ) -> Result<Value> {
        let rows = self.find(table, filter, None).await?;
        if function == AggregateFn::Count {
            return Ok(Value::from(rows.len()));
        }

        let field = field.ok_or_else(|| anyhow::anyhow!("aggregate {} requires a field", function))?;
        let values: Vec<f64> = rows
            .iter()
            .filter_map(|r| crate::runtime::resolver::lookup(r, field).and_then(Value::as_f64))
            .collect();
        if values.is_empty() {
            return Ok(Value::Null);
        }

        let result = match function {
            AggregateFn::Sum => values.iter().sum(),
            AggregateFn::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFn::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            AggregateFn::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            AggregateFn::Count => values.len() as f64,
        };
        Ok(number_value(Some(result)))
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
