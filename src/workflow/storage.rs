/// SQLite persistence layer for workflow definitions
///
/// Definitions are stored as JSON keyed by workflow name.

use crate::workflow::types::WorkflowDefinition;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    pool: SqlitePool,
}

impl WorkflowStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the workflows table (safe to call repeatedly)
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS workflows (
                name TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                definition JSON NOT NULL,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert or replace a definition
    pub async fn save_workflow(&self, definition: &WorkflowDefinition) -> Result<()> {
        let definition_json = serde_json::to_string(definition)?;

        sqlx::query(
            r#"
            INSERT INTO workflows (name, display_name, active, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(name) DO UPDATE SET
                display_name = excluded.display_name,
                active = excluded.active,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&definition.name)
        .bind(definition.display_name())
        .bind(definition.active)
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// name → definition, for registry initialization
    pub async fn load_all_workflows(&self) -> Result<HashMap<String, WorkflowDefinition>> {
        let rows = sqlx::query("SELECT name, definition FROM workflows")
            .fetch_all(&self.pool)
            .await?;

        let mut workflows = HashMap::with_capacity(rows.len());
        for row in rows {
            let name: String = row.try_get("name")?;
            let definition_json: String = row.try_get("definition")?;
            match serde_json::from_str(&definition_json) {
                Ok(definition) => {
                    workflows.insert(name, definition);
                }
                Err(e) => tracing::error!("❌ Stored workflow {} is not valid JSON: {}", name, e),
            }
        }

        Ok(workflows)
    }

    pub async fn delete_workflow(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn storage() -> WorkflowStorage {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let storage = WorkflowStorage::new(pool);
        storage.init_schema().await.unwrap();
        storage
    }

    fn definition(description: &str) -> WorkflowDefinition {
        serde_json::from_value(json!({
            "name": "onboarding",
            "display_name": "User onboarding",
            "description": description,
            "trigger": {"id": "start", "kind": "trigger"}
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_save_is_an_upsert() {
        let storage = storage().await;
        storage.save_workflow(&definition("v1")).await.unwrap();
        storage.save_workflow(&definition("v2")).await.unwrap();

        let stored = storage.load_all_workflows().await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored["onboarding"].description, "v2");
        assert_eq!(stored["onboarding"].display_name(), "User onboarding");

        assert!(storage.delete_workflow("onboarding").await.unwrap());
        assert!(!storage.delete_workflow("onboarding").await.unwrap());
        assert!(storage.load_all_workflows().await.unwrap().is_empty());
    }
}
