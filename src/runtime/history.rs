/// Durable run history
///
/// Terminal runs are snapshotted into SQLite so status and log queries keep
/// working after they are evicted from memory or the process restarts.

use crate::runtime::run::{Run, RunSummary};
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};

#[derive(Debug, Clone)]
pub struct RunHistory {
    pool: SqlitePool,
}

impl RunHistory {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_history (
                id TEXT PRIMARY KEY,
                workflow_name TEXT NOT NULL,
                status TEXT NOT NULL,
                started_at TEXT NOT NULL,
                ended_at TEXT,
                snapshot JSON NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_run_history_workflow ON run_history(workflow_name)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn save(&self, run: &Run) -> Result<()> {
        let snapshot = serde_json::to_string(run)?;
        sqlx::query(
            r#"
            INSERT INTO run_history (id, workflow_name, status, started_at, ended_at, snapshot)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                ended_at = excluded.ended_at,
                snapshot = excluded.snapshot
            "#,
        )
        .bind(&run.id)
        .bind(&run.workflow_name)
        .bind(run.status.as_str())
        .bind(run.started_at.to_rfc3339())
        .bind(run.ended_at.map(|t| t.to_rfc3339()))
        .bind(&snapshot)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT snapshot FROM run_history WHERE id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let snapshot: String = row.try_get("snapshot")?;
                Ok(Some(serde_json::from_str(&snapshot)?))
            }
            None => Ok(None),
        }
    }

    /// Most recent runs first
    pub async fn list(&self, limit: i64) -> Result<Vec<RunSummary>> {
        let rows = sqlx::query("SELECT snapshot FROM run_history ORDER BY started_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        let mut runs = Vec::with_capacity(rows.len());
        for row in rows {
            let snapshot: String = row.try_get("snapshot")?;
            let run: Run = serde_json::from_str(&snapshot)?;
            runs.push(run.summary());
        }
        Ok(runs)
    }

    pub async fn delete(&self, run_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM run_history WHERE id = ?")
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
