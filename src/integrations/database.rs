/// SQLite database manager
///
/// Manages the two SQLite databases used by the engine:
/// - engine.db: workflow definitions, run history, schedules
/// - data.db: logical tables used by `database_operation` steps
///
/// Pools are created lazily on first access and cached.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

const ENGINE_DB: &str = "engine";
const DATA_DB: &str = "data";

#[derive(Debug)]
pub struct DatabaseManager {
    /// Connection pools keyed by database name
    pools: RwLock<HashMap<String, SqlitePool>>,
    /// Base directory for database files
    data_dir: PathBuf,
}

impl DatabaseManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            data_dir: data_dir.as_ref().to_path_buf(),
        }
    }

    /// Pool for engine state (workflows, run history, schedules)
    pub async fn engine_pool(&self) -> Result<SqlitePool> {
        self.get_pool(ENGINE_DB).await
    }

    /// Pool for step-managed data tables
    pub async fn data_pool(&self) -> Result<SqlitePool> {
        self.get_pool(DATA_DB).await
    }

    async fn get_pool(&self, name: &str) -> Result<SqlitePool> {
        // Fast path for existing pools
        {
            let pools = self.pools.read().await;
            if let Some(pool) = pools.get(name) {
                return Ok(pool.clone());
            }
        }

        let mut pools = self.pools.write().await;

        // Double-check: another task might have created it
        if let Some(pool) = pools.get(name) {
            return Ok(pool.clone());
        }

        std::fs::create_dir_all(&self.data_dir).map_err(|e| {
            anyhow::anyhow!(
                "Failed to create data directory '{}': {}",
                self.data_dir.display(),
                e
            )
        })?;
        let db_path = self.data_dir.join(format!("{}.db", name));

        tracing::info!("🗄️ Opening database pool: {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        pools.insert(name.to_string(), pool.clone());
        Ok(pool)
    }

    pub async fn open_pool_count(&self) -> usize {
        self.pools.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pools_are_created_once() {
        let dir = std::env::temp_dir().join(format!("flowrelay-db-{}", uuid::Uuid::new_v4()));
        let manager = DatabaseManager::new(&dir);

        let first = manager.engine_pool().await.unwrap();
        let _again = manager.engine_pool().await.unwrap();
        let _data = manager.data_pool().await.unwrap();

        assert_eq!(manager.open_pool_count().await, 2);
        assert!(dir.join("engine.db").exists());
        first.close().await;
        let _ = std::fs::remove_dir_all(&dir);
    }
}
