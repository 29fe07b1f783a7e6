/// Server setup and initialization
///
/// Wires together storage, registry, engine, scheduler and HTTP routes.

use crate::{
    api::{create_router, AppState},
    config::Config,
    integrations::{
        DatabaseManager, HttpCaller, LogChannel, Notifier, SqliteDataStore, TracingAuditSink,
        WebhookChannel,
    },
    runtime::{
        engine::Engine,
        history::RunHistory,
        scheduler::{ScheduleStorage, SchedulerService},
    },
    workflow::storage::WorkflowStorage,
};
use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Also starts the scheduler polling job; the returned service handle lets the
/// caller stop it on shutdown.
pub async fn create_app(config: &Config) -> Result<(Router, Arc<SchedulerService>)> {
    tracing::info!("🏗️ Initializing database manager in {}", config.database.data_dir);
    let databases = DatabaseManager::new(&config.database.data_dir);
    let engine_pool = databases.engine_pool().await?;
    let data_pool = databases.data_pool().await?;

    tracing::info!("📋 Initializing workflow storage");
    let workflow_storage = WorkflowStorage::new(engine_pool.clone());
    workflow_storage.init_schema().await?;

    let schedule_storage = ScheduleStorage::new(engine_pool.clone());
    schedule_storage.init_schema().await?;

    let mut notifier = Notifier::new()
        .with_channel("log", Arc::new(LogChannel::new("log")))
        .with_channel("email", Arc::new(LogChannel::new("email")))
        .with_channel("chat", Arc::new(LogChannel::new("chat")));
    if let Some(url) = &config.integrations.notify_webhook_url {
        tracing::info!("🔔 Registering webhook notification channel");
        notifier.register("webhook", Arc::new(WebhookChannel::new(url.clone())));
    }

    tracing::info!("🚀 Initializing execution engine");
    let mut builder = Engine::builder()
        .data_store(Arc::new(SqliteDataStore::new(data_pool)))
        .caller(Arc::new(HttpCaller::new(
            config.integrations.services.clone(),
            config.engine.http_timeout(),
        )))
        .notifier(notifier)
        .audit(Arc::new(TracingAuditSink))
        .workflow_storage(workflow_storage)
        .default_retry(config.engine.default_retry.clone());
    if config.database.persist_history {
        let history = RunHistory::new(engine_pool);
        history.init_schema().await?;
        builder = builder.history(history);
    }
    let engine = builder.build();

    tracing::info!("📥 Loading existing workflows from storage");
    engine.workflows().init_from_storage().await?;

    tracing::info!("⏰ Initializing scheduler");
    let scheduler = Arc::new(
        SchedulerService::new(engine.clone(), Some(schedule_storage))
            .with_poll_interval(config.engine.scheduler_poll_interval()),
    );
    scheduler.load_from_storage().await?;
    scheduler.start().await?;

    let app = create_router(AppState {
        engine,
        scheduler: Arc::clone(&scheduler),
    });

    tracing::info!("✅ Application initialized successfully");
    Ok((app, scheduler))
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Flowrelay server...");

    let (app, scheduler) = create_app(&config).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr).await?;
    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop().await?;
    tracing::info!("👋 Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("❌ Failed to listen for shutdown signal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_app_initializes_storage() {
        let dir = std::env::temp_dir().join(format!("flowrelay-test-{}", uuid::Uuid::new_v4()));
        let mut config = Config::default();
        config.database.data_dir = dir.to_string_lossy().to_string();

        let (_app, scheduler) = create_app(&config).await.unwrap();
        scheduler.stop().await.unwrap();

        assert!(dir.join("engine.db").exists());
        assert!(dir.join("data.db").exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
