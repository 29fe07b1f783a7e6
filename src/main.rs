/// Flowrelay server entry point
///
/// Loads configuration from the environment and serves:
/// - Workflow management API at /api/workflows/*
/// - Run inspection and signals at /api/runs/*
/// - Schedules at /api/schedules/*
/// - Webhook triggers at /webhook/{name}
/// - Health check at /healthz

use flowrelay::{config::Config, server::start_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::default();
    start_server(config).await?;
    Ok(())
}
