/// Webhook trigger endpoint
///
/// Any method on /webhook/{name} starts a run of that workflow with the request
/// body as the trigger payload and answers 202 with the run id.

use crate::api::{parse_body, ApiResult, AppState};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{any, Router},
};
use serde_json::{json, Value};

pub fn create_webhook_routes() -> Router<AppState> {
    Router::new().route("/webhook/{name}", any(trigger_webhook))
}

async fn trigger_webhook(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    tracing::info!("📥 Webhook request received for workflow: {}", name);
    let payload = parse_body(&body).inspect_err(|_| {
        tracing::warn!("❌ Invalid JSON payload for webhook: {}", name);
    })?;

    let run_id = state.engine.start_workflow(&name, payload).await?;
    tracing::info!("🚀 Webhook started run {} of {}", run_id, name);
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "workflow": name })),
    ))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::*;
    use crate::runtime::run::RunStatus;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_webhook_starts_run_with_body() {
        let (app, state) = app();
        send(&app, "POST", "/api/workflows", Some(sample_workflow("signup"))).await;

        let (status, body) = send(&app, "POST", "/webhook/signup", Some(json!({"email": "x@y.z"}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let run_id = body["run_id"].as_str().unwrap();
        let outcome = state.engine.wait_for_run(run_id).await.unwrap();
        assert_eq!(outcome.status(), RunStatus::Completed);

        let (status, _) = send(&app, "PUT", "/webhook/unknown", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
