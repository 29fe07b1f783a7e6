/// Run inspection and control endpoints

use crate::{
    api::{ApiError, ApiResult, AppState},
    error::EngineError,
    runtime::run::{LogEntry, Run, Signal},
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct SignalRequest {
    pub signal: String,
}

pub fn create_run_routes() -> Router<AppState> {
    Router::new()
        .route("/api/runs", get(list_runs))
        .route("/api/runs/{id}", get(get_run).delete(purge_run))
        .route("/api/runs/{id}/status", get(get_status))
        .route("/api/runs/{id}/log", get(get_log))
        .route("/api/runs/{id}/signal", post(send_signal))
}

/// GET /api/runs
async fn list_runs(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let runs = state.engine.list_runs().await?;
    Ok(Json(json!({ "runs": runs })))
}

/// GET /api/runs/{id}
async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Run>> {
    Ok(Json(state.engine.get_run(&id).await?))
}

/// DELETE /api/runs/{id}
async fn purge_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    if !state.engine.purge_run(&id).await? {
        return Err(EngineError::RunNotFound(id).into());
    }
    Ok(Json(json!({ "message": "Run purged" })))
}

/// GET /api/runs/{id}/status
async fn get_status(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    let status = state.engine.query_status(&id).await?;
    Ok(Json(json!({ "run_id": id, "status": status.to_string() })))
}

/// GET /api/runs/{id}/log
async fn get_log(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Vec<LogEntry>>> {
    Ok(Json(state.engine.get_log(&id).await?))
}

/// POST /api/runs/{id}/signal
/// Body: { "signal": "pause" | "resume" | "cancel" }
async fn send_signal(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<SignalRequest>,
) -> ApiResult<Json<Value>> {
    let signal = Signal::from_str(&request.signal).map_err(ApiError::BadRequest)?;
    state.engine.signal(&id, signal).await?;
    tracing::info!("📨 Delivered {} to run {}", signal, id);
    Ok(Json(json!({ "run_id": id, "signal": signal })))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_inspection_and_signals() {
        let (app, state) = app();
        send(&app, "POST", "/api/workflows", Some(sample_workflow("signup"))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows/signup/runs",
            Some(json!({"email": "a@b.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let run_id = body["run_id"].as_str().unwrap().to_string();
        state.engine.wait_for_run(&run_id).await.unwrap();

        let (_, body) = send(&app, "GET", &format!("/api/runs/{}/status", run_id), None).await;
        assert_eq!(body["status"], json!("completed"));

        let (_, body) = send(&app, "GET", &format!("/api/runs/{}/log", run_id), None).await;
        assert!(body.as_array().unwrap().len() >= 2);

        let (_, body) = send(&app, "GET", "/api/runs", None).await;
        assert_eq!(body["runs"][0]["id"], json!(run_id));

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/runs/{}/signal", run_id),
            Some(json!({"signal": "pause"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, _) = send(
            &app,
            "POST",
            &format!("/api/runs/{}/signal", run_id),
            Some(json!({"signal": "explode"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", &format!("/api/runs/{}", run_id), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", &format!("/api/runs/{}", run_id), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
