/// Schedule management endpoints

use crate::{
    api::{ApiResult, AppState},
    runtime::scheduler::{Schedule, ScheduleRequest},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde_json::{json, Value};

pub fn create_schedule_routes() -> Router<AppState> {
    Router::new()
        .route("/api/schedules", get(list_schedules).post(create_schedule))
        .route("/api/schedules/{id}", delete(delete_schedule))
        .route("/api/schedules/{id}/enable", post(enable_schedule))
        .route("/api/schedules/{id}/disable", post(disable_schedule))
}

/// GET /api/schedules
async fn list_schedules(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "schedules": state.scheduler.list_schedules().await }))
}

/// POST /api/schedules
/// Body: { "workflow_name": "...", "cron_expression": "0 * * * *", "timezone": "UTC" }
async fn create_schedule(
    State(state): State<AppState>,
    Json(request): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<Schedule>)> {
    let schedule = state.scheduler.create_schedule(request).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// DELETE /api/schedules/{id}
async fn delete_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Value>> {
    state.scheduler.delete_schedule(&id).await?;
    Ok(Json(json!({ "message": "Schedule deleted successfully" })))
}

async fn enable_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.enable(&id).await?))
}

async fn disable_schedule(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.disable(&id).await?))
}
