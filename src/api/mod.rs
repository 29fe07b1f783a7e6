/// HTTP API layer
///
/// REST endpoints over the engine and scheduler:
/// - Workflow CRUD plus starting and executing runs
/// - Run inspection, purge and signals
/// - Schedule management
/// - Webhook triggers

pub mod runs;
pub mod schedules;
pub mod webhooks;
pub mod workflows;

use crate::{error::EngineError, runtime::engine::Engine, runtime::scheduler::SchedulerService};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;

/// Shared handles for every handler
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub scheduler: Arc<SchedulerService>,
}

/// Handler error rendered as `{ "error": "..." }`
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    BadRequest(String),
    Conflict(String),
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        ApiError::Engine(error)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Engine(error) => match error {
                EngineError::WorkflowNotFound(_)
                | EngineError::RunNotFound(_)
                | EngineError::ScheduleNotFound(_) => StatusCode::NOT_FOUND,
                EngineError::InvalidDefinition { .. } | EngineError::InvalidSchedule(_) => {
                    StatusCode::BAD_REQUEST
                }
                EngineError::WorkflowInactive(_)
                | EngineError::RunTerminated { .. }
                | EngineError::RunActive { .. } => StatusCode::CONFLICT,
                EngineError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Engine(error) => error.to_string(),
            ApiError::BadRequest(message) | ApiError::Conflict(message) => message.clone(),
        };

        if status.is_server_error() {
            tracing::error!("❌ Request failed: {}", message);
        } else {
            tracing::debug!("⚠️ Request rejected ({}): {}", status, message);
        }
        (status, Json(json!({ "error": message }))).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Parse a raw JSON body; an empty body is an empty object
pub(crate) fn parse_body(body: &str) -> ApiResult<Value> {
    if body.trim().is_empty() {
        return Ok(json!({}));
    }
    serde_json::from_str(body).map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// Full application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(workflows::create_workflow_routes())
        .merge(runs::create_run_routes())
        .merge(schedules::create_schedule_routes())
        .merge(webhooks::create_webhook_routes())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    pub fn app() -> (Router, AppState) {
        let engine = Engine::builder().build();
        let scheduler = Arc::new(SchedulerService::new(engine.clone(), None));
        let state = AppState { engine, scheduler };
        (create_router(state.clone()), state)
    }

    /// Send one request and decode the JSON body (Null when empty)
    pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(body) => {
                request = request.header("content-type", "application/json");
                Body::from(body.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(request.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    pub fn sample_workflow(name: &str) -> Value {
        json!({
            "name": name,
            "trigger": {"id": "start", "kind": "trigger", "next": ["check"]},
            "steps": [
                {"id": "check", "kind": "action", "action": "data_validation",
                 "config": {"rules": {"email": ["required"]}}}
            ]
        })
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use axum::http::StatusCode;

    #[tokio::test]
    async fn test_health_check() {
        let (app, _) = app();
        let (status, _) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
    }
}
