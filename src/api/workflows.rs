/// Workflow management REST API endpoints
///
/// CRUD over definitions plus the two ways to run one: start (returns the run
/// id at once) and execute (waits for the terminal outcome). Every change goes
/// through the registry, which validates, persists and hot-swaps the definition.

use crate::{
    api::{parse_body, ApiError, ApiResult, AppState},
    error::EngineError,
    runtime::engine::RunOutcome,
    workflow::types::WorkflowDefinition,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::{json, Value};

/// Listing entry for a registered workflow
#[derive(Debug, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub active: bool,
    pub steps: usize,
}

pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow).get(list_workflows))
        .route(
            "/api/workflows/{name}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
        .route("/api/workflows/{name}/runs", post(start_run))
        .route("/api/workflows/{name}/execute", post(execute_run))
}

/// POST /api/workflows
async fn create_workflow(
    State(state): State<AppState>,
    Json(definition): Json<WorkflowDefinition>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    if state.engine.workflows().get_workflow(&definition.name).is_some() {
        return Err(ApiError::Conflict(format!(
            "workflow '{}' already exists",
            definition.name
        )));
    }

    let compiled = state.engine.register_workflow(definition).await?;
    tracing::info!("🔥 Created workflow: {}", compiled.name());
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "name": compiled.name(),
            "message": format!("Workflow '{}' created successfully", compiled.definition.display_name()),
        })),
    ))
}

/// GET /api/workflows
async fn list_workflows(State(state): State<AppState>) -> Json<Value> {
    let workflows: Vec<WorkflowSummary> = state
        .engine
        .workflows()
        .list()
        .iter()
        .map(|compiled| WorkflowSummary {
            name: compiled.name().to_string(),
            display_name: compiled.definition.display_name().to_string(),
            description: compiled.definition.description.clone(),
            active: compiled.definition.active,
            steps: compiled.graph.step_count(),
        })
        .collect();
    Json(json!({ "workflows": workflows }))
}

/// GET /api/workflows/{name}
async fn get_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<WorkflowDefinition>> {
    state
        .engine
        .workflows()
        .get_workflow(&name)
        .map(|compiled| Json(compiled.definition.clone()))
        .ok_or_else(|| EngineError::WorkflowNotFound(name).into())
}

/// PUT /api/workflows/{name}
///
/// Replaces the definition; runs already in flight keep the version they began with.
async fn update_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut definition): Json<WorkflowDefinition>,
) -> ApiResult<Json<Value>> {
    if state.engine.workflows().get_workflow(&name).is_none() {
        return Err(EngineError::WorkflowNotFound(name).into());
    }
    definition.name = name;

    let compiled = state.engine.register_workflow(definition).await?;
    tracing::info!("🔥 Hot-reloaded workflow: {}", compiled.name());
    Ok(Json(json!({
        "name": compiled.name(),
        "message": format!("Workflow '{}' updated successfully", compiled.definition.display_name()),
    })))
}

/// DELETE /api/workflows/{name}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.engine.workflows().remove_workflow(&name).await? {
        return Err(EngineError::WorkflowNotFound(name).into());
    }
    Ok(Json(json!({ "message": "Workflow deleted successfully" })))
}

/// POST /api/workflows/{name}/runs
async fn start_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let input = parse_body(&body)?;
    let run_id = state.engine.start_workflow(&name, input).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "run_id": run_id, "workflow": name })),
    ))
}

/// POST /api/workflows/{name}/execute
async fn execute_run(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: String,
) -> ApiResult<Json<RunOutcome>> {
    let input = parse_body(&body)?;
    Ok(Json(state.engine.execute_workflow(&name, input).await?))
}

#[cfg(test)]
mod tests {
    use crate::api::testing::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn test_workflow_crud() {
        let (app, _) = app();

        let (status, _) = send(&app, "POST", "/api/workflows", Some(sample_workflow("signup"))).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(&app, "POST", "/api/workflows", Some(sample_workflow("signup"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("signup"));

        let (status, body) = send(&app, "GET", "/api/workflows", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["workflows"][0]["name"], json!("signup"));
        assert_eq!(body["workflows"][0]["steps"], json!(2));

        let mut updated = sample_workflow("ignored");
        updated["display_name"] = json!("Sign-up flow");
        let (status, _) = send(&app, "PUT", "/api/workflows/signup", Some(updated)).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/api/workflows/signup", None).await;
        assert_eq!(body["display_name"], json!("Sign-up flow"));
        assert_eq!(body["name"], json!("signup"));

        let (status, _) = send(&app, "DELETE", "/api/workflows/signup", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "GET", "/api/workflows/signup", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_definition_is_bad_request() {
        let (app, _) = app();
        let mut definition = sample_workflow("broken");
        definition["trigger"]["next"] = json!(["nowhere"]);

        let (status, body) = send(&app, "POST", "/api/workflows", Some(definition)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("nowhere"));
    }

    #[tokio::test]
    async fn test_execute_returns_outcome() {
        let (app, _) = app();
        send(&app, "POST", "/api/workflows", Some(sample_workflow("signup"))).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/workflows/signup/execute",
            Some(json!({"email": "a@b.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("completed"));
        assert_eq!(body["context"]["email"], json!("a@b.com"));

        let (_, body) = send(&app, "POST", "/api/workflows/signup/execute", Some(json!({}))).await;
        assert_eq!(body["status"], json!("failed"));
        assert_eq!(body["failed_step"], json!("check"));
        assert_eq!(body["step_result"]["data"]["violations"][0]["field"], json!("email"));

        let (status, _) = send(&app, "POST", "/api/workflows/missing/runs", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
