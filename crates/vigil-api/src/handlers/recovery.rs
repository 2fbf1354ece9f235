use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use vigil_recovery::{CrashEvent, RecoveryExecution, RecoveryProcedure};

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ListCrashesQuery {
    pub unit_id: Option<String>,
}

pub async fn create_procedure(
    State(state): State<AppState>,
    Json(procedure): Json<RecoveryProcedure>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let procedure_id = state.procedures.save(procedure).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "procedure_id": procedure_id })),
    ))
}

pub async fn list_procedures(State(state): State<AppState>) -> Json<Vec<RecoveryProcedure>> {
    Json(state.procedures.list().await)
}

pub async fn get_procedure(
    State(state): State<AppState>,
    Path(procedure_id): Path<String>,
) -> Result<Json<RecoveryProcedure>, ApiError> {
    state
        .procedures
        .get(&procedure_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Procedure {} not found", procedure_id)))
}

pub async fn delete_procedure(
    State(state): State<AppState>,
    Path(procedure_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.procedures.delete(&procedure_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Procedure deleted",
        "procedure_id": procedure_id,
    })))
}

pub async fn list_crashes(
    State(state): State<AppState>,
    Query(query): Query<ListCrashesQuery>,
) -> Json<Vec<CrashEvent>> {
    let events = match &query.unit_id {
        Some(unit_id) => state.crashes.list_for_unit(unit_id).await,
        None => state.crashes.list().await,
    };
    Json(events)
}

pub async fn list_executions(State(state): State<AppState>) -> Json<Vec<RecoveryExecution>> {
    Json(state.orchestrator.list_executions().await)
}

pub async fn get_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
) -> Result<Json<RecoveryExecution>, ApiError> {
    state
        .orchestrator
        .get_execution(&execution_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Execution {} not found", execution_id)))
}

pub async fn list_pending_approvals(
    State(state): State<AppState>,
) -> Json<Vec<RecoveryExecution>> {
    Json(state.orchestrator.pending_approvals().await)
}

/// 审批通过并后台启动执行
pub async fn approve_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.orchestrator.approve(&execution_id, &req.actor).await?;

    let orchestrator = state.orchestrator.clone();
    let run_id = execution_id.clone();
    tokio::spawn(async move {
        if let Err(e) = orchestrator.run(&run_id).await {
            tracing::error!(execution_id = %run_id, error = %e, "Approved recovery run failed to start");
        }
    });

    Ok(Json(serde_json::json!({
        "message": "Execution approved",
        "execution_id": execution_id,
    })))
}

pub async fn reject_execution(
    State(state): State<AppState>,
    Path(execution_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.orchestrator.reject(&execution_id, &req.actor).await?;
    Ok(Json(serde_json::json!({
        "message": "Execution rejected",
        "execution_id": execution_id,
    })))
}
