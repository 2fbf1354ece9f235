use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use vigil_alert::EscalationPolicy;

pub async fn create_policy(
    State(state): State<AppState>,
    Json(policy): Json<EscalationPolicy>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let policy_id = state.policies.save(policy).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "policy_id": policy_id })),
    ))
}

pub async fn list_policies(State(state): State<AppState>) -> Json<Vec<EscalationPolicy>> {
    Json(state.policies.list().await)
}

pub async fn get_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
) -> Result<Json<EscalationPolicy>, ApiError> {
    state
        .policies
        .get(&policy_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Policy {} not found", policy_id)))
}

pub async fn delete_policy(
    State(state): State<AppState>,
    Path(policy_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.policies.delete(&policy_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Policy deleted",
        "policy_id": policy_id,
    })))
}
