use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use vigil_rule::AlertRule;

pub async fn create_rule(
    State(state): State<AppState>,
    Json(rule): Json<AlertRule>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let rule_id = state.rules.save(rule).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "rule_id": rule_id })),
    ))
}

pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<AlertRule>> {
    Json(state.rules.list().await)
}

pub async fn get_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<AlertRule>, ApiError> {
    state
        .rules
        .get(&rule_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Rule {} not found", rule_id)))
}

/// 更新规则 (整体替换, 路径 ID 优先)
pub async fn update_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(mut rule): Json<AlertRule>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.rules.get(&rule_id).await.is_none() {
        return Err(ApiError::NotFound(format!("Rule {} not found", rule_id)));
    }
    rule.id = rule_id.clone();
    state.rules.save(rule).await?;
    Ok(Json(serde_json::json!({ "rule_id": rule_id })))
}

pub async fn delete_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.rules.delete(&rule_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Rule deleted",
        "rule_id": rule_id,
    })))
}
