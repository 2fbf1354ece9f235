use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use vigil_correction::{CorrectionLog, CorrectionRule};

#[derive(Debug, Deserialize)]
pub struct ListLogsQuery {
    pub rule_id: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AutoEnabledRequest {
    pub auto_enabled: bool,
}

pub async fn create_correction_rule(
    State(state): State<AppState>,
    Json(rule): Json<CorrectionRule>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let rule_id = state.correction_rules.save(rule).await?;
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "rule_id": rule_id })),
    ))
}

pub async fn list_correction_rules(State(state): State<AppState>) -> Json<Vec<CorrectionRule>> {
    Json(state.correction_rules.list().await)
}

pub async fn get_correction_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<CorrectionRule>, ApiError> {
    state
        .correction_rules
        .get(&rule_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Correction rule {} not found", rule_id)))
}

pub async fn delete_correction_rule(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.correction_rules.delete(&rule_id).await?;
    Ok(Json(serde_json::json!({
        "message": "Correction rule deleted",
        "rule_id": rule_id,
    })))
}

/// 开关单条规则的自动执行
pub async fn set_correction_auto_enabled(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
    Json(req): Json<AutoEnabledRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .correction_rules
        .set_auto_enabled(&rule_id, req.auto_enabled)
        .await?;
    Ok(Json(serde_json::json!({
        "rule_id": rule_id,
        "auto_enabled": req.auto_enabled,
    })))
}

/// 纠正执行日志, 可按规则过滤
pub async fn list_correction_logs(
    State(state): State<AppState>,
    Query(query): Query<ListLogsQuery>,
) -> Json<Vec<CorrectionLog>> {
    let logs = match &query.rule_id {
        Some(rule_id) => state.correction_log.for_rule(rule_id).await,
        None => state.correction_log.recent(query.limit.unwrap_or(100)).await,
    };
    Json(logs)
}

/// 单条规则的历史成功率
pub async fn correction_success_rate(
    State(state): State<AppState>,
    Path(rule_id): Path<String>,
) -> Json<serde_json::Value> {
    let rate = state.correction_log.success_rate(&rule_id).await;
    Json(serde_json::json!({
        "rule_id": rule_id,
        "success_rate": rate,
    }))
}
