use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use vigil_alert::{Alert, AlertStatus, EscalationHistoryEntry, ResolutionKind};

/// 告警列表查询参数
#[derive(Debug, Deserialize)]
pub struct ListAlertsQuery {
    /// open / acknowledged / escalated / resolved
    pub status: Option<String>,
    pub unit_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ActorRequest {
    pub actor: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub actor: String,
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AnnotateRequest {
    pub actor: String,
    pub note: String,
}

fn parse_status(raw: &str) -> Result<AlertStatus, ApiError> {
    match raw {
        "open" => Ok(AlertStatus::Open),
        "acknowledged" => Ok(AlertStatus::Acknowledged),
        "escalated" => Ok(AlertStatus::Escalated),
        "resolved" => Ok(AlertStatus::Resolved),
        other => Err(ApiError::BadRequest(format!(
            "unknown alert status '{}'",
            other
        ))),
    }
}

/// 告警列表, 可按状态与单元过滤
pub async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<ListAlertsQuery>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let status = query.status.as_deref().map(parse_status).transpose()?;
    let mut alerts = state.alerts.snapshot().await;
    if let Some(status) = status {
        alerts.retain(|a| a.status == status);
    }
    if let Some(unit_id) = &query.unit_id {
        alerts.retain(|a| &a.scope.unit_id == unit_id);
    }
    alerts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(Json(alerts))
}

pub async fn get_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Alert>, ApiError> {
    state
        .alerts
        .get(&alert_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Alert {} not found", alert_id)))
}

/// 告警的升级历史
pub async fn get_alert_escalations(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
) -> Result<Json<Vec<EscalationHistoryEntry>>, ApiError> {
    Ok(Json(state.history.for_alert(&alert_id).await))
}

pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(req): Json<ActorRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.alerts.acknowledge(&alert_id, &req.actor).await?;
    Ok(Json(serde_json::json!({
        "message": "Alert acknowledged",
        "alert_id": alert_id,
    })))
}

pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .alerts
        .resolve(&alert_id, &req.actor, ResolutionKind::Manual)
        .await?;
    if let Some(note) = &req.note {
        state.alerts.annotate(&alert_id, &req.actor, note).await?;
    }
    state.metrics.record_alert_resolved("manual");
    Ok(Json(serde_json::json!({
        "message": "Alert resolved",
        "alert_id": alert_id,
    })))
}

pub async fn annotate_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    Json(req): Json<AnnotateRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.alerts.annotate(&alert_id, &req.actor, &req.note).await?;
    Ok(Json(serde_json::json!({
        "message": "Annotation added",
        "alert_id": alert_id,
    })))
}
