use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::error;
use vigil_recovery::{CrashEvent, CrashOutcome};
use vigil_types::MetricSample;

/// 指标上报请求
#[derive(Debug, Deserialize)]
pub struct ReportMetricRequest {
    pub unit_id: String,
    pub metric: String,
    pub value: f64,
    /// 缺省为服务端接收时间
    pub timestamp: Option<DateTime<Utc>>,
}

/// 崩溃上报请求
#[derive(Debug, Deserialize)]
pub struct ReportCrashRequest {
    pub unit_id: String,
    pub ecosystem: String,
    pub crash_type: String,
    pub detection_latency_ms: Option<u64>,
}

/// 上报一个指标样本, 进入规则评估流水线
pub async fn report_metric(
    State(state): State<AppState>,
    Json(req): Json<ReportMetricRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.unit_id.trim().is_empty() || req.metric.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "unit_id and metric must not be empty".to_string(),
        ));
    }
    let mut sample = MetricSample::new(&req.unit_id, &req.metric, req.value);
    if let Some(ts) = req.timestamp {
        sample = sample.at(ts);
    }
    state
        .samples_tx
        .send(sample)
        .await
        .map_err(|_| ApiError::InternalError("sample pipeline is closed".to_string()))?;
    state.metrics.record_sample();
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "message": "Sample accepted" })),
    ))
}

/// 上报一次崩溃, 触发恢复编排
pub async fn report_crash(
    State(state): State<AppState>,
    Json(req): Json<ReportCrashRequest>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if req.unit_id.trim().is_empty() || req.ecosystem.trim().is_empty() {
        return Err(ApiError::BadRequest(
            "unit_id and ecosystem must not be empty".to_string(),
        ));
    }
    let mut event = CrashEvent::new(&req.unit_id, &req.ecosystem, &req.crash_type);
    event.detection_latency_ms = req.detection_latency_ms;
    let event_id = event.id.clone();

    let outcome = state.orchestrator.handle_crash(event).await?;
    let (status, execution_id) = match &outcome {
        CrashOutcome::Started(id) => {
            // 执行在后台跑, 上报方立即得到回执
            let orchestrator = state.orchestrator.clone();
            let id = id.clone();
            let run_id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(&run_id).await {
                    error!(execution_id = %run_id, error = %e, "Recovery run failed to start");
                }
            });
            ("recovering", Some(id))
        }
        CrashOutcome::AwaitingApproval(id) => ("awaiting_approval", Some(id.clone())),
        CrashOutcome::Attached(id) => ("attached", Some(id.clone())),
        CrashOutcome::ManualInterventionRequired => ("manual_intervention_required", None),
    };

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "crash_event_id": event_id,
            "status": status,
            "execution_id": execution_id,
        })),
    ))
}
