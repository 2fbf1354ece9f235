use crate::error::ApiError;
use crate::handlers::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::NaiveDate;
use serde::Deserialize;
use vigil_stats::{DailySummary, MonthlySummary};

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    /// YYYY-MM-DD
    pub date: String,
}

#[derive(Debug, Deserialize)]
pub struct MonthlyQuery {
    pub year: i32,
    pub month: u32,
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("invalid date '{}', expected YYYY-MM-DD", raw)))
}

/// 指定日期的每日汇总; 尚未汇总过的日期即时计算
pub async fn daily_summary(
    State(state): State<AppState>,
    Query(query): Query<DailyQuery>,
) -> Result<Json<DailySummary>, ApiError> {
    let date = parse_date(&query.date)?;
    if let Some(summary) = state.aggregator.store().get(date).await {
        return Ok(Json(summary));
    }
    Ok(Json(state.aggregator.rollup_daily(date).await))
}

pub async fn monthly_summary(
    State(state): State<AppState>,
    Query(query): Query<MonthlyQuery>,
) -> Result<Json<MonthlySummary>, ApiError> {
    if !(1..=12).contains(&query.month) {
        return Err(ApiError::BadRequest(format!(
            "invalid month {}",
            query.month
        )));
    }
    Ok(Json(state.aggregator.monthly(query.year, query.month).await))
}

/// prometheus 文本导出
pub async fn export_metrics(State(state): State<AppState>) -> Result<String, ApiError> {
    state
        .metrics
        .export()
        .map_err(|e| ApiError::InternalError(e.to_string()))
}

/// 告警的通知投递情况
#[derive(Debug, Deserialize)]
pub struct NotificationsQuery {
    pub alert_id: String,
}

pub async fn list_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationsQuery>,
) -> Json<Vec<vigil_notify::QueueItem>> {
    Json(state.queue.items_for_alert(&query.alert_id).await)
}
