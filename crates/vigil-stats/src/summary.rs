//! 每日 / 每月统计汇总
//!
//! 只读地扫描各存储的快照做聚合, 不参与实时路径。

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use vigil_alert::{Alert, AlertManager, ResolutionKind};
use vigil_correction::{CorrectionLog, CorrectionLogStore};
use vigil_notify::{DeliveryStatus, NotificationQueue, QueueItem};
use vigil_recovery::{ExecutionStatus, RecoveryExecution, RecoveryOrchestrator};

/// 告警维度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertStats {
    pub created: u64,
    pub resolved: u64,
    /// 非人工解决 (自动纠正或恢复流程)
    pub auto_resolved: u64,
    pub max_escalation_level: u32,
    pub mean_seconds_to_acknowledge: Option<f64>,
    pub mean_seconds_to_resolve: Option<f64>,
}

/// 通知维度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationStats {
    pub delivered: u64,
    pub failed: u64,
    pub cancelled: u64,
}

/// 纠正维度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorrectionStats {
    pub attempted: u64,
    pub succeeded: u64,
    pub success_rate: Option<f64>,
}

/// 恢复维度统计
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryStats {
    pub executions: u64,
    pub succeeded: u64,
    pub success_rate: Option<f64>,
    pub mean_duration_seconds: Option<f64>,
}

/// 单日汇总
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailySummary {
    pub date: NaiveDate,
    pub alerts: AlertStats,
    pub notifications: NotificationStats,
    pub corrections: CorrectionStats,
    pub recoveries: RecoveryStats,
    pub generated_at: DateTime<Utc>,
}

/// 按月聚合 (由已存的每日汇总相加)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub year: i32,
    pub month: u32,
    /// 参与聚合的天数
    pub days_covered: u32,
    pub alerts_created: u64,
    pub alerts_resolved: u64,
    pub notifications_delivered: u64,
    pub notifications_failed: u64,
    pub corrections_attempted: u64,
    pub corrections_succeeded: u64,
    pub recovery_executions: u64,
    pub recovery_succeeded: u64,
}

fn is_on(date: NaiveDate, ts: DateTime<Utc>) -> bool {
    ts.date_naive() == date
}

/// 当日创建的告警的统计
pub fn summarize_alerts(date: NaiveDate, alerts: &[Alert]) -> AlertStats {
    let todays: Vec<&Alert> = alerts
        .iter()
        .filter(|a| is_on(date, a.created_at))
        .collect();

    let mut stats = AlertStats {
        created: todays.len() as u64,
        ..Default::default()
    };

    let mut ack_seconds = Vec::new();
    let mut resolve_seconds = Vec::new();
    for alert in &todays {
        stats.max_escalation_level = stats.max_escalation_level.max(alert.escalation_level);
        if let Some(acked) = alert.acknowledged_at {
            ack_seconds.push((acked - alert.created_at).num_seconds() as f64);
        }
        if alert.resolved_at.is_some() {
            stats.resolved += 1;
            if matches!(
                alert.resolution,
                Some(ResolutionKind::Auto) | Some(ResolutionKind::Recovery)
            ) {
                stats.auto_resolved += 1;
            }
        }
        if let Some(resolved) = alert.resolved_at {
            resolve_seconds.push((resolved - alert.created_at).num_seconds() as f64);
        }
    }

    stats.mean_seconds_to_acknowledge = mean(&ack_seconds);
    stats.mean_seconds_to_resolve = mean(&resolve_seconds);
    stats
}

/// 当日通知投递结果 (投递成功按送达时间, 其余按创建时间归日)
pub fn summarize_notifications(date: NaiveDate, items: &[QueueItem]) -> NotificationStats {
    let mut stats = NotificationStats::default();
    for item in items {
        match item.status {
            DeliveryStatus::Delivered => {
                let day = item.delivered_at.unwrap_or(item.created_at);
                if is_on(date, day) {
                    stats.delivered += 1;
                }
            }
            DeliveryStatus::Failed => {
                if is_on(date, item.created_at) {
                    stats.failed += 1;
                }
            }
            DeliveryStatus::Cancelled => {
                if is_on(date, item.created_at) {
                    stats.cancelled += 1;
                }
            }
            DeliveryStatus::Pending => {}
        }
    }
    stats
}

pub fn summarize_corrections(date: NaiveDate, logs: &[CorrectionLog]) -> CorrectionStats {
    let todays: Vec<&CorrectionLog> = logs
        .iter()
        .filter(|l| is_on(date, l.started_at))
        .collect();
    let attempted = todays.len() as u64;
    let succeeded = todays.iter().filter(|l| l.success).count() as u64;
    CorrectionStats {
        attempted,
        succeeded,
        success_rate: if attempted > 0 {
            Some(succeeded as f64 / attempted as f64)
        } else {
            None
        },
    }
}

pub fn summarize_recoveries(date: NaiveDate, executions: &[RecoveryExecution]) -> RecoveryStats {
    let todays: Vec<&RecoveryExecution> = executions
        .iter()
        .filter(|e| is_on(date, e.created_at))
        .collect();
    let count = todays.len() as u64;
    let succeeded = todays
        .iter()
        .filter(|e| e.status == ExecutionStatus::Succeeded)
        .count() as u64;
    let durations: Vec<f64> = todays
        .iter()
        .filter_map(|e| match (e.started_at, e.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_seconds() as f64),
            _ => None,
        })
        .collect();
    RecoveryStats {
        executions: count,
        succeeded,
        success_rate: if count > 0 {
            Some(succeeded as f64 / count as f64)
        } else {
            None
        },
        mean_duration_seconds: mean(&durations),
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// 有界的每日汇总存储
pub struct SummaryStore {
    summaries: Arc<RwLock<BTreeMap<NaiveDate, DailySummary>>>,
    retention_days: usize,
}

impl SummaryStore {
    pub fn new(retention_days: usize) -> Self {
        Self {
            summaries: Arc::new(RwLock::new(BTreeMap::new())),
            retention_days,
        }
    }

    /// 写入当日汇总, 超出保留期的最旧条目被淘汰
    pub async fn put(&self, summary: DailySummary) {
        let mut summaries = self.summaries.write().await;
        summaries.insert(summary.date, summary);
        while summaries.len() > self.retention_days {
            summaries.pop_first();
        }
    }

    pub async fn get(&self, date: NaiveDate) -> Option<DailySummary> {
        self.summaries.read().await.get(&date).cloned()
    }

    pub async fn range(&self, from: NaiveDate, to: NaiveDate) -> Vec<DailySummary> {
        self.summaries
            .read()
            .await
            .range(from..=to)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub async fn list(&self) -> Vec<DailySummary> {
        self.summaries.read().await.values().cloned().collect()
    }
}

/// 统计聚合器
///
/// 持各存储的只读句柄, 按日汇总并落入有界存储。
pub struct StatsAggregator {
    alerts: Arc<AlertManager>,
    queue: Arc<NotificationQueue>,
    corrections: Arc<CorrectionLogStore>,
    recoveries: Arc<RecoveryOrchestrator>,
    store: Arc<SummaryStore>,
}

impl StatsAggregator {
    pub fn new(
        alerts: Arc<AlertManager>,
        queue: Arc<NotificationQueue>,
        corrections: Arc<CorrectionLogStore>,
        recoveries: Arc<RecoveryOrchestrator>,
        store: Arc<SummaryStore>,
    ) -> Self {
        Self {
            alerts,
            queue,
            corrections,
            recoveries,
            store,
        }
    }

    pub fn store(&self) -> Arc<SummaryStore> {
        self.store.clone()
    }

    /// 对指定日期做汇总并写入存储
    pub async fn rollup_daily(&self, date: NaiveDate) -> DailySummary {
        let alerts = self.alerts.snapshot().await;
        let items = self.queue.snapshot().await;
        let logs = self.corrections.snapshot().await;
        let executions = self.recoveries.list_executions().await;

        let summary = DailySummary {
            date,
            alerts: summarize_alerts(date, &alerts),
            notifications: summarize_notifications(date, &items),
            corrections: summarize_corrections(date, &logs),
            recoveries: summarize_recoveries(date, &executions),
            generated_at: Utc::now(),
        };

        info!(
            date = %date,
            alerts_created = summary.alerts.created,
            notifications_delivered = summary.notifications.delivered,
            corrections_attempted = summary.corrections.attempted,
            recovery_executions = summary.recoveries.executions,
            "Daily summary generated"
        );

        self.store.put(summary.clone()).await;
        summary
    }

    /// 将已存的每日汇总聚合成月度视图
    pub async fn monthly(&self, year: i32, month: u32) -> MonthlySummary {
        let dailies: Vec<DailySummary> = self
            .store
            .list()
            .await
            .into_iter()
            .filter(|s| s.date.year() == year && s.date.month() == month)
            .collect();

        let mut summary = MonthlySummary {
            year,
            month,
            days_covered: dailies.len() as u32,
            alerts_created: 0,
            alerts_resolved: 0,
            notifications_delivered: 0,
            notifications_failed: 0,
            corrections_attempted: 0,
            corrections_succeeded: 0,
            recovery_executions: 0,
            recovery_succeeded: 0,
        };
        for daily in &dailies {
            summary.alerts_created += daily.alerts.created;
            summary.alerts_resolved += daily.alerts.resolved;
            summary.notifications_delivered += daily.notifications.delivered;
            summary.notifications_failed += daily.notifications.failed;
            summary.corrections_attempted += daily.corrections.attempted;
            summary.corrections_succeeded += daily.corrections.succeeded;
            summary.recovery_executions += daily.recoveries.executions;
            summary.recovery_succeeded += daily.recoveries.succeeded;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use vigil_types::Scope;
    use vigil_types::Severity;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 14).unwrap()
    }

    fn at(date: NaiveDate, hour: u32) -> DateTime<Utc> {
        date.and_hms_opt(hour, 0, 0).unwrap().and_utc()
    }

    fn alert_on(date: NaiveDate) -> Alert {
        let mut alert = Alert::internal(
            Scope::unit("unit-1"),
            Severity::Warning,
            "fp",
            "t",
            "m",
        );
        alert.created_at = at(date, 8);
        alert.first_occurrence = alert.created_at;
        alert.last_occurrence = alert.created_at;
        alert
    }

    #[test]
    fn alert_stats_compute_means_and_auto_resolved() {
        let date = day();
        let mut a = alert_on(date);
        a.acknowledged_at = Some(a.created_at + Duration::seconds(60));
        a.resolved_at = Some(a.created_at + Duration::seconds(300));
        a.resolution = Some(ResolutionKind::Auto);
        a.escalation_level = 2;

        let mut b = alert_on(date);
        b.resolved_at = Some(b.created_at + Duration::seconds(100));
        b.resolution = Some(ResolutionKind::Manual);

        // 前一天的告警不参与
        let stale = alert_on(date.pred_opt().unwrap());

        let stats = summarize_alerts(date, &[a, b, stale]);
        assert_eq!(stats.created, 2);
        assert_eq!(stats.resolved, 2);
        assert_eq!(stats.auto_resolved, 1);
        assert_eq!(stats.max_escalation_level, 2);
        assert_eq!(stats.mean_seconds_to_acknowledge, Some(60.0));
        assert_eq!(stats.mean_seconds_to_resolve, Some(200.0));
    }

    #[test]
    fn correction_stats_success_rate() {
        let date = day();
        let make = |success: bool| CorrectionLog {
            id: "l".to_string(),
            alert_id: "a".to_string(),
            rule_id: "r".to_string(),
            unit_id: "u".to_string(),
            action: vigil_correction::CorrectionAction::RestartService,
            before: None,
            after: None,
            cost_delta: None,
            quality_delta: None,
            success,
            error: None,
            started_at: at(date, 9),
            duration_ms: 10,
        };
        let stats = summarize_corrections(date, &[make(true), make(true), make(false)]);
        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.succeeded, 2);
        assert!((stats.success_rate.unwrap() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn empty_day_has_no_rates() {
        let stats = summarize_corrections(day(), &[]);
        assert_eq!(stats.attempted, 0);
        assert!(stats.success_rate.is_none());
    }

    #[tokio::test]
    async fn summary_store_evicts_oldest_beyond_retention() {
        let store = SummaryStore::new(2);
        for offset in 0..3 {
            let date = day() + Duration::days(offset);
            store
                .put(DailySummary {
                    date,
                    alerts: AlertStats::default(),
                    notifications: NotificationStats::default(),
                    corrections: CorrectionStats::default(),
                    recoveries: RecoveryStats::default(),
                    generated_at: Utc::now(),
                })
                .await;
        }
        assert!(store.get(day()).await.is_none());
        assert!(store.get(day() + Duration::days(2)).await.is_some());
        assert_eq!(store.list().await.len(), 2);
    }
}
