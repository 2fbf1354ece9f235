//! 控制环运行时指标 (prometheus)

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder,
};

/// 控制环指标集合
///
/// 由实时路径在事件发生时打点, 经 API 的 /metrics 以文本格式导出。
pub struct ControlLoopMetrics {
    samples_ingested_total: Counter,
    candidates_emitted_total: Counter,
    alerts_created_total: CounterVec,
    alerts_deduplicated_total: Counter,
    alerts_resolved_total: CounterVec,
    alerts_escalated_total: Counter,
    notifications_delivered_total: Counter,
    notifications_failed_total: CounterVec,
    corrections_attempted_total: Counter,
    corrections_succeeded_total: Counter,
    recovery_executions_total: CounterVec,
    open_alerts: Gauge,

    registry: Registry,
}

impl ControlLoopMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let samples_ingested_total = Counter::new(
            "vigil_samples_ingested_total",
            "Total number of metric samples ingested",
        )?;
        registry.register(Box::new(samples_ingested_total.clone()))?;

        let candidates_emitted_total = Counter::new(
            "vigil_candidates_emitted_total",
            "Total number of alert candidates emitted by rule evaluation",
        )?;
        registry.register(Box::new(candidates_emitted_total.clone()))?;

        let alerts_created_total = CounterVec::new(
            Opts::new("vigil_alerts_created_total", "Total number of alerts created"),
            &["severity"],
        )?;
        registry.register(Box::new(alerts_created_total.clone()))?;

        let alerts_deduplicated_total = Counter::new(
            "vigil_alerts_deduplicated_total",
            "Total number of candidates merged into an open alert",
        )?;
        registry.register(Box::new(alerts_deduplicated_total.clone()))?;

        let alerts_resolved_total = CounterVec::new(
            Opts::new("vigil_alerts_resolved_total", "Total number of alerts resolved"),
            &["kind"],
        )?;
        registry.register(Box::new(alerts_resolved_total.clone()))?;

        let alerts_escalated_total = Counter::new(
            "vigil_alerts_escalated_total",
            "Total number of escalation level advances",
        )?;
        registry.register(Box::new(alerts_escalated_total.clone()))?;

        let notifications_delivered_total = Counter::new(
            "vigil_notifications_delivered_total",
            "Total number of notifications delivered",
        )?;
        registry.register(Box::new(notifications_delivered_total.clone()))?;

        let notifications_failed_total = CounterVec::new(
            Opts::new(
                "vigil_notifications_failed_total",
                "Total number of notifications that exhausted their attempts",
            ),
            &["channel"],
        )?;
        registry.register(Box::new(notifications_failed_total.clone()))?;

        let corrections_attempted_total = Counter::new(
            "vigil_corrections_attempted_total",
            "Total number of auto-correction attempts",
        )?;
        registry.register(Box::new(corrections_attempted_total.clone()))?;

        let corrections_succeeded_total = Counter::new(
            "vigil_corrections_succeeded_total",
            "Total number of successful auto-corrections",
        )?;
        registry.register(Box::new(corrections_succeeded_total.clone()))?;

        let recovery_executions_total = CounterVec::new(
            Opts::new(
                "vigil_recovery_executions_total",
                "Total number of finished recovery executions",
            ),
            &["status"],
        )?;
        registry.register(Box::new(recovery_executions_total.clone()))?;

        let open_alerts = Gauge::new("vigil_open_alerts", "Number of currently open alerts")?;
        registry.register(Box::new(open_alerts.clone()))?;

        Ok(Self {
            samples_ingested_total,
            candidates_emitted_total,
            alerts_created_total,
            alerts_deduplicated_total,
            alerts_resolved_total,
            alerts_escalated_total,
            notifications_delivered_total,
            notifications_failed_total,
            corrections_attempted_total,
            corrections_succeeded_total,
            recovery_executions_total,
            open_alerts,
            registry,
        })
    }

    pub fn record_sample(&self) {
        self.samples_ingested_total.inc();
    }

    pub fn record_candidate(&self) {
        self.candidates_emitted_total.inc();
    }

    pub fn record_alert_created(&self, severity: &str) {
        self.alerts_created_total.with_label_values(&[severity]).inc();
    }

    pub fn record_alert_deduplicated(&self) {
        self.alerts_deduplicated_total.inc();
    }

    pub fn record_alert_resolved(&self, kind: &str) {
        self.alerts_resolved_total.with_label_values(&[kind]).inc();
    }

    pub fn record_escalation(&self) {
        self.alerts_escalated_total.inc();
    }

    pub fn record_notifications_delivered(&self, count: usize) {
        self.notifications_delivered_total.inc_by(count as f64);
    }

    pub fn record_notification_failed(&self, channel: &str) {
        self.notifications_failed_total
            .with_label_values(&[channel])
            .inc();
    }

    pub fn record_correction(&self, success: bool) {
        self.corrections_attempted_total.inc();
        if success {
            self.corrections_succeeded_total.inc();
        }
    }

    pub fn record_recovery_finished(&self, status: &str) {
        self.recovery_executions_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn set_open_alerts(&self, count: usize) {
        self.open_alerts.set(count as f64);
    }

    /// 以 prometheus 文本格式导出所有指标
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_appear_in_export() {
        let metrics = ControlLoopMetrics::new().unwrap();
        metrics.record_sample();
        metrics.record_alert_created("critical");
        metrics.record_notifications_delivered(1);
        metrics.record_correction(true);
        metrics.set_open_alerts(3);

        let text = metrics.export().unwrap();
        assert!(text.contains("vigil_samples_ingested_total 1"));
        assert!(text.contains("vigil_alerts_created_total"));
        assert!(text.contains("severity=\"critical\""));
        assert!(text.contains("vigil_open_alerts 3"));
    }

    #[test]
    fn correction_success_rate_counters() {
        let metrics = ControlLoopMetrics::new().unwrap();
        metrics.record_correction(true);
        metrics.record_correction(false);

        let text = metrics.export().unwrap();
        assert!(text.contains("vigil_corrections_attempted_total 2"));
        assert!(text.contains("vigil_corrections_succeeded_total 1"));
    }
}
