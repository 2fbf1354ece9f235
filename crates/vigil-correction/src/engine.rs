use crate::log::{CorrectionLog, CorrectionLogStore};
use crate::model::{CorrectionAction, CorrectionError, CorrectionRuleStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};
use vigil_alert::{Alert, AlertManager};
use vigil_core::SharedEventBus;
use vigil_types::{topics, Message, Scope};

/// 成本/质量快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostQualitySnapshot {
    pub cost: f64,
    pub quality: f64,
}

/// 动作执行结果（外部执行器返回）
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,
    pub detail: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            detail: None,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            detail: None,
            error: Some(error.into()),
        }
    }
}

/// 纠正动作执行器契约；动作内部逻辑在核心之外实现
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn apply(&self, action: &CorrectionAction, unit_id: &str) -> anyhow::Result<ActionOutcome>;
}

/// 成本/质量指标快照提供方（外部遥测源）
#[async_trait]
pub trait MetricSnapshotProvider: Send + Sync {
    async fn snapshot(&self, unit_id: &str) -> anyhow::Result<CostQualitySnapshot>;
}

/// 纠正处理结果
#[derive(Debug, Clone)]
pub enum CorrectionOutcome {
    /// 已执行（成败见日志）
    Applied(CorrectionLog),
    /// 跳过（规则缺失/停用/已尝试过）
    Skipped(String),
}

/// 纠正引擎
///
/// 对标记自动纠正的告警：查规则、快照、执行动作、再快照、记日志。
/// 失败不自动重试，也绝不自行换用第二种动作——只抬升告警级别交还给人。
pub struct CorrectionEngine {
    rules: Arc<CorrectionRuleStore>,
    log: Arc<CorrectionLogStore>,
    executor: Arc<dyn ActionExecutor>,
    snapshots: Arc<dyn MetricSnapshotProvider>,
    manager: Arc<AlertManager>,
    bus: SharedEventBus,
}

impl CorrectionEngine {
    pub fn new(
        rules: Arc<CorrectionRuleStore>,
        log: Arc<CorrectionLogStore>,
        executor: Arc<dyn ActionExecutor>,
        snapshots: Arc<dyn MetricSnapshotProvider>,
        manager: Arc<AlertManager>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            rules,
            log,
            executor,
            snapshots,
            manager,
            bus,
        }
    }

    /// 处理一条可自动纠正的告警
    pub async fn handle_alert(&self, alert: &Alert) -> Result<CorrectionOutcome, CorrectionError> {
        let rule_id = alert
            .correction_rule_id
            .as_deref()
            .ok_or_else(|| CorrectionError::NoRule(alert.id.clone()))?;

        if alert.correction_attempted {
            return Ok(CorrectionOutcome::Skipped("correction already attempted".into()));
        }

        let Some(rule) = self.rules.get(rule_id).await else {
            warn!(alert_id = %alert.id, rule_id = %rule_id, "Correction rule missing");
            return Ok(CorrectionOutcome::Skipped(format!(
                "correction rule {} not found",
                rule_id
            )));
        };
        if !rule.enabled || !rule.auto_enabled {
            return Ok(CorrectionOutcome::Skipped(format!(
                "correction rule {} disabled",
                rule.id
            )));
        }

        let _ = self.manager.mark_correction_attempted(&alert.id).await;

        let unit_id = alert.scope.unit_id.clone();
        let started_at = Utc::now();
        let clock = Instant::now();

        let before = match self.snapshots.snapshot(&unit_id).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(unit_id = %unit_id, error = %e, "Pre-correction snapshot failed");
                None
            }
        };

        info!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            action = rule.action.kind(),
            unit_id = %unit_id,
            "Applying correction action"
        );

        let outcome = match timeout(
            Duration::from_secs(rule.timeout_seconds),
            self.executor.apply(&rule.action, &unit_id),
        )
        .await
        {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => ActionOutcome::failure(e.to_string()),
            Err(_) => ActionOutcome::failure(format!(
                "correction action timed out after {}s",
                rule.timeout_seconds
            )),
        };

        let after = match self.snapshots.snapshot(&unit_id).await {
            Ok(s) => Some(s),
            Err(e) => {
                warn!(unit_id = %unit_id, error = %e, "Post-correction snapshot failed");
                None
            }
        };

        let (cost_delta, quality_delta) = match (before, after) {
            (Some(b), Some(a)) => (Some(a.cost - b.cost), Some(a.quality - b.quality)),
            _ => (None, None),
        };

        // 成功 = 执行成功且前后变化没有超出容忍度向坏的方向移动
        let deltas_ok = match (cost_delta, quality_delta) {
            (Some(c), Some(q)) => c <= rule.tolerance && q >= -rule.tolerance,
            // 快照缺失时只依据执行器结果
            _ => true,
        };
        let success = outcome.success && deltas_ok;

        let error = if success {
            None
        } else if let Some(e) = outcome.error.clone() {
            Some(e)
        } else {
            Some(format!(
                "correction moved metrics beyond tolerance (cost {:+.4}, quality {:+.4})",
                cost_delta.unwrap_or(0.0),
                quality_delta.unwrap_or(0.0)
            ))
        };

        let log = CorrectionLog {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert.id.clone(),
            rule_id: rule.id.clone(),
            unit_id: unit_id.clone(),
            action: rule.action.clone(),
            before,
            after,
            cost_delta,
            quality_delta,
            success,
            error: error.clone(),
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
        };
        self.log.append(log.clone()).await;

        if !success {
            self.raise_failure_alert(alert, &rule.id, error.as_deref().unwrap_or("unknown"))
                .await;
        } else {
            info!(
                alert_id = %alert.id,
                rule_id = %rule.id,
                cost_delta = ?cost_delta,
                quality_delta = ?quality_delta,
                "Correction applied successfully"
            );
        }

        Ok(CorrectionOutcome::Applied(log))
    }

    /// 纠正失败：抬升一级、交还给人，绝不自动重试
    async fn raise_failure_alert(&self, original: &Alert, rule_id: &str, reason: &str) {
        error!(
            alert_id = %original.id,
            rule_id = %rule_id,
            error = %reason,
            "Auto-correction failed, escalating to humans"
        );

        let escalated = Alert::internal(
            Scope::unit(original.scope.unit_id.clone()),
            original.severity.escalated(),
            format!("correction-failed:{}", original.fingerprint),
            format!("auto-correction failed: {}", original.title),
            format!(
                "correction rule {} failed on alert {}: {}",
                rule_id, original.id, reason
            ),
        );
        self.manager.submit_alert(escalated).await;

        self.bus.publish(Message::new(
            topics::META_CORRECTION_FAILED,
            json!({
                "alert_id": original.id,
                "rule_id": rule_id,
                "error": reason,
            }),
        ));
    }
}
