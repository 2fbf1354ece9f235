use crate::history::{EscalationHistoryEntry, EscalationHistoryStore};
use crate::manager::AlertManager;
use crate::model::Alert;
use crate::policy::PolicyStore;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vigil_notify::NotificationQueue;

/// 升级原因（审计记录用）
const REASON_TIME_THRESHOLD: &str = "time threshold exceeded";

/// 升级引擎
///
/// 定时扫描未解决的告警，按策略推进升级级别并入队该级别的通知。
/// 级别 K 的通知一定在级别 K-1 之后入队（每个告警单线程推进）。
pub struct EscalationEngine {
    manager: Arc<AlertManager>,
    policies: Arc<PolicyStore>,
    queue: Arc<NotificationQueue>,
    history: Arc<EscalationHistoryStore>,
    running: Arc<RwLock<bool>>,
}

impl EscalationEngine {
    pub fn new(
        manager: Arc<AlertManager>,
        policies: Arc<PolicyStore>,
        queue: Arc<NotificationQueue>,
        history: Arc<EscalationHistoryStore>,
    ) -> Self {
        Self {
            manager,
            policies,
            queue,
            history,
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// 一次升级扫描；返回推进的告警数
    pub async fn tick(&self, now: DateTime<Utc>) -> usize {
        let mut escalated = 0;

        for alert in self.manager.open_alerts().await {
            match self.try_escalate(&alert, now).await {
                Ok(true) => escalated += 1,
                Ok(false) => {}
                Err(e) => {
                    // 单条告警的失败不影响本轮其他告警
                    warn!(alert_id = %alert.id, error = %e, "Escalation attempt failed");
                }
            }
        }

        escalated
    }

    async fn try_escalate(&self, alert: &Alert, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let Some(policy) = self.policies.policy_for(alert.severity).await else {
            return Ok(false);
        };

        // 确认只抑制后续升级（由策略开关决定），绝不重置级别
        if alert.is_acknowledged() && !policy.escalate_after_ack {
            return Ok(false);
        }

        let next_level = alert.escalation_level + 1;
        if next_level > policy.max_level() {
            // 已达最高级别：继续老化不再产生新升级，报表中可见为 max-escalated
            debug!(alert_id = %alert.id, level = alert.escalation_level, "Alert at max escalation");
            return Ok(false);
        }

        let Some(level) = policy.level(next_level) else {
            return Ok(false);
        };
        let due_at = alert.created_at + Duration::minutes(level.delay_minutes as i64);
        if now < due_at {
            return Ok(false);
        }

        let from_level = alert.escalation_level;
        let updated = self.manager.escalate(&alert.id, next_level).await?;

        let subject = format!(
            "[{}] escalation level {}: {}",
            updated.severity, next_level, updated.title
        );
        self.queue
            .fan_out_to(
                &level.subscribers,
                &updated.id,
                updated.severity,
                &subject,
                &updated.message,
            )
            .await;

        self.history
            .append(EscalationHistoryEntry {
                id: uuid::Uuid::new_v4().to_string(),
                alert_id: updated.id.clone(),
                from_level,
                to_level: next_level,
                notified: level.subscribers.clone(),
                reason: REASON_TIME_THRESHOLD.to_string(),
                at: now,
            })
            .await;

        info!(
            alert_id = %updated.id,
            from_level,
            to_level = next_level,
            "Alert escalated"
        );
        Ok(true)
    }

    /// 启动定时升级扫描
    pub async fn start(&self, interval_secs: u64) {
        let mut running = self.running.write().await;
        if *running {
            warn!("Escalation engine is already running");
            return;
        }
        *running = true;
        drop(running);

        info!(interval_secs, "Escalation engine started");

        let manager = self.manager.clone();
        let policies = self.policies.clone();
        let queue = self.queue.clone();
        let history = self.history.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            let engine = EscalationEngine {
                manager,
                policies,
                queue,
                history,
                running: running.clone(),
            };
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
            loop {
                ticker.tick().await;
                if !*running.read().await {
                    info!("Escalation engine stopped");
                    break;
                }
                engine.tick(Utc::now()).await;
            }
        });
    }

    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
    }
}
