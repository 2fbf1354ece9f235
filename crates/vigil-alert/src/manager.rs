use crate::history::EscalationHistoryStore;
use crate::model::{Alert, AlertError, AlertStatus, Annotation, ResolutionKind};
use crate::policy::PolicyStore;
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use vigil_core::SharedEventBus;
use vigil_notify::NotificationQueue;
use vigil_rule::AlertCandidate;
use vigil_types::{topics, Message};

/// 提交候选的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// 创建了新告警
    Created(String),
    /// 合并进了既有的未解决告警
    Deduplicated(String),
}

impl SubmitOutcome {
    pub fn alert_id(&self) -> &str {
        match self {
            SubmitOutcome::Created(id) | SubmitOutcome::Deduplicated(id) => id,
        }
    }
}

/// 告警内部存储
///
/// by_id 与 open_by_fingerprint 在同一把锁下维护，
/// 对指纹的 create-if-absent 因此是原子的，不相关的告警不会互相争用全局锁。
struct AlertStore {
    by_id: HashMap<String, Alert>,
    open_by_fingerprint: HashMap<String, String>,
}

/// 告警管理器
///
/// 保证：任意时刻每个指纹至多存在一条未解决告警。
pub struct AlertManager {
    store: Arc<RwLock<AlertStore>>,
    queue: Arc<NotificationQueue>,
    policies: Arc<PolicyStore>,
    history: Arc<EscalationHistoryStore>,
    bus: SharedEventBus,
}

impl AlertManager {
    pub fn new(
        queue: Arc<NotificationQueue>,
        policies: Arc<PolicyStore>,
        history: Arc<EscalationHistoryStore>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            store: Arc::new(RwLock::new(AlertStore {
                by_id: HashMap::new(),
                open_by_fingerprint: HashMap::new(),
            })),
            queue,
            policies,
            history,
            bus,
        }
    }

    /// 提交告警候选
    ///
    /// 同指纹存在未解决告警时合并（去重计数 +1，更新最近发生时间），
    /// 否则创建新告警、入队级别 0 通知，并在标记自动纠正时移交纠正引擎。
    /// 对重复候选幂等：绝不会为同一指纹创建第二条未解决告警。
    pub async fn submit_candidate(&self, candidate: &AlertCandidate) -> SubmitOutcome {
        let alert = Alert::from_candidate(candidate);
        self.submit_alert(alert).await
    }

    /// 提交一条构造好的告警（内部来源：元告警、纠正失败、崩溃）
    pub async fn submit_alert(&self, alert: Alert) -> SubmitOutcome {
        let occurred_at = alert.last_occurrence;

        // 指纹索引上的原子 create-if-absent
        let created = {
            let mut store = self.store.write().await;
            if let Some(existing_id) = store.open_by_fingerprint.get(&alert.fingerprint).cloned() {
                if let Some(existing) = store.by_id.get_mut(&existing_id) {
                    if existing.is_active() {
                        existing.duplicate_count += 1;
                        existing.last_occurrence = occurred_at;
                        debug!(
                            alert_id = %existing_id,
                            duplicates = existing.duplicate_count,
                            "Candidate deduplicated into existing alert"
                        );
                        return SubmitOutcome::Deduplicated(existing_id);
                    }
                }
                // 索引指向已解决的告警，视为失效并覆盖
                store.open_by_fingerprint.remove(&alert.fingerprint);
            }

            let alert = alert;
            store
                .open_by_fingerprint
                .insert(alert.fingerprint.clone(), alert.id.clone());
            store.by_id.insert(alert.id.clone(), alert.clone());
            alert
        };

        info!(
            alert_id = %created.id,
            fingerprint = %created.fingerprint,
            severity = %created.severity,
            "Alert created"
        );

        // 级别 0 通知
        self.notify_level(&created, 0).await;

        self.bus.publish(Message::new(
            topics::ALERT_CREATED,
            json!({
                "alert_id": created.id,
                "fingerprint": created.fingerprint,
                "severity": created.severity.to_string(),
                "unit_id": created.scope.unit_id,
            }),
        ));

        // 标记自动纠正的告警移交纠正引擎
        if created.auto_correct {
            self.bus.publish(Message::new(
                topics::ALERT_AUTO_CORRECT,
                json!({ "alert_id": created.id }),
            ));
        }

        SubmitOutcome::Created(created.id)
    }

    /// 入队某个升级级别的通知
    ///
    /// 策略级别配置了名单时按名单发送，否则扇出到所有匹配的订阅者。
    async fn notify_level(&self, alert: &Alert, level: u32) {
        let subject = format!("[{}] {}", alert.severity, alert.title);
        let body = alert.message.clone();

        let policy = self.policies.policy_for(alert.severity).await;
        let subscribers = policy
            .as_ref()
            .and_then(|p| p.level(level))
            .map(|l| l.subscribers.clone())
            .unwrap_or_default();

        if subscribers.is_empty() {
            self.queue
                .fan_out(
                    &alert.id,
                    alert.severity,
                    &alert.scope.unit_id,
                    &subject,
                    &body,
                )
                .await;
        } else {
            self.queue
                .fan_out_to(&subscribers, &alert.id, alert.severity, &subject, &body)
                .await;
        }
    }

    /// 确认告警
    ///
    /// 不重置升级级别；是否抑制后续升级由策略的 escalate_after_ack 决定。
    pub async fn acknowledge(&self, alert_id: &str, actor: &str) -> Result<(), AlertError> {
        let mut store = self.store.write().await;
        let alert = store
            .by_id
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

        if alert.is_resolved() {
            return Err(AlertError::AlreadyResolved(alert_id.to_string()));
        }
        if alert.is_acknowledged() {
            return Ok(());
        }

        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledged_by = Some(actor.to_string());
        if alert.status == AlertStatus::Open {
            alert.status = AlertStatus::Acknowledged;
        }
        info!(alert_id = %alert_id, actor = %actor, "Alert acknowledged");
        Ok(())
    }

    /// 解决告警
    ///
    /// 幂等：解决已解决的告警是 no-op，容忍恢复流程与人工操作赛跑。
    /// 解决时显式取消尚未尝试投递的通知。
    pub async fn resolve(
        &self,
        alert_id: &str,
        actor: &str,
        kind: ResolutionKind,
    ) -> Result<(), AlertError> {
        {
            let mut store = self.store.write().await;
            let alert = store
                .by_id
                .get_mut(alert_id)
                .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

            if alert.is_resolved() {
                debug!(alert_id = %alert_id, "Alert already resolved, resolve is a no-op");
                return Ok(());
            }

            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(Utc::now());
            alert.resolved_by = Some(actor.to_string());
            alert.resolution = Some(kind);

            let fingerprint = alert.fingerprint.clone();
            store.open_by_fingerprint.remove(&fingerprint);
        }

        // 不再通知已不存在的状况
        self.queue.cancel_pending_for_alert(alert_id).await;

        self.bus.publish(Message::new(
            topics::ALERT_RESOLVED,
            json!({ "alert_id": alert_id }),
        ));

        info!(alert_id = %alert_id, actor = %actor, kind = ?kind, "Alert resolved");
        Ok(())
    }

    /// 按指纹解决当前未解决的告警（恢复流程等内部调用方使用）
    pub async fn resolve_open_by_fingerprint(
        &self,
        fingerprint: &str,
        actor: &str,
        kind: ResolutionKind,
    ) -> Result<bool, AlertError> {
        let alert_id = {
            let store = self.store.read().await;
            store.open_by_fingerprint.get(fingerprint).cloned()
        };
        match alert_id {
            Some(id) => {
                self.resolve(&id, actor, kind).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// 追加审计批注；已解决的告警也允许
    pub async fn annotate(
        &self,
        alert_id: &str,
        actor: &str,
        note: &str,
    ) -> Result<(), AlertError> {
        let mut store = self.store.write().await;
        let alert = store
            .by_id
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        alert.annotations.push(Annotation {
            at: Utc::now(),
            actor: actor.to_string(),
            note: note.to_string(),
        });
        Ok(())
    }

    /// 将告警推进一个升级级别（升级引擎的单次原子更新）
    ///
    /// 级别只增不减；to_level 必须恰好是当前级别 +1。
    pub async fn escalate(&self, alert_id: &str, to_level: u32) -> Result<Alert, AlertError> {
        let mut store = self.store.write().await;
        let alert = store
            .by_id
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;

        if alert.is_resolved() {
            return Err(AlertError::AlreadyResolved(alert_id.to_string()));
        }
        if to_level != alert.escalation_level + 1 {
            return Err(AlertError::InvalidEscalation(format!(
                "expected level {}, requested {}",
                alert.escalation_level + 1,
                to_level
            )));
        }

        alert.escalation_level = to_level;
        alert.last_escalated_at = Some(Utc::now());
        alert.status = AlertStatus::Escalated;
        Ok(alert.clone())
    }

    /// 标记纠正已尝试（纠正引擎只尝试一次）
    pub async fn mark_correction_attempted(&self, alert_id: &str) -> Result<(), AlertError> {
        let mut store = self.store.write().await;
        let alert = store
            .by_id
            .get_mut(alert_id)
            .ok_or_else(|| AlertError::NotFound(alert_id.to_string()))?;
        alert.correction_attempted = true;
        Ok(())
    }

    pub async fn get(&self, alert_id: &str) -> Option<Alert> {
        let store = self.store.read().await;
        store.by_id.get(alert_id).cloned()
    }

    /// 所有未解决的告警
    pub async fn open_alerts(&self) -> Vec<Alert> {
        let store = self.store.read().await;
        store
            .by_id
            .values()
            .filter(|a| a.is_active())
            .cloned()
            .collect()
    }

    pub async fn alerts_for_unit(&self, unit_id: &str) -> Vec<Alert> {
        let store = self.store.read().await;
        store
            .by_id
            .values()
            .filter(|a| a.scope.unit_id == unit_id)
            .cloned()
            .collect()
    }

    /// 全量快照（统计聚合用）
    pub async fn snapshot(&self) -> Vec<Alert> {
        let store = self.store.read().await;
        store.by_id.values().cloned().collect()
    }

    /// 保留期清理
    ///
    /// 级联删除已解决超过保留期的告警及其通知队列项、升级历史；
    /// 未解决的告警绝不删除。
    pub async fn purge_resolved(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let expired: Vec<String> = {
            let store = self.store.read().await;
            store
                .by_id
                .values()
                .filter(|a| {
                    a.is_resolved() && a.resolved_at.map(|t| t < cutoff).unwrap_or(false)
                })
                .map(|a| a.id.clone())
                .collect()
        };

        for alert_id in &expired {
            {
                let mut store = self.store.write().await;
                store.by_id.remove(alert_id);
            }
            self.queue.purge_for_alert(alert_id).await;
            self.history.purge_for_alert(alert_id).await;
        }

        if !expired.is_empty() {
            warn!(count = expired.len(), "Resolved alerts purged past retention");
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::EscalationHistoryStore;
    use crate::policy::PolicyStore;
    use chrono::Utc;
    use std::sync::Arc;
    use vigil_core::EventBus;
    use vigil_notify::{NotifyChannel, Subscriber, SubscriberDirectory};
    use vigil_types::{ComparisonOperator, Scope, Severity};

    struct Fixture {
        manager: AlertManager,
        queue: Arc<NotificationQueue>,
    }

    async fn fixture() -> Fixture {
        let directory = Arc::new(SubscriberDirectory::new());
        directory
            .save(Subscriber::new("oncall").with_address(NotifyChannel::Console, "operator"))
            .await;
        let queue = Arc::new(NotificationQueue::new(directory, 3));
        let manager = AlertManager::new(
            queue.clone(),
            Arc::new(PolicyStore::new()),
            Arc::new(EscalationHistoryStore::new(1000)),
            Arc::new(EventBus::new(16)),
        );
        Fixture { manager, queue }
    }

    fn candidate(fingerprint_rule: &str) -> AlertCandidate {
        let scope = Scope::unit("svc-A");
        AlertCandidate {
            rule_id: fingerprint_rule.to_string(),
            rule_name: "high_error_rate".to_string(),
            fingerprint: AlertCandidate::fingerprint_for(fingerprint_rule, &scope),
            scope,
            metric: "error_rate".to_string(),
            severity: Severity::Warning,
            operator: ComparisonOperator::GreaterThan,
            threshold: 0.05,
            actual_value: 0.06,
            correction_rule_id: None,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_dedup_n_candidates_one_alert() {
        let f = fixture().await;
        let c = candidate("rule-1");

        let first = f.manager.submit_candidate(&c).await;
        let id = first.alert_id().to_string();
        assert!(matches!(first, SubmitOutcome::Created(_)));

        for _ in 0..4 {
            let outcome = f.manager.submit_candidate(&c).await;
            assert_eq!(outcome, SubmitOutcome::Deduplicated(id.clone()));
        }

        let alert = f.manager.get(&id).await.unwrap();
        assert_eq!(alert.duplicate_count, 4);
        assert_eq!(f.manager.open_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_alert_after_resolution() {
        let f = fixture().await;
        let c = candidate("rule-1");

        let first = f.manager.submit_candidate(&c).await;
        f.manager
            .resolve(first.alert_id(), "operator", ResolutionKind::Manual)
            .await
            .unwrap();

        let second = f.manager.submit_candidate(&c).await;
        assert!(matches!(second, SubmitOutcome::Created(_)));
        assert_ne!(second.alert_id(), first.alert_id());
    }

    #[tokio::test]
    async fn test_resolve_idempotent() {
        let f = fixture().await;
        let outcome = f.manager.submit_candidate(&candidate("rule-1")).await;
        let id = outcome.alert_id();

        f.manager
            .resolve(id, "recovery", ResolutionKind::Recovery)
            .await
            .unwrap();
        // 人工解决信号与恢复流程赛跑：第二次 resolve 是 no-op
        f.manager
            .resolve(id, "operator", ResolutionKind::Manual)
            .await
            .unwrap();

        let alert = f.manager.get(id).await.unwrap();
        assert_eq!(alert.resolution, Some(ResolutionKind::Recovery));
    }

    #[tokio::test]
    async fn test_resolve_missing_is_error() {
        let f = fixture().await;
        assert!(matches!(
            f.manager
                .resolve("nope", "operator", ResolutionKind::Manual)
                .await,
            Err(AlertError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_acknowledge_resolved_is_error() {
        let f = fixture().await;
        let outcome = f.manager.submit_candidate(&candidate("rule-1")).await;
        let id = outcome.alert_id();

        f.manager
            .resolve(id, "operator", ResolutionKind::Manual)
            .await
            .unwrap();
        assert!(matches!(
            f.manager.acknowledge(id, "operator").await,
            Err(AlertError::AlreadyResolved(_))
        ));
    }

    #[tokio::test]
    async fn test_resolve_cancels_unattempted_notifications() {
        let f = fixture().await;
        let outcome = f.manager.submit_candidate(&candidate("rule-1")).await;
        let id = outcome.alert_id();

        let items = f.queue.items_for_alert(id).await;
        assert_eq!(items.len(), 1);

        f.manager
            .resolve(id, "operator", ResolutionKind::Manual)
            .await
            .unwrap();

        let items = f.queue.items_for_alert(id).await;
        assert!(items
            .iter()
            .all(|i| i.status == vigil_notify::DeliveryStatus::Cancelled));
    }

    #[tokio::test]
    async fn test_escalate_monotonic() {
        let f = fixture().await;
        let outcome = f.manager.submit_candidate(&candidate("rule-1")).await;
        let id = outcome.alert_id();

        f.manager.escalate(id, 1).await.unwrap();
        // 跳级不允许
        assert!(f.manager.escalate(id, 3).await.is_err());
        let alert = f.manager.escalate(id, 2).await.unwrap();
        assert_eq!(alert.escalation_level, 2);
        assert_eq!(alert.status, AlertStatus::Escalated);
    }

    #[tokio::test]
    async fn test_purge_resolved_only() {
        let f = fixture().await;
        let open = f.manager.submit_candidate(&candidate("rule-1")).await;
        let resolved = f.manager.submit_candidate(&candidate("rule-2")).await;
        f.manager
            .resolve(resolved.alert_id(), "operator", ResolutionKind::Manual)
            .await
            .unwrap();

        let purged = f.manager.purge_resolved(Duration::seconds(-1)).await;
        assert_eq!(purged, 1);
        assert!(f.manager.get(open.alert_id()).await.is_some());
        assert!(f.manager.get(resolved.alert_id()).await.is_none());
    }
}
