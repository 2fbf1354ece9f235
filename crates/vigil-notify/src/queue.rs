use crate::subscriber::{NotifyChannel, SubscriberDirectory};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};
use vigil_types::Severity;

/// 通知队列错误
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    #[error("No adapter registered for channel: {0}")]
    NoAdapter(String),
}

/// 投递状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// 待投递（含等待重试）
    Pending,
    /// 已投递
    Delivered,
    /// 重试耗尽，投递失败
    Failed,
    /// 已取消（父告警在投递前解决）
    Cancelled,
}

/// 队列项：一条（告警，订阅者，渠道）出站消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub alert_id: String,
    pub subscriber_id: String,
    pub channel: NotifyChannel,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub severity: Severity,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub scheduled_for: DateTime<Utc>,
    pub last_error: Option<String>,
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Delivered | DeliveryStatus::Failed | DeliveryStatus::Cancelled
        )
    }
}

/// 通知队列（内存实现）
///
/// 告警管理器和升级引擎写入，分发器消费。
pub struct NotificationQueue {
    items: Arc<RwLock<HashMap<String, QueueItem>>>,
    directory: Arc<SubscriberDirectory>,
    max_attempts: u32,
}

impl NotificationQueue {
    pub fn new(directory: Arc<SubscriberDirectory>, max_attempts: u32) -> Self {
        Self {
            items: Arc::new(RwLock::new(HashMap::new())),
            directory,
            max_attempts,
        }
    }

    /// 将告警扇出到所有匹配的订阅者（每个偏好渠道一条）
    pub async fn fan_out(
        &self,
        alert_id: &str,
        severity: Severity,
        unit_id: &str,
        subject: &str,
        body: &str,
    ) -> usize {
        let subscribers = self.directory.matching(severity, unit_id).await;
        let ids: Vec<String> = subscribers.iter().map(|s| s.id.clone()).collect();
        self.fan_out_to(&ids, alert_id, severity, subject, body).await
    }

    /// 将告警扇出到指定订阅者（升级级别的通知名单）
    pub async fn fan_out_to(
        &self,
        subscriber_ids: &[String],
        alert_id: &str,
        severity: Severity,
        subject: &str,
        body: &str,
    ) -> usize {
        let now = Utc::now();
        let mut enqueued = 0;

        let mut items = self.items.write().await;
        for subscriber_id in subscriber_ids {
            let Some(subscriber) = self.directory.get(subscriber_id).await else {
                debug!(subscriber_id = %subscriber_id, "Unknown subscriber skipped");
                continue;
            };
            if !subscriber.enabled {
                continue;
            }
            for (channel, recipient) in &subscriber.addresses {
                let item = QueueItem {
                    id: uuid::Uuid::new_v4().to_string(),
                    alert_id: alert_id.to_string(),
                    subscriber_id: subscriber.id.clone(),
                    channel: *channel,
                    recipient: recipient.clone(),
                    subject: subject.to_string(),
                    body: body.to_string(),
                    severity,
                    status: DeliveryStatus::Pending,
                    attempts: 0,
                    max_attempts: self.max_attempts,
                    scheduled_for: now,
                    last_error: None,
                    external_id: None,
                    created_at: now,
                    delivered_at: None,
                };
                items.insert(item.id.clone(), item);
                enqueued += 1;
            }
        }

        if enqueued > 0 {
            info!(alert_id = %alert_id, count = enqueued, "Notifications enqueued");
        }
        enqueued
    }

    /// 到期的待投递项
    pub async fn due_items(&self, now: DateTime<Utc>) -> Vec<QueueItem> {
        let items = self.items.read().await;
        items
            .values()
            .filter(|i| i.status == DeliveryStatus::Pending && i.scheduled_for <= now)
            .cloned()
            .collect()
    }

    pub async fn update(&self, item: QueueItem) -> Result<(), NotifyError> {
        let mut items = self.items.write().await;
        match items.get_mut(&item.id) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(NotifyError::ItemNotFound(item.id)),
        }
    }

    /// 取消告警的未尝试投递项；已尝试过的保留作审计记录
    pub async fn cancel_pending_for_alert(&self, alert_id: &str) -> usize {
        let mut items = self.items.write().await;
        let mut cancelled = 0;
        for item in items.values_mut() {
            if item.alert_id == alert_id
                && item.status == DeliveryStatus::Pending
                && item.attempts == 0
            {
                item.status = DeliveryStatus::Cancelled;
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            info!(alert_id = %alert_id, count = cancelled, "Pending notifications cancelled");
        }
        cancelled
    }

    pub async fn items_for_alert(&self, alert_id: &str) -> Vec<QueueItem> {
        let items = self.items.read().await;
        items
            .values()
            .filter(|i| i.alert_id == alert_id)
            .cloned()
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<QueueItem> {
        let items = self.items.read().await;
        items.get(id).cloned()
    }

    /// 全量快照（统计聚合用）
    pub async fn snapshot(&self) -> Vec<QueueItem> {
        let items = self.items.read().await;
        items.values().cloned().collect()
    }

    /// 级联清理：删除给定告警的全部队列项
    pub async fn purge_for_alert(&self, alert_id: &str) -> usize {
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, i| i.alert_id != alert_id);
        before - items.len()
    }
}
