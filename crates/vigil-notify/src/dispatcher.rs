use crate::adapter::ChannelAdapter;
use crate::queue::{DeliveryStatus, NotificationQueue, QueueItem};
use crate::subscriber::{NotifyChannel, SubscriberDirectory};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};
use vigil_core::SharedEventBus;
use vigil_types::{topics, Message, Severity};

/// 重试退避基数（秒）
const BACKOFF_BASE_SECONDS: i64 = 30;

/// 重试退避上限（秒）
const BACKOFF_CAP_SECONDS: i64 = 15 * 60;

/// 一次分发循环的统计
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub rescheduled: usize,
}

/// 通知分发器
///
/// 消费队列中到期的待投递项，尊重订阅者免打扰时段，
/// 投递失败按指数退避重试，耗尽后标记失败并发出元告警。
/// 单条投递失败绝不让分发循环崩溃。
pub struct NotificationDispatcher {
    queue: Arc<NotificationQueue>,
    directory: Arc<SubscriberDirectory>,
    adapters: HashMap<NotifyChannel, Arc<dyn ChannelAdapter>>,
    attempt_timeout: std::time::Duration,
    bus: SharedEventBus,
}

impl NotificationDispatcher {
    pub fn new(
        queue: Arc<NotificationQueue>,
        directory: Arc<SubscriberDirectory>,
        bus: SharedEventBus,
        attempt_timeout: std::time::Duration,
    ) -> Self {
        Self {
            queue,
            directory,
            adapters: HashMap::new(),
            attempt_timeout,
            bus,
        }
    }

    /// 启动时注册渠道适配器
    pub fn register_adapter(&mut self, channel: NotifyChannel, adapter: Arc<dyn ChannelAdapter>) {
        info!(channel = %channel, adapter = adapter.name(), "Channel adapter registered");
        self.adapters.insert(channel, adapter);
    }

    /// 处理所有到期的队列项
    pub async fn process_due(&self, now: DateTime<Utc>) -> DispatchStats {
        let mut stats = DispatchStats::default();

        for item in self.queue.due_items(now).await {
            match self.process_item(item, now).await {
                ItemOutcome::Delivered => stats.delivered += 1,
                ItemOutcome::Retried => stats.retried += 1,
                ItemOutcome::Failed => stats.failed += 1,
                ItemOutcome::Rescheduled => stats.rescheduled += 1,
            }
        }

        stats
    }

    async fn process_item(&self, mut item: QueueItem, now: DateTime<Utc>) -> ItemOutcome {
        // 免打扰时段：非 Critical 顺延到时段结束，不丢弃
        if let Some(subscriber) = self.directory.get(&item.subscriber_id).await {
            if let Some(quiet) = &subscriber.quiet_hours {
                let pierce = item.severity == Severity::Critical && quiet.override_for_critical;
                if quiet.contains(now) && !pierce {
                    item.scheduled_for = quiet.next_end(now);
                    debug!(
                        item_id = %item.id,
                        rescheduled_for = %item.scheduled_for,
                        "Notification deferred by quiet hours"
                    );
                    let _ = self.queue.update(item).await;
                    return ItemOutcome::Rescheduled;
                }
            }
        }

        let Some(adapter) = self.adapters.get(&item.channel) else {
            warn!(item_id = %item.id, channel = %item.channel, "No adapter for channel");
            return self.record_failure(item, "no adapter registered".to_string(), now).await;
        };

        let send = adapter.send(&item.recipient, &item.subject, &item.body);
        match timeout(self.attempt_timeout, send).await {
            Ok(Ok(result)) if result.success => {
                item.status = DeliveryStatus::Delivered;
                item.attempts += 1;
                item.delivered_at = Some(now);
                item.external_id = result.external_id;
                info!(
                    item_id = %item.id,
                    channel = %item.channel,
                    attempts = item.attempts,
                    "Notification delivered"
                );
                let _ = self.queue.update(item).await;
                ItemOutcome::Delivered
            }
            Ok(Ok(result)) => {
                let reason = result.error.unwrap_or_else(|| "delivery rejected".to_string());
                self.record_failure(item, reason, now).await
            }
            Ok(Err(e)) => self.record_failure(item, e.to_string(), now).await,
            Err(_) => {
                self.record_failure(item, "delivery attempt timed out".to_string(), now)
                    .await
            }
        }
    }

    /// 记录一次投递失败：未耗尽则按指数退避重排，否则落为失败并发出元告警
    async fn record_failure(
        &self,
        mut item: QueueItem,
        reason: String,
        now: DateTime<Utc>,
    ) -> ItemOutcome {
        item.attempts += 1;
        item.last_error = Some(reason.clone());

        if item.attempts < item.max_attempts {
            item.scheduled_for = now + backoff(item.attempts);
            warn!(
                item_id = %item.id,
                attempts = item.attempts,
                next_attempt = %item.scheduled_for,
                error = %reason,
                "Notification delivery failed, will retry"
            );
            let _ = self.queue.update(item).await;
            ItemOutcome::Retried
        } else {
            item.status = DeliveryStatus::Failed;
            error!(
                item_id = %item.id,
                alert_id = %item.alert_id,
                attempts = item.attempts,
                error = %reason,
                "Notification delivery failed permanently"
            );
            self.bus.publish(Message::new(
                topics::META_NOTIFICATION_FAILED,
                json!({
                    "alert_id": item.alert_id,
                    "subscriber_id": item.subscriber_id,
                    "channel": item.channel.to_string(),
                    "error": reason,
                }),
            ));
            let _ = self.queue.update(item).await;
            ItemOutcome::Failed
        }
    }
}

enum ItemOutcome {
    Delivered,
    Retried,
    Failed,
    Rescheduled,
}

/// 指数退避：30s 起步，翻倍，15 分钟封顶
fn backoff(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(16);
    let seconds = (BACKOFF_BASE_SECONDS << exp).min(BACKOFF_CAP_SECONDS);
    Duration::seconds(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::DeliveryResult;
    use crate::subscriber::{QuietHours, Subscriber};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vigil_core::EventBus;

    struct FlakyAdapter {
        fail_first: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ChannelAdapter for FlakyAdapter {
        async fn send(
            &self,
            _recipient: &str,
            _subject: &str,
            _body: &str,
        ) -> anyhow::Result<DeliveryResult> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Ok(DeliveryResult::failure("provider unavailable"))
            } else {
                Ok(DeliveryResult::success())
            }
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    async fn setup(
        quiet_hours: Option<QuietHours>,
        fail_first: usize,
    ) -> (NotificationDispatcher, Arc<NotificationQueue>) {
        let directory = Arc::new(SubscriberDirectory::new());
        let mut subscriber = Subscriber::new("oncall")
            .with_address(NotifyChannel::Console, "operator");
        subscriber.quiet_hours = quiet_hours;
        directory.save(subscriber).await;

        let queue = Arc::new(NotificationQueue::new(directory.clone(), 3));
        let bus = Arc::new(EventBus::new(16));
        let mut dispatcher = NotificationDispatcher::new(
            queue.clone(),
            directory,
            bus,
            std::time::Duration::from_secs(5),
        );
        dispatcher.register_adapter(
            NotifyChannel::Console,
            Arc::new(FlakyAdapter {
                fail_first,
                calls: AtomicUsize::new(0),
            }),
        );
        (dispatcher, queue)
    }

    #[tokio::test]
    async fn test_successful_delivery() {
        let (dispatcher, queue) = setup(None, 0).await;
        queue
            .fan_out("alert-1", Severity::Warning, "svc-A", "s", "b")
            .await;

        let stats = dispatcher.process_due(Utc::now()).await;
        assert_eq!(stats.delivered, 1);

        let item = queue.items_for_alert("alert-1").await.remove(0);
        assert_eq!(item.status, DeliveryStatus::Delivered);
        assert!(item.delivered_at.is_some());
    }

    #[tokio::test]
    async fn test_retry_with_backoff_then_success() {
        let (dispatcher, queue) = setup(None, 1).await;
        queue
            .fan_out("alert-1", Severity::Warning, "svc-A", "s", "b")
            .await;

        let now = Utc::now();
        let stats = dispatcher.process_due(now).await;
        assert_eq!(stats.retried, 1);

        let item = queue.items_for_alert("alert-1").await.remove(0);
        assert_eq!(item.status, DeliveryStatus::Pending);
        assert_eq!(item.attempts, 1);
        assert!(item.scheduled_for >= now + Duration::seconds(30));

        // 到达重试时间后投递成功
        let stats = dispatcher.process_due(item.scheduled_for).await;
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_and_meta_alert() {
        let (dispatcher, queue) = setup(None, 10).await;
        let mut rx = dispatcher.bus.subscribe();
        queue
            .fan_out("alert-1", Severity::Warning, "svc-A", "s", "b")
            .await;

        let mut at = Utc::now();
        for _ in 0..3 {
            dispatcher.process_due(at).await;
            at = at + Duration::minutes(20);
        }

        let item = queue.items_for_alert("alert-1").await.remove(0);
        assert_eq!(item.status, DeliveryStatus::Failed);
        assert_eq!(item.attempts, 3);

        let msg = rx.try_recv().expect("meta alert published");
        assert_eq!(msg.topic, topics::META_NOTIFICATION_FAILED);
        assert_eq!(msg.payload["alert_id"], "alert-1");
    }

    #[tokio::test]
    async fn test_quiet_hours_defer_non_critical() {
        let quiet = QuietHours {
            start_hour: 0,
            end_hour: 23,
            override_for_critical: true,
        };
        let (dispatcher, queue) = setup(Some(quiet), 0).await;
        queue
            .fan_out("alert-1", Severity::Warning, "svc-A", "s", "b")
            .await;

        // 几乎全天免打扰：非 Critical 被顺延
        // 取明天正午，保证晚于入队时间且处于免打扰时段内
        let now = (Utc::now() + Duration::days(1))
            .date_naive()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        let stats = dispatcher.process_due(now).await;
        assert_eq!(stats.rescheduled, 1);
        assert_eq!(stats.delivered, 0);

        let item = queue.items_for_alert("alert-1").await.remove(0);
        assert_eq!(item.status, DeliveryStatus::Pending);
        assert_eq!(item.attempts, 0);
        assert!(item.scheduled_for > now);
    }

    #[tokio::test]
    async fn test_quiet_hours_critical_override() {
        let quiet = QuietHours {
            start_hour: 0,
            end_hour: 23,
            override_for_critical: true,
        };
        let (dispatcher, queue) = setup(Some(quiet), 0).await;
        queue
            .fan_out("alert-1", Severity::Critical, "svc-A", "s", "b")
            .await;

        let now = (Utc::now() + Duration::days(1))
            .date_naive()
            .and_hms_opt(12, 0, 0)
            .unwrap()
            .and_utc();
        let stats = dispatcher.process_due(now).await;
        assert_eq!(stats.delivered, 1);
    }

    #[test]
    fn test_backoff_progression() {
        assert_eq!(backoff(1), Duration::seconds(30));
        assert_eq!(backoff(2), Duration::seconds(60));
        assert_eq!(backoff(3), Duration::seconds(120));
        assert_eq!(backoff(10), Duration::seconds(BACKOFF_CAP_SECONDS));
    }
}
