use chrono::{DateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use vigil_types::Severity;

/// 通知渠道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyChannel {
    /// 邮件
    Email,
    /// 短信
    Sms,
    /// 群聊（Slack/钉钉等）
    Chat,
    /// Webhook
    Webhook,
    /// 控制台（开发用）
    Console,
}

impl std::fmt::Display for NotifyChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NotifyChannel::Email => "email",
            NotifyChannel::Sms => "sms",
            NotifyChannel::Chat => "chat",
            NotifyChannel::Webhook => "webhook",
            NotifyChannel::Console => "console",
        };
        write!(f, "{}", s)
    }
}

/// 免打扰时段（小时粒度，支持跨午夜窗口）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuietHours {
    /// 开始小时（0-23）
    pub start_hour: u32,

    /// 结束小时（0-23）
    pub end_hour: u32,

    /// Critical 告警是否穿透免打扰
    pub override_for_critical: bool,
}

impl QuietHours {
    /// 给定时刻是否处于免打扰时段内
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        let hour = at.hour();
        if self.start_hour == self.end_hour {
            return false;
        }
        if self.start_hour < self.end_hour {
            hour >= self.start_hour && hour < self.end_hour
        } else {
            // 跨午夜，如 22 点到次日 6 点
            hour >= self.start_hour || hour < self.end_hour
        }
    }

    /// 免打扰时段的下一个结束时刻（用于顺延被抑制的通知）
    pub fn next_end(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let today_end = from
            .date_naive()
            .and_hms_opt(self.end_hour.min(23), 0, 0)
            .unwrap_or_else(|| from.naive_utc())
            .and_utc();
        if today_end > from {
            today_end
        } else {
            today_end + chrono::Duration::days(1)
        }
    }
}

/// 订阅者：接收人及其渠道偏好、免打扰和过滤条件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    /// 订阅者 ID
    pub id: String,

    /// 名称
    pub name: String,

    /// 渠道 -> 接收地址（邮箱、手机号、webhook URL 等）
    pub addresses: HashMap<NotifyChannel, String>,

    /// 接收的最低告警级别
    pub min_severity: Severity,

    /// 单元过滤（"*" 或精确单元 ID）
    pub unit_filter: String,

    /// 免打扰时段
    pub quiet_hours: Option<QuietHours>,

    /// 是否启用
    pub enabled: bool,
}

impl Subscriber {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            addresses: HashMap::new(),
            min_severity: Severity::Info,
            unit_filter: "*".to_string(),
            quiet_hours: None,
            enabled: true,
        }
    }

    pub fn with_address(mut self, channel: NotifyChannel, address: impl Into<String>) -> Self {
        self.addresses.insert(channel, address.into());
        self
    }

    pub fn with_min_severity(mut self, severity: Severity) -> Self {
        self.min_severity = severity;
        self
    }

    pub fn with_unit_filter(mut self, filter: impl Into<String>) -> Self {
        self.unit_filter = filter.into();
        self
    }

    pub fn with_quiet_hours(mut self, quiet_hours: QuietHours) -> Self {
        self.quiet_hours = Some(quiet_hours);
        self
    }

    /// 告警是否应该到达该订阅者
    pub fn matches(&self, severity: Severity, unit_id: &str) -> bool {
        self.enabled
            && severity >= self.min_severity
            && (self.unit_filter == "*" || self.unit_filter == unit_id)
    }
}

/// 订阅者目录（内存实现）
pub struct SubscriberDirectory {
    subscribers: Arc<RwLock<HashMap<String, Subscriber>>>,
}

impl SubscriberDirectory {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn save(&self, subscriber: Subscriber) -> String {
        let id = subscriber.id.clone();
        let mut subscribers = self.subscribers.write().await;
        subscribers.insert(id.clone(), subscriber);
        info!(subscriber_id = %id, "Subscriber saved");
        id
    }

    pub async fn get(&self, id: &str) -> Option<Subscriber> {
        let subscribers = self.subscribers.read().await;
        subscribers.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> bool {
        let mut subscribers = self.subscribers.write().await;
        subscribers.remove(id).is_some()
    }

    pub async fn list(&self) -> Vec<Subscriber> {
        let subscribers = self.subscribers.read().await;
        subscribers.values().cloned().collect()
    }

    /// 匹配给定告警的订阅者
    pub async fn matching(&self, severity: Severity, unit_id: &str) -> Vec<Subscriber> {
        let subscribers = self.subscribers.read().await;
        subscribers
            .values()
            .filter(|s| s.matches(severity, unit_id))
            .cloned()
            .collect()
    }
}

impl Default for SubscriberDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_quiet_hours_simple_window() {
        let qh = QuietHours {
            start_hour: 1,
            end_hour: 7,
            override_for_critical: true,
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 3, 0, 0).unwrap();
        assert!(qh.contains(at));
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
        assert!(!qh.contains(at));
    }

    #[test]
    fn test_quiet_hours_wraps_midnight() {
        let qh = QuietHours {
            start_hour: 22,
            end_hour: 6,
            override_for_critical: false,
        };
        assert!(qh.contains(Utc.with_ymd_and_hms(2024, 5, 1, 23, 0, 0).unwrap()));
        assert!(qh.contains(Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()));
        assert!(!qh.contains(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_quiet_hours_next_end() {
        let qh = QuietHours {
            start_hour: 22,
            end_hour: 6,
            override_for_critical: false,
        };
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 23, 30, 0).unwrap();
        let end = qh.next_end(at);
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 2, 6, 0, 0).unwrap());

        let at = Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap();
        assert_eq!(qh.next_end(at), Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_subscriber_matches() {
        let sub = Subscriber::new("oncall")
            .with_min_severity(Severity::Warning)
            .with_unit_filter("svc-A");

        assert!(sub.matches(Severity::Critical, "svc-A"));
        assert!(!sub.matches(Severity::Info, "svc-A"));
        assert!(!sub.matches(Severity::Critical, "svc-B"));
    }

    #[tokio::test]
    async fn test_directory_matching() {
        let directory = SubscriberDirectory::new();
        directory
            .save(Subscriber::new("all").with_min_severity(Severity::Info))
            .await;
        directory
            .save(
                Subscriber::new("critical-only").with_min_severity(Severity::Critical),
            )
            .await;

        assert_eq!(directory.matching(Severity::Warning, "svc-A").await.len(), 1);
        assert_eq!(directory.matching(Severity::Critical, "svc-A").await.len(), 2);
    }
}
