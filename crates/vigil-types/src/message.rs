use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 事件总线消息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: i64,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            topic: topic.into(),
            payload,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// 预定义的总线主题
pub mod topics {
    /// 新告警创建
    pub const ALERT_CREATED: &str = "alert/created";
    /// 告警解决
    pub const ALERT_RESOLVED: &str = "alert/resolved";
    /// 告警标记了自动纠正，移交纠正引擎
    pub const ALERT_AUTO_CORRECT: &str = "alert/auto_correct";
    /// 崩溃事件
    pub const CRASH_DETECTED: &str = "crash/detected";
    /// 元告警：指标源不可达
    pub const META_STALE_METRICS: &str = "meta/stale_metrics";
    /// 元告警：通知投递耗尽重试
    pub const META_NOTIFICATION_FAILED: &str = "meta/notification_failed";
    /// 元告警：自动纠正失败
    pub const META_CORRECTION_FAILED: &str = "meta/correction_failed";
}
