use std::sync::Arc;
use tokio::sync::broadcast;
use vigil_types::Message;

/// 事件总线：规则评估、告警、纠正、恢复各组件之间的解耦通道
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Message>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.sender.subscribe()
    }

    /// 发布消息；没有订阅者时丢弃而不是报错
    pub fn publish(&self, message: Message) -> usize {
        match self.sender.send(message) {
            Ok(n) => n,
            Err(_) => 0,
        }
    }
}

pub type SharedEventBus = Arc<EventBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::time::{timeout, Duration};
    use vigil_types::topics;

    #[tokio::test]
    async fn test_eventbus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        let msg = Message::new(topics::ALERT_CREATED, json!({"alert_id": "a-1"}));
        assert_eq!(bus.publish(msg), 1);

        let received = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("Timeout waiting for message")
            .expect("Failed to receive message");

        assert_eq!(received.topic, topics::ALERT_CREATED);
        assert_eq!(received.payload["alert_id"], "a-1");
    }

    #[tokio::test]
    async fn test_eventbus_no_subscribers() {
        let bus = EventBus::new(16);
        let msg = Message::new(topics::CRASH_DETECTED, json!({}));
        assert_eq!(bus.publish(msg), 0);
    }
}
