use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 一次升级的审计记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationHistoryEntry {
    pub id: String,
    pub alert_id: String,
    pub from_level: u32,
    pub to_level: u32,
    /// 本次升级通知到的订阅者
    pub notified: Vec<String>,
    pub reason: String,
    pub at: DateTime<Utc>,
}

/// 升级历史存储（内存实现）
pub struct EscalationHistoryStore {
    entries: Arc<RwLock<Vec<EscalationHistoryEntry>>>,
    max_entries: usize,
}

impl EscalationHistoryStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub async fn append(&self, entry: EscalationHistoryEntry) {
        let mut entries = self.entries.write().await;
        entries.push(entry);
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(0..overflow);
        }
    }

    pub async fn for_alert(&self, alert_id: &str) -> Vec<EscalationHistoryEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.alert_id == alert_id)
            .cloned()
            .collect()
    }

    pub async fn recent(&self, limit: usize) -> Vec<EscalationHistoryEntry> {
        let entries = self.entries.read().await;
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    /// 级联清理：删除给定告警的历史
    pub async fn purge_for_alert(&self, alert_id: &str) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.alert_id != alert_id);
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(alert_id: &str, to_level: u32) -> EscalationHistoryEntry {
        EscalationHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            alert_id: alert_id.to_string(),
            from_level: to_level - 1,
            to_level,
            notified: vec!["sub-1".to_string()],
            reason: "time threshold exceeded".to_string(),
            at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_append_and_query() {
        let store = EscalationHistoryStore::new(100);
        store.append(entry("alert-1", 1)).await;
        store.append(entry("alert-1", 2)).await;
        store.append(entry("alert-2", 1)).await;

        assert_eq!(store.for_alert("alert-1").await.len(), 2);
        assert_eq!(store.recent(10).await.len(), 3);
    }

    #[tokio::test]
    async fn test_bounded_history() {
        let store = EscalationHistoryStore::new(2);
        for i in 1..=5 {
            store.append(entry("alert-1", i)).await;
        }
        let entries = store.recent(10).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].to_level, 5);
    }
}
