use crate::engine::CostQualitySnapshot;
use crate::model::CorrectionAction;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

/// 纠正日志：每次动作的前后快照与成败，
/// 是决定规则是否保持自动执行的审计依据。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionLog {
    pub id: String,
    pub alert_id: String,
    pub rule_id: String,
    pub unit_id: String,
    pub action: CorrectionAction,
    pub before: Option<CostQualitySnapshot>,
    pub after: Option<CostQualitySnapshot>,
    pub cost_delta: Option<f64>,
    pub quality_delta: Option<f64>,
    pub success: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

/// 纠正日志存储（内存实现，有界）
pub struct CorrectionLogStore {
    entries: Arc<RwLock<Vec<CorrectionLog>>>,
    max_entries: usize,
}

impl CorrectionLogStore {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            max_entries,
        }
    }

    pub async fn append(&self, log: CorrectionLog) {
        let mut entries = self.entries.write().await;
        entries.push(log);
        if entries.len() > self.max_entries {
            let overflow = entries.len() - self.max_entries;
            entries.drain(0..overflow);
        }
    }

    pub async fn for_rule(&self, rule_id: &str) -> Vec<CorrectionLog> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .cloned()
            .collect()
    }

    pub async fn recent(&self, limit: usize) -> Vec<CorrectionLog> {
        let entries = self.entries.read().await;
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    /// 全量快照（统计聚合用）
    pub async fn snapshot(&self) -> Vec<CorrectionLog> {
        let entries = self.entries.read().await;
        entries.clone()
    }

    /// 规则的历史成功率；无记录时为 None
    pub async fn success_rate(&self, rule_id: &str) -> Option<f64> {
        let entries = self.entries.read().await;
        let (total, succeeded) = entries
            .iter()
            .filter(|l| l.rule_id == rule_id)
            .fold((0usize, 0usize), |(t, s), l| {
                (t + 1, s + if l.success { 1 } else { 0 })
            });
        if total == 0 {
            None
        } else {
            Some(succeeded as f64 / total as f64)
        }
    }
}
