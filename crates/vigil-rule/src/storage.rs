use crate::model::{AlertRule, RuleError};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// 规则存储（内存实现）
pub struct RuleStorage {
    rules: Arc<RwLock<HashMap<String, AlertRule>>>,
}

impl RuleStorage {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 保存规则；写入时校验，畸形规则不允许进入存储
    pub async fn save(&self, mut rule: AlertRule) -> Result<String, RuleError> {
        rule.validate()?;

        if rule.id.is_empty() {
            rule.id = uuid::Uuid::new_v4().to_string();
        }
        rule.metadata.updated_at = Utc::now();

        let id = rule.id.clone();
        let mut rules = self.rules.write().await;
        let existed = rules.insert(id.clone(), rule).is_some();

        info!(rule_id = %id, updated = existed, "Alert rule saved");
        Ok(id)
    }

    pub async fn get(&self, rule_id: &str) -> Option<AlertRule> {
        let rules = self.rules.read().await;
        rules.get(rule_id).cloned()
    }

    pub async fn delete(&self, rule_id: &str) -> Result<(), RuleError> {
        let mut rules = self.rules.write().await;
        match rules.remove(rule_id) {
            Some(_) => {
                info!(rule_id = %rule_id, "Alert rule deleted");
                Ok(())
            }
            None => Err(RuleError::NotFound(rule_id.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<AlertRule> {
        let rules = self.rules.read().await;
        rules.values().cloned().collect()
    }

    /// 启用中的规则
    pub async fn list_enabled(&self) -> Vec<AlertRule> {
        let rules = self.rules.read().await;
        rules.values().filter(|r| r.enabled).cloned().collect()
    }

    /// 记录一次触发
    pub async fn record_fired(&self, rule_id: &str) {
        let mut rules = self.rules.write().await;
        if let Some(rule) = rules.get_mut(rule_id) {
            rule.metadata.last_fired_at = Some(Utc::now());
            rule.metadata.fire_count += 1;
        }
    }
}

impl Default for RuleStorage {
    fn default() -> Self {
        Self::new()
    }
}
