use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use vigil_types::Severity;

/// 升级策略错误
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Policy not found: {0}")]
    NotFound(String),

    #[error("Invalid policy: {0}")]
    Invalid(String),
}

/// 升级级别
///
/// `delay_minutes` 为距告警创建的绝对延迟；级别 0 是创建时的初始通知。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationLevel {
    /// 级别编号，从 0 开始连续
    pub level: u32,

    /// 距告警创建的延迟（分钟）
    pub delay_minutes: u32,

    /// 该级别的通知名单（订阅者 ID）
    pub subscribers: Vec<String>,
}

/// 升级策略：有序的升级级别表
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// 策略 ID
    pub id: String,

    /// 策略名称
    pub name: String,

    /// 适用的最低告警级别
    pub severity_minimum: Severity,

    /// 确认后是否继续升级（默认 true，避免静默丢失关键事件）
    pub escalate_after_ack: bool,

    /// 升级级别，按 level 升序
    pub levels: Vec<EscalationLevel>,
}

impl EscalationPolicy {
    pub fn new(name: impl Into<String>, severity_minimum: Severity) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            severity_minimum,
            escalate_after_ack: true,
            levels: Vec::new(),
        }
    }

    pub fn with_level(mut self, delay_minutes: u32, subscribers: Vec<String>) -> Self {
        let level = self.levels.len() as u32;
        self.levels.push(EscalationLevel {
            level,
            delay_minutes,
            subscribers,
        });
        self
    }

    /// 写入时校验：级别连续、延迟严格递增、级别 0 延迟为 0
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.name.is_empty() {
            return Err(PolicyError::Invalid("policy name must not be empty".into()));
        }
        if self.levels.is_empty() {
            return Err(PolicyError::Invalid("policy must have at least one level".into()));
        }
        for (i, level) in self.levels.iter().enumerate() {
            if level.level != i as u32 {
                return Err(PolicyError::Invalid(format!(
                    "levels must be contiguous from 0, found {} at position {}",
                    level.level, i
                )));
            }
        }
        if self.levels[0].delay_minutes != 0 {
            return Err(PolicyError::Invalid("level 0 must have zero delay".into()));
        }
        for pair in self.levels.windows(2) {
            if pair[1].delay_minutes <= pair[0].delay_minutes {
                return Err(PolicyError::Invalid(
                    "level delays must be strictly increasing".into(),
                ));
            }
        }
        Ok(())
    }

    /// 最高级别编号
    pub fn max_level(&self) -> u32 {
        (self.levels.len() - 1) as u32
    }

    pub fn level(&self, level: u32) -> Option<&EscalationLevel> {
        self.levels.get(level as usize)
    }
}

/// 升级策略存储（内存实现）
pub struct PolicyStore {
    policies: Arc<RwLock<HashMap<String, EscalationPolicy>>>,
}

impl PolicyStore {
    pub fn new() -> Self {
        Self {
            policies: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn save(&self, policy: EscalationPolicy) -> Result<String, PolicyError> {
        policy.validate()?;
        let id = policy.id.clone();
        let mut policies = self.policies.write().await;
        policies.insert(id.clone(), policy);
        info!(policy_id = %id, "Escalation policy saved");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<EscalationPolicy> {
        let policies = self.policies.read().await;
        policies.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Result<(), PolicyError> {
        let mut policies = self.policies.write().await;
        match policies.remove(id) {
            Some(_) => Ok(()),
            None => Err(PolicyError::NotFound(id.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<EscalationPolicy> {
        let policies = self.policies.read().await;
        policies.values().cloned().collect()
    }

    /// 选择适用于给定级别的策略：满足 severity_minimum 的策略中取门槛最高者
    pub async fn policy_for(&self, severity: Severity) -> Option<EscalationPolicy> {
        let policies = self.policies.read().await;
        policies
            .values()
            .filter(|p| severity >= p.severity_minimum)
            .max_by_key(|p| p.severity_minimum)
            .cloned()
    }
}

impl Default for PolicyStore {
    fn default() -> Self {
        Self::new()
    }
}
