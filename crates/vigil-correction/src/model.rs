use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

/// 纠正引擎错误
#[derive(Error, Debug)]
pub enum CorrectionError {
    #[error("Correction rule not found: {0}")]
    RuleNotFound(String),

    #[error("Invalid correction rule: {0}")]
    Invalid(String),

    #[error("Alert carries no correction rule: {0}")]
    NoRule(String),

    #[error("Snapshot provider failed: {0}")]
    Snapshot(String),
}

/// 纠正动作：封闭的补救操作集合
///
/// 动作类型是编译期已知的变体而不是运行时字符串，
/// 未知动作在配置写入时即被拒绝。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CorrectionAction {
    /// 缩容
    ScaleDown { factor: f64 },
    /// 扩容
    ScaleUp { factor: f64 },
    /// 启用缓存
    EnableCache,
    /// 停用缓存
    DisableCache,
    /// 调整限流
    AdjustRateLimit { requests_per_minute: u32 },
    /// 打开熔断器
    OpenCircuitBreaker { cooldown_seconds: u64 },
    /// 切换到备用目标
    FailOver { target: String },
    /// 重启服务
    RestartService,
}

impl CorrectionAction {
    pub fn kind(&self) -> &'static str {
        match self {
            CorrectionAction::ScaleDown { .. } => "scale_down",
            CorrectionAction::ScaleUp { .. } => "scale_up",
            CorrectionAction::EnableCache => "enable_cache",
            CorrectionAction::DisableCache => "disable_cache",
            CorrectionAction::AdjustRateLimit { .. } => "adjust_rate_limit",
            CorrectionAction::OpenCircuitBreaker { .. } => "open_circuit_breaker",
            CorrectionAction::FailOver { .. } => "fail_over",
            CorrectionAction::RestartService => "restart_service",
        }
    }
}

/// 纠正规则：条件到补救动作的映射
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionRule {
    /// 规则 ID
    pub id: String,

    /// 规则名称
    pub name: String,

    /// 补救动作
    pub action: CorrectionAction,

    /// 是否启用
    pub enabled: bool,

    /// 是否允许自动执行（由纠正日志的成功率决定去留）
    pub auto_enabled: bool,

    /// 负向波动容忍度；成本上升或质量下降超过该值即判定失败
    pub tolerance: f64,

    /// 动作执行超时（秒）
    pub timeout_seconds: u64,

    /// 创建/更新时间
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Default for CorrectionRule {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            action: CorrectionAction::RestartService,
            enabled: true,
            auto_enabled: true,
            tolerance: 0.05,
            timeout_seconds: 60,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}

impl CorrectionRule {
    pub fn validate(&self) -> Result<(), CorrectionError> {
        if self.name.is_empty() {
            return Err(CorrectionError::Invalid("rule name must not be empty".into()));
        }
        if self.timeout_seconds == 0 {
            return Err(CorrectionError::Invalid("timeout must be positive".into()));
        }
        if self.tolerance < 0.0 {
            return Err(CorrectionError::Invalid("tolerance must not be negative".into()));
        }
        match &self.action {
            CorrectionAction::ScaleDown { factor } | CorrectionAction::ScaleUp { factor } => {
                if *factor <= 0.0 {
                    return Err(CorrectionError::Invalid("scale factor must be positive".into()));
                }
            }
            CorrectionAction::AdjustRateLimit { requests_per_minute } => {
                if *requests_per_minute == 0 {
                    return Err(CorrectionError::Invalid("rate limit must be positive".into()));
                }
            }
            CorrectionAction::FailOver { target } => {
                if target.is_empty() {
                    return Err(CorrectionError::Invalid("failover target must not be empty".into()));
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// 纠正规则存储（内存实现）
pub struct CorrectionRuleStore {
    rules: Arc<RwLock<HashMap<String, CorrectionRule>>>,
}

impl CorrectionRuleStore {
    pub fn new() -> Self {
        Self {
            rules: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn save(&self, mut rule: CorrectionRule) -> Result<String, CorrectionError> {
        rule.validate()?;
        if rule.id.is_empty() {
            rule.id = uuid::Uuid::new_v4().to_string();
        }
        rule.updated_at = Utc::now();
        let id = rule.id.clone();
        let mut rules = self.rules.write().await;
        rules.insert(id.clone(), rule);
        info!(rule_id = %id, "Correction rule saved");
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<CorrectionRule> {
        let rules = self.rules.read().await;
        rules.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Result<(), CorrectionError> {
        let mut rules = self.rules.write().await;
        match rules.remove(id) {
            Some(_) => Ok(()),
            None => Err(CorrectionError::RuleNotFound(id.to_string())),
        }
    }

    pub async fn list(&self) -> Vec<CorrectionRule> {
        let rules = self.rules.read().await;
        rules.values().cloned().collect()
    }

    /// 关闭某条规则的自动执行（成功率过低时由运营决策调用）
    pub async fn set_auto_enabled(&self, id: &str, auto_enabled: bool) -> Result<(), CorrectionError> {
        let mut rules = self.rules.write().await;
        match rules.get_mut(id) {
            Some(rule) => {
                rule.auto_enabled = auto_enabled;
                rule.updated_at = Utc::now();
                Ok(())
            }
            None => Err(CorrectionError::RuleNotFound(id.to_string())),
        }
    }
}

impl Default for CorrectionRuleStore {
    fn default() -> Self {
        Self::new()
    }
}
