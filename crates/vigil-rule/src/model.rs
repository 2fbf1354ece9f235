use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_types::{ComparisonOperator, Severity};

/// 规则错误
#[derive(Error, Debug)]
pub enum RuleError {
    #[error("Rule not found: {0}")]
    NotFound(String),

    #[error("Invalid rule: {0}")]
    Invalid(String),
}

/// 告警规则定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    /// 规则 ID
    pub id: String,

    /// 规则名称
    pub name: String,

    /// 规则描述
    pub description: String,

    /// 是否启用
    pub enabled: bool,

    /// 单元选择器（精确单元 ID，或 "*" 匹配所有单元）
    pub unit_selector: String,

    /// 指标名称
    pub metric: String,

    /// 比较操作符
    pub operator: ComparisonOperator,

    /// 阈值
    pub threshold: f64,

    /// 评估窗口（秒）
    pub window_seconds: u64,

    /// 连续违反次数要求
    pub consecutive_violations: u32,

    /// 冷却期（分钟）；同一指纹在冷却期内不再触发
    pub cooldown_minutes: u32,

    /// 告警级别
    pub severity: Severity,

    /// 关联的纠正规则（存在即表示允许自动纠正）
    pub correction_rule_id: Option<String>,

    /// 元数据
    pub metadata: RuleMetadata,
}

impl Default for AlertRule {
    fn default() -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: String::new(),
            description: String::new(),
            enabled: true,
            unit_selector: "*".to_string(),
            metric: String::new(),
            operator: ComparisonOperator::GreaterThan,
            threshold: 0.0,
            window_seconds: 300,
            consecutive_violations: 1,
            cooldown_minutes: 15,
            severity: Severity::Warning,
            correction_rule_id: None,
            metadata: RuleMetadata::default(),
        }
    }
}

impl AlertRule {
    /// 写入时校验；不合法的规则不允许进入运行时循环
    pub fn validate(&self) -> Result<(), RuleError> {
        if self.name.is_empty() {
            return Err(RuleError::Invalid("rule name must not be empty".into()));
        }
        if self.metric.is_empty() {
            return Err(RuleError::Invalid("metric name must not be empty".into()));
        }
        if self.unit_selector.is_empty() {
            return Err(RuleError::Invalid("unit selector must not be empty".into()));
        }
        if self.window_seconds == 0 {
            return Err(RuleError::Invalid("evaluation window must be positive".into()));
        }
        if self.consecutive_violations == 0 {
            return Err(RuleError::Invalid(
                "consecutive_violations must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// 规则是否匹配给定单元的指标
    pub fn matches(&self, unit_id: &str, metric: &str) -> bool {
        self.metric == metric && (self.unit_selector == "*" || self.unit_selector == unit_id)
    }
}

/// 规则元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleMetadata {
    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 更新时间
    pub updated_at: DateTime<Utc>,

    /// 创建者
    pub created_by: String,

    /// 最后触发时间
    pub last_fired_at: Option<DateTime<Utc>>,

    /// 触发次数
    pub fire_count: u64,
}

impl Default for RuleMetadata {
    fn default() -> Self {
        Self {
            created_at: Utc::now(),
            updated_at: Utc::now(),
            created_by: "system".to_string(),
            last_fired_at: None,
            fire_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_default() {
        let rule = AlertRule::default();
        assert!(rule.enabled);
        assert_eq!(rule.consecutive_violations, 1);
        assert_eq!(rule.cooldown_minutes, 15);
    }

    #[test]
    fn test_rule_validate() {
        let rule = AlertRule {
            name: "high_error_rate".to_string(),
            metric: "error_rate".to_string(),
            ..Default::default()
        };
        assert!(rule.validate().is_ok());

        let bad = AlertRule {
            name: "no_metric".to_string(),
            ..Default::default()
        };
        assert!(bad.validate().is_err());

        let bad = AlertRule {
            name: "zero_window".to_string(),
            metric: "latency_ms".to_string(),
            window_seconds: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_rule_matches() {
        let rule = AlertRule {
            name: "r".to_string(),
            metric: "error_rate".to_string(),
            unit_selector: "svc-A".to_string(),
            ..Default::default()
        };
        assert!(rule.matches("svc-A", "error_rate"));
        assert!(!rule.matches("svc-B", "error_rate"));
        assert!(!rule.matches("svc-A", "latency_ms"));

        let wildcard = AlertRule {
            name: "r".to_string(),
            metric: "error_rate".to_string(),
            unit_selector: "*".to_string(),
            ..Default::default()
        };
        assert!(wildcard.matches("svc-B", "error_rate"));
    }

    #[test]
    fn test_rule_serialization() {
        let rule = AlertRule {
            name: "high_error_rate".to_string(),
            metric: "error_rate".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&rule).unwrap();
        let back: AlertRule = serde_json::from_str(&json).unwrap();
        assert_eq!(rule.name, back.name);
        assert_eq!(rule.metric, back.metric);
    }
}
