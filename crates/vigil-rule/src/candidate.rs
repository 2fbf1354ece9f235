use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_types::{ComparisonOperator, Scope, Severity};

/// 告警候选：规则评估器的输出，由告警管理器去重后落为告警
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCandidate {
    /// 触发的规则 ID
    pub rule_id: String,

    /// 规则名称
    pub rule_name: String,

    /// 监控范围
    pub scope: Scope,

    /// 指标名称
    pub metric: String,

    /// 告警级别
    pub severity: Severity,

    /// 比较操作符
    pub operator: ComparisonOperator,

    /// 阈值
    pub threshold: f64,

    /// 实际值
    pub actual_value: f64,

    /// 去重指纹 = 规则 + 范围的稳定标识
    pub fingerprint: String,

    /// 关联的纠正规则
    pub correction_rule_id: Option<String>,

    /// 违反发生时间
    pub occurred_at: DateTime<Utc>,
}

impl AlertCandidate {
    /// 计算指纹；同一（规则，范围）的重复违反共享同一指纹
    pub fn fingerprint_for(rule_id: &str, scope: &Scope) -> String {
        format!("{}:{}", rule_id, scope.key())
    }

    /// 候选的默认标题
    pub fn title(&self) -> String {
        format!("{} on {}", self.rule_name, self.scope)
    }

    /// 候选的默认正文
    pub fn message(&self) -> String {
        format!(
            "{}: {} {} {:.4} (actual {:.4})",
            self.rule_name, self.metric, self.operator, self.threshold, self.actual_value
        )
    }
}
