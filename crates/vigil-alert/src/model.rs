use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_rule::AlertCandidate;
use vigil_types::{Scope, Severity};

/// 告警错误
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Alert not found: {0}")]
    NotFound(String),

    #[error("Alert already resolved: {0}")]
    AlreadyResolved(String),

    #[error("Invalid escalation: {0}")]
    InvalidEscalation(String),
}

/// 告警状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    /// 新建，未确认
    Open,
    /// 已确认
    Acknowledged,
    /// 已升级
    Escalated,
    /// 已解决（终态，只允许追加审计批注）
    Resolved,
}

/// 解决方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolutionKind {
    /// 人工解决
    Manual,
    /// 条件自行恢复 / 自动纠正解决
    Auto,
    /// 恢复流程解决
    Recovery,
}

/// 审计批注
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub note: String,
}

/// 告警实体
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    /// 告警 ID
    pub id: String,

    /// 触发规则 ID
    pub rule_id: String,

    /// 告警级别
    pub severity: Severity,

    /// 监控范围
    pub scope: Scope,

    /// 标题
    pub title: String,

    /// 正文
    pub message: String,

    /// 指标名称
    pub metric: String,

    /// 阈值
    pub threshold: f64,

    /// 实际值
    pub actual_value: f64,

    /// 去重指纹
    pub fingerprint: String,

    /// 状态
    pub status: AlertStatus,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 确认时间/人
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub acknowledged_by: Option<String>,

    /// 解决时间/人/方式
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolution: Option<ResolutionKind>,

    /// 当前升级级别（0 为创建时的初始通知）
    pub escalation_level: u32,

    /// 最后一次升级时间
    pub last_escalated_at: Option<DateTime<Utc>>,

    /// 是否允许自动纠正
    pub auto_correct: bool,

    /// 关联的纠正规则
    pub correction_rule_id: Option<String>,

    /// 纠正是否已经尝试过（纠正引擎只尝试一次）
    pub correction_attempted: bool,

    /// 去重计数：同指纹重复违反的次数
    pub duplicate_count: u32,

    /// 首次/最近一次发生时间
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,

    /// 审计批注
    pub annotations: Vec<Annotation>,
}

impl Alert {
    /// 从候选创建新告警
    pub fn from_candidate(candidate: &AlertCandidate) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: candidate.rule_id.clone(),
            severity: candidate.severity,
            scope: candidate.scope.clone(),
            title: candidate.title(),
            message: candidate.message(),
            metric: candidate.metric.clone(),
            threshold: candidate.threshold,
            actual_value: candidate.actual_value,
            fingerprint: candidate.fingerprint.clone(),
            status: AlertStatus::Open,
            created_at: candidate.occurred_at,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution: None,
            escalation_level: 0,
            last_escalated_at: None,
            auto_correct: candidate.correction_rule_id.is_some(),
            correction_rule_id: candidate.correction_rule_id.clone(),
            correction_attempted: false,
            duplicate_count: 0,
            first_occurrence: candidate.occurred_at,
            last_occurrence: candidate.occurred_at,
            annotations: Vec::new(),
        }
    }

    /// 直接构造一条告警（纠正失败、恢复失败等内部来源）
    pub fn internal(
        scope: Scope,
        severity: Severity,
        fingerprint: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            rule_id: String::new(),
            severity,
            scope,
            title: title.into(),
            message: message.into(),
            metric: String::new(),
            threshold: 0.0,
            actual_value: 0.0,
            fingerprint: fingerprint.into(),
            status: AlertStatus::Open,
            created_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            resolution: None,
            escalation_level: 0,
            last_escalated_at: None,
            auto_correct: false,
            correction_rule_id: None,
            correction_attempted: false,
            duplicate_count: 0,
            first_occurrence: now,
            last_occurrence: now,
            annotations: Vec::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == AlertStatus::Resolved
    }

    /// 是否还在活跃（未解决）状态
    pub fn is_active(&self) -> bool {
        !self.is_resolved()
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged_at.is_some()
    }
}
