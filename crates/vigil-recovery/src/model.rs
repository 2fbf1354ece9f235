//! 崩溃事件与恢复流程的数据模型
//!
//! 崩溃事件 (CrashEvent) 记录一次被检测到的单元崩溃,
//! 恢复流程 (RecoveryProcedure) 描述针对某个生态/崩溃类型的有序修复步骤。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// 崩溃事件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrashStatus {
    /// 已检测到, 尚未开始处理
    Detected,
    /// 恢复流程执行中
    Recovering,
    /// 已通过恢复流程解决
    Resolved,
    /// 需要人工介入
    ManualInterventionRequired,
}

/// 崩溃事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashEvent {
    pub id: String,
    /// 受影响的单元
    pub unit_id: String,
    /// 单元所属生态 (用于流程选择)
    pub ecosystem: String,
    /// 崩溃类型, 如 "oom" / "deadlock" / "panic"
    pub crash_type: String,
    pub detected_at: DateTime<Utc>,
    /// 从实际发生到被检测到的延迟
    pub detection_latency_ms: Option<u64>,
    pub status: CrashStatus,
    /// 处理本事件的恢复执行 ID
    pub recovery_execution_id: Option<String>,
    /// 被并入同一次恢复的后续崩溃事件
    pub related_event_ids: Vec<String>,
}

impl CrashEvent {
    pub fn new(unit_id: &str, ecosystem: &str, crash_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            unit_id: unit_id.to_string(),
            ecosystem: ecosystem.to_string(),
            crash_type: crash_type.to_string(),
            detected_at: Utc::now(),
            detection_latency_ms: None,
            status: CrashStatus::Detected,
            recovery_execution_id: None,
            related_event_ids: Vec::new(),
        }
    }
}

/// 恢复步骤动作 (闭合枚举, 不支持任意外部命令)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// 重启单元服务
    RestartService,
    /// 回滚到上一个已知良好版本
    RollbackRelease,
    /// 清空积压队列
    ClearQueue,
    /// 刷新缓存
    FlushCache,
    /// 扩容
    ScaleUp,
    /// 健康检查
    HealthCheck,
    /// 等待指标稳定
    WaitForStable { seconds: u64 },
    /// 采集诊断信息
    RunDiagnostics,
    /// 通知运维人员
    NotifyOperator,
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::RestartService => "restart_service",
            StepAction::RollbackRelease => "rollback_release",
            StepAction::ClearQueue => "clear_queue",
            StepAction::FlushCache => "flush_cache",
            StepAction::ScaleUp => "scale_up",
            StepAction::HealthCheck => "health_check",
            StepAction::WaitForStable { .. } => "wait_for_stable",
            StepAction::RunDiagnostics => "run_diagnostics",
            StepAction::NotifyOperator => "notify_operator",
        }
    }
}

/// 步骤前置条件 / 完成校验
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepCondition {
    /// 恒为真
    Always,
    /// 单元健康检查通过
    UnitHealthy,
    /// 积压队列为空
    QueueEmpty,
    /// 指标低于阈值
    MetricBelow { metric: String, value: f64 },
    /// 指标高于阈值
    MetricAbove { metric: String, value: f64 },
}

/// 步骤出错时的处理策略
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OnError {
    /// 终止整个恢复执行
    Stop,
    /// 跳过本步骤继续
    Skip,
    /// 重试指定次数后终止
    Retry { max_retries: u32 },
    /// 跳转到指定步骤号
    Fallback { step: u32 },
}

/// 恢复步骤定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryStep {
    /// 步骤号, 从 1 开始连续编号
    pub step_number: u32,
    pub name: String,
    pub action: StepAction,
    /// 动作的附加参数
    #[serde(default)]
    pub config: serde_json::Value,
    /// 前置条件, 全部满足才执行
    #[serde(default)]
    pub preconditions: Vec<StepCondition>,
    /// 前置条件不满足时是否跳过 (否则按出错处理)
    #[serde(default)]
    pub skip_on_precondition_failure: bool,
    /// 单步超时
    pub timeout_seconds: u64,
    pub on_error: OnError,
    /// 执行成功后的完成校验, 任一失败视为本步骤出错
    #[serde(default)]
    pub validations: Vec<StepCondition>,
}

impl RecoveryStep {
    pub fn new(step_number: u32, name: &str, action: StepAction) -> Self {
        Self {
            step_number,
            name: name.to_string(),
            action,
            config: serde_json::Value::Null,
            preconditions: Vec::new(),
            skip_on_precondition_failure: false,
            timeout_seconds: 60,
            on_error: OnError::Stop,
            validations: Vec::new(),
        }
    }

    pub fn with_on_error(mut self, on_error: OnError) -> Self {
        self.on_error = on_error;
        self
    }

    pub fn with_preconditions(mut self, conditions: Vec<StepCondition>, skip: bool) -> Self {
        self.preconditions = conditions;
        self.skip_on_precondition_failure = skip;
        self
    }

    pub fn with_validations(mut self, conditions: Vec<StepCondition>) -> Self {
        self.validations = conditions;
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }
}

/// 恢复流程定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryProcedure {
    pub id: String,
    pub name: String,
    /// 版本号, 更新时递增
    pub version: u32,
    /// 适用的生态
    pub ecosystem: String,
    /// 适用的崩溃类型; 默认流程可为空
    pub crash_type: String,
    /// 是否为该生态的默认流程 (精确匹配失败时的兜底)
    pub is_default: bool,
    /// 执行前是否需要人工审批
    pub requires_approval: bool,
    /// 整个流程的总超时
    pub total_timeout_seconds: u64,
    pub steps: Vec<RecoveryStep>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RecoveryProcedure {
    pub fn new(name: &str, ecosystem: &str, crash_type: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            version: 1,
            ecosystem: ecosystem.to_string(),
            crash_type: crash_type.to_string(),
            is_default: false,
            requires_approval: false,
            total_timeout_seconds: 1800,
            steps: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_step(mut self, step: RecoveryStep) -> Self {
        self.steps.push(step);
        self
    }

    /// 校验流程定义的结构完整性
    pub fn validate(&self) -> Result<(), RecoveryError> {
        if self.name.trim().is_empty() {
            return Err(RecoveryError::Invalid(
                "procedure name cannot be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(RecoveryError::Invalid(
                "procedure must contain at least one step".to_string(),
            ));
        }
        if self.total_timeout_seconds == 0 {
            return Err(RecoveryError::Invalid(
                "total_timeout_seconds must be positive".to_string(),
            ));
        }
        let mut numbers = HashSet::new();
        for step in &self.steps {
            if !numbers.insert(step.step_number) {
                return Err(RecoveryError::Invalid(format!(
                    "duplicate step number {}",
                    step.step_number
                )));
            }
            if step.timeout_seconds == 0 {
                return Err(RecoveryError::Invalid(format!(
                    "step {} timeout must be positive",
                    step.step_number
                )));
            }
        }
        // 步骤号必须从 1 开始连续
        for n in 1..=self.steps.len() as u32 {
            if !numbers.contains(&n) {
                return Err(RecoveryError::Invalid(format!(
                    "step numbers must be contiguous from 1, missing {}",
                    n
                )));
            }
        }
        // 回退目标必须存在
        for step in &self.steps {
            if let OnError::Fallback { step: target } = step.on_error {
                if !numbers.contains(&target) {
                    return Err(RecoveryError::Invalid(format!(
                        "step {} falls back to unknown step {}",
                        step.step_number, target
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn step(&self, number: u32) -> Option<&RecoveryStep> {
        self.steps.iter().find(|s| s.step_number == number)
    }
}

/// 恢复模块错误
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("Procedure not found: {0}")]
    ProcedureNotFound(String),

    #[error("Crash event not found: {0}")]
    CrashNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Invalid procedure: {0}")]
    Invalid(String),

    #[error("Invalid execution state: {0}")]
    InvalidState(String),
}

/// 恢复流程存储 (内存实现)
pub struct ProcedureStore {
    procedures: Arc<RwLock<HashMap<String, RecoveryProcedure>>>,
}

impl ProcedureStore {
    pub fn new() -> Self {
        Self {
            procedures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 保存流程, 已存在时版本号递增
    pub async fn save(&self, mut procedure: RecoveryProcedure) -> Result<String, RecoveryError> {
        procedure.validate()?;
        let mut procedures = self.procedures.write().await;
        if let Some(existing) = procedures.get(&procedure.id) {
            procedure.version = existing.version + 1;
            procedure.created_at = existing.created_at;
        }
        procedure.updated_at = Utc::now();
        let id = procedure.id.clone();
        procedures.insert(id.clone(), procedure);
        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Option<RecoveryProcedure> {
        self.procedures.read().await.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Result<(), RecoveryError> {
        self.procedures
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| RecoveryError::ProcedureNotFound(id.to_string()))
    }

    pub async fn list(&self) -> Vec<RecoveryProcedure> {
        self.procedures.read().await.values().cloned().collect()
    }

    /// 流程选择: 先按 (生态, 崩溃类型) 精确匹配, 再退回生态默认流程
    pub async fn select(&self, ecosystem: &str, crash_type: &str) -> Option<RecoveryProcedure> {
        let procedures = self.procedures.read().await;
        if let Some(exact) = procedures
            .values()
            .find(|p| p.ecosystem == ecosystem && p.crash_type == crash_type)
        {
            return Some(exact.clone());
        }
        procedures
            .values()
            .find(|p| p.ecosystem == ecosystem && p.is_default)
            .cloned()
    }
}

impl Default for ProcedureStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 崩溃事件存储 (内存实现)
pub struct CrashEventStore {
    events: Arc<RwLock<HashMap<String, CrashEvent>>>,
}

impl CrashEventStore {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn save(&self, event: CrashEvent) {
        self.events.write().await.insert(event.id.clone(), event);
    }

    pub async fn get(&self, id: &str) -> Option<CrashEvent> {
        self.events.read().await.get(id).cloned()
    }

    pub async fn set_status(&self, id: &str, status: CrashStatus) -> Result<(), RecoveryError> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| RecoveryError::CrashNotFound(id.to_string()))?;
        event.status = status;
        Ok(())
    }

    pub async fn attach_execution(
        &self,
        id: &str,
        execution_id: &str,
    ) -> Result<(), RecoveryError> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| RecoveryError::CrashNotFound(id.to_string()))?;
        event.recovery_execution_id = Some(execution_id.to_string());
        Ok(())
    }

    pub async fn add_related(&self, id: &str, related_id: &str) -> Result<(), RecoveryError> {
        let mut events = self.events.write().await;
        let event = events
            .get_mut(id)
            .ok_or_else(|| RecoveryError::CrashNotFound(id.to_string()))?;
        event.related_event_ids.push(related_id.to_string());
        Ok(())
    }

    pub async fn list(&self) -> Vec<CrashEvent> {
        let mut events: Vec<CrashEvent> = self.events.read().await.values().cloned().collect();
        events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        events
    }

    pub async fn list_for_unit(&self, unit_id: &str) -> Vec<CrashEvent> {
        let mut events: Vec<CrashEvent> = self
            .events
            .read()
            .await
            .values()
            .filter(|e| e.unit_id == unit_id)
            .cloned()
            .collect();
        events.sort_by(|a, b| b.detected_at.cmp(&a.detected_at));
        events
    }
}

impl Default for CrashEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_step_procedure() -> RecoveryProcedure {
        RecoveryProcedure::new("restart-flow", "payments", "oom")
            .with_step(RecoveryStep::new(1, "diagnose", StepAction::RunDiagnostics))
            .with_step(RecoveryStep::new(2, "restart", StepAction::RestartService))
            .with_step(RecoveryStep::new(3, "verify", StepAction::HealthCheck))
    }

    #[test]
    fn validate_rejects_empty_steps() {
        let procedure = RecoveryProcedure::new("empty", "payments", "oom");
        assert!(procedure.validate().is_err());
    }

    #[test]
    fn validate_rejects_gap_in_step_numbers() {
        let procedure = RecoveryProcedure::new("gapped", "payments", "oom")
            .with_step(RecoveryStep::new(1, "a", StepAction::RunDiagnostics))
            .with_step(RecoveryStep::new(3, "c", StepAction::HealthCheck));
        assert!(procedure.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_fallback_target() {
        let procedure = RecoveryProcedure::new("bad-fallback", "payments", "oom").with_step(
            RecoveryStep::new(1, "a", StepAction::RestartService)
                .with_on_error(OnError::Fallback { step: 9 }),
        );
        assert!(procedure.validate().is_err());
    }

    #[test]
    fn validate_accepts_well_formed_procedure() {
        assert!(three_step_procedure().validate().is_ok());
    }

    #[tokio::test]
    async fn save_bumps_version_on_update() {
        let store = ProcedureStore::new();
        let procedure = three_step_procedure();
        let id = store.save(procedure.clone()).await.unwrap();
        let first = store.get(&id).await.unwrap();
        assert_eq!(first.version, 1);

        store.save(first).await.unwrap();
        let second = store.get(&id).await.unwrap();
        assert_eq!(second.version, 2);
    }

    #[tokio::test]
    async fn select_prefers_exact_match_over_default() {
        let store = ProcedureStore::new();
        let mut fallback = RecoveryProcedure::new("eco-default", "payments", "")
            .with_step(RecoveryStep::new(1, "restart", StepAction::RestartService));
        fallback.is_default = true;
        store.save(fallback).await.unwrap();
        store.save(three_step_procedure()).await.unwrap();

        let chosen = store.select("payments", "oom").await.unwrap();
        assert_eq!(chosen.name, "restart-flow");

        let fallback = store.select("payments", "deadlock").await.unwrap();
        assert_eq!(fallback.name, "eco-default");

        assert!(store.select("search", "oom").await.is_none());
    }
}
