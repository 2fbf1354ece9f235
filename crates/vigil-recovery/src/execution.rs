//! 恢复执行记录
//!
//! 记录一次恢复流程运行的完整时间线: 每个步骤的访问记录、
//! 各步骤的最终结果以及整体进度。

use crate::model::RecoveryProcedure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 恢复执行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// 已创建, 等待启动
    Pending,
    /// 等待人工审批
    RequiresApproval,
    /// 执行中
    Running,
    /// 全部步骤成功
    Succeeded,
    /// 执行失败
    Failed,
}

impl ExecutionStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Succeeded | ExecutionStatus::Failed)
    }
}

/// 单个步骤的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepResult {
    Completed,
    Skipped,
    Failed,
}

/// 一次步骤访问的记录 (回退循环下同一步骤可能出现多条)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_number: u32,
    pub name: String,
    /// 本次访问内的尝试次数 (含重试)
    pub attempts: u32,
    pub result: StepResult,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub error: Option<String>,
    /// 执行器返回的附加数据
    pub output: Option<serde_json::Value>,
}

/// 恢复执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryExecution {
    pub id: String,
    /// 触发本次执行的崩溃事件
    pub crash_event_id: String,
    pub procedure_id: String,
    pub procedure_version: u32,
    pub unit_id: String,
    pub status: ExecutionStatus,
    /// 当前 (或下一个) 待执行的步骤号
    pub current_step: u32,
    pub steps_total: u32,
    pub steps_completed: u32,
    pub steps_skipped: u32,
    pub steps_failed: u32,
    /// 已到达终态的步骤占比, 0.0 - 100.0
    pub progress_pct: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    /// 执行期间并入的后续崩溃事件
    pub absorbed_crash_ids: Vec<String>,
    /// 按时间顺序追加的步骤访问记录
    pub step_records: Vec<StepRecord>,
    /// 各步骤号的最终结果 (回退重跑后覆盖)
    pub step_outcomes: HashMap<u32, StepResult>,
    pub error: Option<String>,
}

impl RecoveryExecution {
    pub fn new(crash_event_id: &str, procedure: &RecoveryProcedure, unit_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            crash_event_id: crash_event_id.to_string(),
            procedure_id: procedure.id.clone(),
            procedure_version: procedure.version,
            unit_id: unit_id.to_string(),
            status: ExecutionStatus::Pending,
            current_step: 1,
            steps_total: procedure.steps.len() as u32,
            steps_completed: 0,
            steps_skipped: 0,
            steps_failed: 0,
            progress_pct: 0.0,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            approved_by: None,
            absorbed_crash_ids: Vec::new(),
            step_records: Vec::new(),
            step_outcomes: HashMap::new(),
            error: None,
        }
    }

    /// 记录一次步骤访问并刷新计数与进度
    pub fn record_step(&mut self, record: StepRecord) {
        self.step_outcomes.insert(record.step_number, record.result);
        self.step_records.push(record);
        self.recount();
    }

    fn recount(&mut self) {
        self.steps_completed = self
            .step_outcomes
            .values()
            .filter(|r| **r == StepResult::Completed)
            .count() as u32;
        self.steps_skipped = self
            .step_outcomes
            .values()
            .filter(|r| **r == StepResult::Skipped)
            .count() as u32;
        self.steps_failed = self
            .step_outcomes
            .values()
            .filter(|r| **r == StepResult::Failed)
            .count() as u32;
        if self.steps_total > 0 {
            self.progress_pct =
                (self.step_outcomes.len() as f64 / self.steps_total as f64) * 100.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{RecoveryStep, StepAction};

    #[test]
    fn record_step_updates_counters_and_progress() {
        let procedure = RecoveryProcedure::new("p", "payments", "oom")
            .with_step(RecoveryStep::new(1, "a", StepAction::RunDiagnostics))
            .with_step(RecoveryStep::new(2, "b", StepAction::RestartService));
        let mut execution = RecoveryExecution::new("crash-1", &procedure, "unit-1");

        let now = Utc::now();
        execution.record_step(StepRecord {
            step_number: 1,
            name: "a".to_string(),
            attempts: 1,
            result: StepResult::Completed,
            started_at: now,
            finished_at: now,
            error: None,
            output: None,
        });
        assert_eq!(execution.steps_completed, 1);
        assert!((execution.progress_pct - 50.0).abs() < f64::EPSILON);

        // 同一步骤重跑后结果覆盖, 不重复计数
        execution.record_step(StepRecord {
            step_number: 1,
            name: "a".to_string(),
            attempts: 1,
            result: StepResult::Failed,
            started_at: now,
            finished_at: now,
            error: Some("boom".to_string()),
            output: None,
        });
        assert_eq!(execution.steps_completed, 0);
        assert_eq!(execution.steps_failed, 1);
        assert_eq!(execution.step_records.len(), 2);
    }
}
