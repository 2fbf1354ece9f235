//! 恢复编排器
//!
//! 消费崩溃事件, 选择恢复流程, 驱动步骤状态机直到成功或失败。
//! 同一单元任意时刻至多一个活跃执行, 执行期间到达的崩溃事件
//! 并入现有执行的时间线而不是另起一个。

use crate::execution::{ExecutionStatus, RecoveryExecution, StepRecord, StepResult};
use crate::executor::StepExecutor;
use crate::model::{
    CrashEvent, CrashEventStore, CrashStatus, OnError, ProcedureStore, RecoveryError,
    RecoveryProcedure, RecoveryStep,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use vigil_alert::{Alert, AlertManager, ResolutionKind};
use vigil_core::SharedEventBus;
use vigil_types::{topics, Message, Scope, Severity};

/// 单次回退跳转允许的最大步骤访问数 = 步骤数 x 本系数
const MAX_VISITS_PER_STEP: u32 = 4;

const RECOVERY_ACTOR: &str = "recovery-orchestrator";

/// 处理崩溃事件的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrashOutcome {
    /// 已创建执行, 可以启动
    Started(String),
    /// 已创建执行, 等待人工审批
    AwaitingApproval(String),
    /// 并入该单元已有的活跃执行
    Attached(String),
    /// 没有适用的流程, 转人工处理
    ManualInterventionRequired,
}

struct ExecutionTable {
    by_id: HashMap<String, RecoveryExecution>,
    /// 单元 -> 活跃执行, 保证每单元互斥
    active_by_unit: HashMap<String, String>,
}

/// 恢复编排器
pub struct RecoveryOrchestrator {
    procedures: Arc<ProcedureStore>,
    crashes: Arc<CrashEventStore>,
    executions: Arc<RwLock<ExecutionTable>>,
    executor: Arc<dyn StepExecutor>,
    alerts: Arc<AlertManager>,
    bus: SharedEventBus,
}

impl RecoveryOrchestrator {
    pub fn new(
        procedures: Arc<ProcedureStore>,
        crashes: Arc<CrashEventStore>,
        executor: Arc<dyn StepExecutor>,
        alerts: Arc<AlertManager>,
        bus: SharedEventBus,
    ) -> Self {
        Self {
            procedures,
            crashes,
            executions: Arc::new(RwLock::new(ExecutionTable {
                by_id: HashMap::new(),
                active_by_unit: HashMap::new(),
            })),
            executor,
            alerts,
            bus,
        }
    }

    fn crash_fingerprint(unit_id: &str) -> String {
        format!("crash:{}", unit_id)
    }

    fn manual_fingerprint(unit_id: &str) -> String {
        format!("recovery-manual:{}", unit_id)
    }

    /// 处理一个崩溃事件
    ///
    /// 始终先登记事件并提交一条 Critical 告警 (同指纹去重)。
    /// 该单元已有活跃执行时并入时间线; 否则选择流程并创建执行。
    /// 找不到适用流程时事件直接转人工。
    pub async fn handle_crash(&self, mut event: CrashEvent) -> Result<CrashOutcome, RecoveryError> {
        info!(
            crash_id = %event.id,
            unit_id = %event.unit_id,
            crash_type = %event.crash_type,
            "Crash event received"
        );

        self.bus.publish(Message::new(
            topics::CRASH_DETECTED,
            serde_json::json!({
                "crash_event_id": event.id,
                "unit_id": event.unit_id,
                "ecosystem": event.ecosystem,
                "crash_type": event.crash_type,
            }),
        ));

        self.alerts
            .submit_alert(Alert::internal(
                Scope::unit(&event.unit_id),
                Severity::Critical,
                Self::crash_fingerprint(&event.unit_id),
                format!("Unit {} crashed ({})", event.unit_id, event.crash_type),
                format!(
                    "Crash of type '{}' detected on unit '{}' in ecosystem '{}'",
                    event.crash_type, event.unit_id, event.ecosystem
                ),
            ))
            .await;

        // 互斥检查与执行创建必须在同一把写锁下完成
        let mut table = self.executions.write().await;

        if let Some(active_id) = table.active_by_unit.get(&event.unit_id).cloned() {
            if let Some(execution) = table.by_id.get_mut(&active_id) {
                execution.absorbed_crash_ids.push(event.id.clone());
                let primary_crash = execution.crash_event_id.clone();
                event.status = CrashStatus::Recovering;
                event.recovery_execution_id = Some(active_id.clone());
                let event_id = event.id.clone();
                self.crashes.save(event).await;
                self.crashes.add_related(&primary_crash, &event_id).await?;
                info!(
                    crash_id = %event_id,
                    execution_id = %active_id,
                    "Crash attached to active recovery execution"
                );
                return Ok(CrashOutcome::Attached(active_id));
            }
        }

        let procedure = match self
            .procedures
            .select(&event.ecosystem, &event.crash_type)
            .await
        {
            Some(p) => p,
            None => {
                warn!(
                    crash_id = %event.id,
                    ecosystem = %event.ecosystem,
                    crash_type = %event.crash_type,
                    "No recovery procedure matches, manual intervention required"
                );
                event.status = CrashStatus::ManualInterventionRequired;
                let unit_id = event.unit_id.clone();
                self.crashes.save(event).await;
                drop(table);
                self.raise_manual_alert(&unit_id, "no recovery procedure matches this crash")
                    .await;
                return Ok(CrashOutcome::ManualInterventionRequired);
            }
        };

        let mut execution = RecoveryExecution::new(&event.id, &procedure, &event.unit_id);
        let execution_id = execution.id.clone();
        if procedure.requires_approval {
            execution.status = ExecutionStatus::RequiresApproval;
        }

        event.recovery_execution_id = Some(execution_id.clone());
        let awaiting = procedure.requires_approval;
        table
            .active_by_unit
            .insert(event.unit_id.clone(), execution_id.clone());
        table.by_id.insert(execution_id.clone(), execution);
        drop(table);
        self.crashes.save(event).await;

        info!(
            execution_id = %execution_id,
            procedure = %procedure.name,
            awaiting_approval = awaiting,
            "Recovery execution created"
        );

        if awaiting {
            Ok(CrashOutcome::AwaitingApproval(execution_id))
        } else {
            Ok(CrashOutcome::Started(execution_id))
        }
    }

    /// 审批通过, 执行转为可启动
    pub async fn approve(&self, execution_id: &str, actor: &str) -> Result<(), RecoveryError> {
        let mut table = self.executions.write().await;
        let execution = table
            .by_id
            .get_mut(execution_id)
            .ok_or_else(|| RecoveryError::ExecutionNotFound(execution_id.to_string()))?;
        if execution.status != ExecutionStatus::RequiresApproval {
            return Err(RecoveryError::InvalidState(format!(
                "cannot approve execution in state {:?}",
                execution.status
            )));
        }
        execution.status = ExecutionStatus::Pending;
        execution.approved_by = Some(actor.to_string());
        info!(execution_id = %execution_id, actor = %actor, "Recovery execution approved");
        Ok(())
    }

    /// 审批拒绝, 执行直接失败并转人工
    pub async fn reject(&self, execution_id: &str, actor: &str) -> Result<(), RecoveryError> {
        let (unit_id, crash_id) = {
            let mut table = self.executions.write().await;
            let execution = table
                .by_id
                .get_mut(execution_id)
                .ok_or_else(|| RecoveryError::ExecutionNotFound(execution_id.to_string()))?;
            if execution.status != ExecutionStatus::RequiresApproval {
                return Err(RecoveryError::InvalidState(format!(
                    "cannot reject execution in state {:?}",
                    execution.status
                )));
            }
            execution.status = ExecutionStatus::Failed;
            execution.error = Some(format!("rejected by {}", actor));
            execution.finished_at = Some(Utc::now());
            let unit_id = execution.unit_id.clone();
            let crash_id = execution.crash_event_id.clone();
            table.active_by_unit.remove(&unit_id);
            (unit_id, crash_id)
        };
        self.crashes
            .set_status(&crash_id, CrashStatus::ManualInterventionRequired)
            .await?;
        self.raise_manual_alert(&unit_id, "recovery execution was rejected")
            .await;
        info!(execution_id = %execution_id, actor = %actor, "Recovery execution rejected");
        Ok(())
    }

    /// 运行一个待启动的执行, 直到成功或失败
    ///
    /// 只允许从 Pending 启动; 等待审批或已终态的执行拒绝运行。
    /// 整个流程受 `total_timeout_seconds` 约束。
    pub async fn run(&self, execution_id: &str) -> Result<ExecutionStatus, RecoveryError> {
        let (procedure_id, crash_id, unit_id) = {
            let mut table = self.executions.write().await;
            let execution = table
                .by_id
                .get_mut(execution_id)
                .ok_or_else(|| RecoveryError::ExecutionNotFound(execution_id.to_string()))?;
            if execution.status != ExecutionStatus::Pending {
                return Err(RecoveryError::InvalidState(format!(
                    "cannot run execution in state {:?}",
                    execution.status
                )));
            }
            execution.status = ExecutionStatus::Running;
            execution.started_at = Some(Utc::now());
            (
                execution.procedure_id.clone(),
                execution.crash_event_id.clone(),
                execution.unit_id.clone(),
            )
        };

        let procedure = match self.procedures.get(&procedure_id).await {
            Some(p) => p,
            None => {
                self.finish_failure(execution_id, &crash_id, &unit_id, "procedure was deleted")
                    .await;
                return Ok(ExecutionStatus::Failed);
            }
        };

        self.crashes
            .set_status(&crash_id, CrashStatus::Recovering)
            .await?;

        let total_timeout = Duration::from_secs(procedure.total_timeout_seconds);
        let outcome =
            tokio::time::timeout(total_timeout, self.execute_steps(execution_id, &procedure))
                .await;

        let status = match outcome {
            Ok(Ok(())) => {
                let clean = {
                    let table = self.executions.read().await;
                    table
                        .by_id
                        .get(execution_id)
                        .map(|e| {
                            !e.step_outcomes.values().any(|r| *r == StepResult::Failed)
                                && e.error.is_none()
                        })
                        .unwrap_or(false)
                };
                if clean {
                    self.finish_success(execution_id, &crash_id, &unit_id).await;
                    ExecutionStatus::Succeeded
                } else {
                    let reason = {
                        let table = self.executions.read().await;
                        table
                            .by_id
                            .get(execution_id)
                            .and_then(|e| e.error.clone())
                            .unwrap_or_else(|| "one or more steps failed".to_string())
                    };
                    self.finish_failure(execution_id, &crash_id, &unit_id, &reason)
                        .await;
                    ExecutionStatus::Failed
                }
            }
            Ok(Err(err)) => {
                self.finish_failure(execution_id, &crash_id, &unit_id, &err.to_string())
                    .await;
                ExecutionStatus::Failed
            }
            Err(_) => {
                self.finish_failure(
                    execution_id,
                    &crash_id,
                    &unit_id,
                    &format!(
                        "procedure timed out after {}s",
                        procedure.total_timeout_seconds
                    ),
                )
                .await;
                ExecutionStatus::Failed
            }
        };
        Ok(status)
    }

    /// 步骤循环
    ///
    /// 正常前进一步一号; Fallback 跳回目标步骤号继续。
    /// 总访问数超过 4 x 步骤数时判定为回退死循环。
    async fn execute_steps(
        &self,
        execution_id: &str,
        procedure: &RecoveryProcedure,
    ) -> Result<(), RecoveryError> {
        let steps_total = procedure.steps.len() as u32;
        let visit_cap = steps_total * MAX_VISITS_PER_STEP;
        let unit_id = {
            let table = self.executions.read().await;
            table
                .by_id
                .get(execution_id)
                .map(|e| e.unit_id.clone())
                .ok_or_else(|| RecoveryError::ExecutionNotFound(execution_id.to_string()))?
        };

        let mut current = 1u32;
        let mut visits = 0u32;

        while current <= steps_total {
            visits += 1;
            if visits > visit_cap {
                self.set_error(execution_id, "fallback loop detected, aborting")
                    .await;
                return Ok(());
            }

            let step = procedure
                .step(current)
                .ok_or_else(|| {
                    RecoveryError::Invalid(format!("step {} missing from procedure", current))
                })?
                .clone();

            self.set_current_step(execution_id, current).await;
            let started_at = Utc::now();

            // 前置条件
            let preconditions_met = self.check_all(&step.preconditions, &unit_id).await;
            if !preconditions_met {
                if step.skip_on_precondition_failure {
                    info!(
                        execution_id = %execution_id,
                        step = current,
                        "Preconditions not met, skipping step"
                    );
                    self.record(
                        execution_id,
                        StepRecord {
                            step_number: current,
                            name: step.name.clone(),
                            attempts: 0,
                            result: StepResult::Skipped,
                            started_at,
                            finished_at: Utc::now(),
                            error: Some("preconditions not met".to_string()),
                            output: None,
                        },
                    )
                    .await;
                    current += 1;
                    continue;
                }
                match self
                    .handle_step_error(
                        execution_id,
                        &step,
                        started_at,
                        0,
                        "preconditions not met",
                    )
                    .await
                {
                    StepVerdict::Advance => current += 1,
                    StepVerdict::JumpTo(target) => current = target,
                    StepVerdict::Abort => return Ok(()),
                }
                continue;
            }

            // 执行 (Retry 策略下按预算重试, 校验失败同样消耗预算)
            let max_attempts = match step.on_error {
                OnError::Retry { max_retries } => 1 + max_retries,
                _ => 1,
            };
            let step_timeout = Duration::from_secs(step.timeout_seconds);
            let mut last_error = String::new();
            let mut succeeded = false;

            for attempt in 1..=max_attempts {
                let result = tokio::time::timeout(
                    step_timeout,
                    self.executor.execute(&step.action, &step.config, &unit_id),
                )
                .await;

                match result {
                    Err(_) => {
                        last_error =
                            format!("step timed out after {}s", step.timeout_seconds);
                    }
                    Ok(Err(e)) => {
                        last_error = e.to_string();
                    }
                    Ok(Ok(outcome)) if !outcome.success => {
                        last_error = outcome
                            .error
                            .unwrap_or_else(|| "step reported failure".to_string());
                    }
                    Ok(Ok(outcome)) => {
                        if self.check_all(&step.validations, &unit_id).await {
                            self.record(
                                execution_id,
                                StepRecord {
                                    step_number: current,
                                    name: step.name.clone(),
                                    attempts: attempt,
                                    result: StepResult::Completed,
                                    started_at,
                                    finished_at: Utc::now(),
                                    error: None,
                                    output: outcome.data,
                                },
                            )
                            .await;
                            succeeded = true;
                            break;
                        }
                        last_error = "post-step validation failed".to_string();
                    }
                }

                if attempt < max_attempts {
                    warn!(
                        execution_id = %execution_id,
                        step = current,
                        attempt,
                        error = %last_error,
                        "Step attempt failed, retrying"
                    );
                }
            }

            if succeeded {
                current += 1;
                continue;
            }

            match self
                .handle_step_error(execution_id, &step, started_at, max_attempts, &last_error)
                .await
            {
                StepVerdict::Advance => current += 1,
                StepVerdict::JumpTo(target) => current = target,
                StepVerdict::Abort => return Ok(()),
            }
        }

        Ok(())
    }

    /// 按步骤的出错策略记录结果并给出下一步走向
    async fn handle_step_error(
        &self,
        execution_id: &str,
        step: &RecoveryStep,
        started_at: chrono::DateTime<Utc>,
        attempts: u32,
        error: &str,
    ) -> StepVerdict {
        match step.on_error {
            OnError::Skip => {
                warn!(
                    execution_id = %execution_id,
                    step = step.step_number,
                    error = %error,
                    "Step failed, skipping per policy"
                );
                self.record(
                    execution_id,
                    StepRecord {
                        step_number: step.step_number,
                        name: step.name.clone(),
                        attempts,
                        result: StepResult::Skipped,
                        started_at,
                        finished_at: Utc::now(),
                        error: Some(error.to_string()),
                        output: None,
                    },
                )
                .await;
                StepVerdict::Advance
            }
            OnError::Fallback { step: target } => {
                warn!(
                    execution_id = %execution_id,
                    step = step.step_number,
                    fallback = target,
                    error = %error,
                    "Step failed, falling back"
                );
                self.record(
                    execution_id,
                    StepRecord {
                        step_number: step.step_number,
                        name: step.name.clone(),
                        attempts,
                        result: StepResult::Failed,
                        started_at,
                        finished_at: Utc::now(),
                        error: Some(error.to_string()),
                        output: None,
                    },
                )
                .await;
                StepVerdict::JumpTo(target)
            }
            OnError::Stop | OnError::Retry { .. } => {
                error!(
                    execution_id = %execution_id,
                    step = step.step_number,
                    error = %error,
                    "Step failed, stopping execution"
                );
                self.record(
                    execution_id,
                    StepRecord {
                        step_number: step.step_number,
                        name: step.name.clone(),
                        attempts,
                        result: StepResult::Failed,
                        started_at,
                        finished_at: Utc::now(),
                        error: Some(error.to_string()),
                        output: None,
                    },
                )
                .await;
                self.set_error(
                    execution_id,
                    &format!("step {} failed: {}", step.step_number, error),
                )
                .await;
                StepVerdict::Abort
            }
        }
    }

    async fn check_all(&self, conditions: &[crate::model::StepCondition], unit_id: &str) -> bool {
        for condition in conditions {
            match self.executor.check(condition, unit_id).await {
                Ok(true) => {}
                Ok(false) => return false,
                Err(e) => {
                    warn!(unit_id = %unit_id, error = %e, "Condition check errored");
                    return false;
                }
            }
        }
        true
    }

    async fn record(&self, execution_id: &str, record: StepRecord) {
        let mut table = self.executions.write().await;
        if let Some(execution) = table.by_id.get_mut(execution_id) {
            execution.record_step(record);
        }
    }

    async fn set_current_step(&self, execution_id: &str, step: u32) {
        let mut table = self.executions.write().await;
        if let Some(execution) = table.by_id.get_mut(execution_id) {
            execution.current_step = step;
        }
    }

    async fn set_error(&self, execution_id: &str, error: &str) {
        let mut table = self.executions.write().await;
        if let Some(execution) = table.by_id.get_mut(execution_id) {
            execution.error = Some(error.to_string());
        }
    }

    async fn finish_success(&self, execution_id: &str, crash_id: &str, unit_id: &str) {
        {
            let mut table = self.executions.write().await;
            if let Some(execution) = table.by_id.get_mut(execution_id) {
                execution.status = ExecutionStatus::Succeeded;
                execution.finished_at = Some(Utc::now());
            }
            table.active_by_unit.remove(unit_id);
        }
        if let Err(e) = self.crashes.set_status(crash_id, CrashStatus::Resolved).await {
            warn!(crash_id = %crash_id, error = %e, "Failed to mark crash resolved");
        }
        match self
            .alerts
            .resolve_open_by_fingerprint(
                &Self::crash_fingerprint(unit_id),
                RECOVERY_ACTOR,
                ResolutionKind::Recovery,
            )
            .await
        {
            Ok(resolved) => {
                if !resolved {
                    warn!(unit_id = %unit_id, "No open crash alert to resolve");
                }
            }
            Err(e) => warn!(unit_id = %unit_id, error = %e, "Failed to resolve crash alert"),
        }
        info!(execution_id = %execution_id, unit_id = %unit_id, "Recovery succeeded");
    }

    async fn finish_failure(
        &self,
        execution_id: &str,
        crash_id: &str,
        unit_id: &str,
        reason: &str,
    ) {
        {
            let mut table = self.executions.write().await;
            if let Some(execution) = table.by_id.get_mut(execution_id) {
                execution.status = ExecutionStatus::Failed;
                if execution.error.is_none() {
                    execution.error = Some(reason.to_string());
                }
                execution.finished_at = Some(Utc::now());
            }
            table.active_by_unit.remove(unit_id);
        }
        if let Err(e) = self
            .crashes
            .set_status(crash_id, CrashStatus::ManualInterventionRequired)
            .await
        {
            warn!(crash_id = %crash_id, error = %e, "Failed to mark crash for manual intervention");
        }
        self.raise_manual_alert(unit_id, reason).await;
        error!(
            execution_id = %execution_id,
            unit_id = %unit_id,
            reason = %reason,
            "Recovery failed, manual intervention required"
        );
    }

    async fn raise_manual_alert(&self, unit_id: &str, reason: &str) {
        self.alerts
            .submit_alert(Alert::internal(
                Scope::unit(unit_id),
                Severity::Critical,
                Self::manual_fingerprint(unit_id),
                format!("Manual intervention required for unit {}", unit_id),
                format!("Automated recovery is not possible: {}", reason),
            ))
            .await;
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<RecoveryExecution> {
        self.executions
            .read()
            .await
            .by_id
            .get(execution_id)
            .cloned()
    }

    pub async fn list_executions(&self) -> Vec<RecoveryExecution> {
        let mut executions: Vec<RecoveryExecution> = self
            .executions
            .read()
            .await
            .by_id
            .values()
            .cloned()
            .collect();
        executions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        executions
    }

    /// 待审批的执行 (运维界面用)
    pub async fn pending_approvals(&self) -> Vec<RecoveryExecution> {
        self.executions
            .read()
            .await
            .by_id
            .values()
            .filter(|e| e.status == ExecutionStatus::RequiresApproval)
            .cloned()
            .collect()
    }
}

enum StepVerdict {
    Advance,
    JumpTo(u32),
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StepOutcome;
    use crate::model::{RecoveryStep, StepAction, StepCondition};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use vigil_alert::{AlertStatus, EscalationHistoryStore, PolicyStore};
    use vigil_core::EventBus;
    use vigil_notify::{NotificationQueue, SubscriberDirectory};

    /// 按动作类型回放预设结果的执行器; 脚本耗尽后一律成功
    struct ScriptedExecutor {
        script: Mutex<std::collections::HashMap<String, VecDeque<StepOutcome>>>,
        checks: Mutex<std::collections::HashMap<String, bool>>,
        delay: Option<Duration>,
    }

    impl ScriptedExecutor {
        fn new() -> Self {
            Self {
                script: Mutex::new(std::collections::HashMap::new()),
                checks: Mutex::new(std::collections::HashMap::new()),
                delay: None,
            }
        }

        fn with_delay(delay: Duration) -> Self {
            let mut executor = Self::new();
            executor.delay = Some(delay);
            executor
        }

        fn script_action(&self, kind: &str, outcomes: Vec<StepOutcome>) {
            self.script
                .lock()
                .unwrap()
                .insert(kind.to_string(), outcomes.into());
        }

        fn set_check(&self, condition_kind: &str, value: bool) {
            self.checks
                .lock()
                .unwrap()
                .insert(condition_kind.to_string(), value);
        }

        fn condition_kind(condition: &StepCondition) -> &'static str {
            match condition {
                StepCondition::Always => "always",
                StepCondition::UnitHealthy => "unit_healthy",
                StepCondition::QueueEmpty => "queue_empty",
                StepCondition::MetricBelow { .. } => "metric_below",
                StepCondition::MetricAbove { .. } => "metric_above",
            }
        }
    }

    #[async_trait]
    impl StepExecutor for ScriptedExecutor {
        async fn execute(
            &self,
            action: &StepAction,
            _config: &serde_json::Value,
            _unit_id: &str,
        ) -> anyhow::Result<StepOutcome> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let scripted = self
                .script
                .lock()
                .unwrap()
                .get_mut(action.kind())
                .and_then(|q| q.pop_front());
            Ok(scripted.unwrap_or_else(StepOutcome::ok))
        }

        async fn check(
            &self,
            condition: &StepCondition,
            _unit_id: &str,
        ) -> anyhow::Result<bool> {
            if matches!(condition, StepCondition::Always) {
                return Ok(true);
            }
            Ok(*self
                .checks
                .lock()
                .unwrap()
                .get(Self::condition_kind(condition))
                .unwrap_or(&true))
        }
    }

    struct Fixture {
        orchestrator: RecoveryOrchestrator,
        procedures: Arc<ProcedureStore>,
        crashes: Arc<CrashEventStore>,
        alerts: Arc<AlertManager>,
        executor: Arc<ScriptedExecutor>,
        bus: SharedEventBus,
    }

    fn fixture_with(executor: ScriptedExecutor) -> Fixture {
        let directory = Arc::new(SubscriberDirectory::new());
        let queue = Arc::new(NotificationQueue::new(directory, 3));
        let bus: SharedEventBus = Arc::new(EventBus::new(64));
        let alerts = Arc::new(AlertManager::new(
            queue,
            Arc::new(PolicyStore::new()),
            Arc::new(EscalationHistoryStore::new(1000)),
            bus.clone(),
        ));
        let procedures = Arc::new(ProcedureStore::new());
        let crashes = Arc::new(CrashEventStore::new());
        let executor = Arc::new(executor);
        let orchestrator = RecoveryOrchestrator::new(
            procedures.clone(),
            crashes.clone(),
            executor.clone() as Arc<dyn StepExecutor>,
            alerts.clone(),
            bus.clone(),
        );
        Fixture {
            orchestrator,
            procedures,
            crashes,
            alerts,
            executor,
            bus,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ScriptedExecutor::new())
    }

    fn basic_procedure() -> RecoveryProcedure {
        RecoveryProcedure::new("oom-restart", "payments", "oom")
            .with_step(RecoveryStep::new(1, "diagnose", StepAction::RunDiagnostics))
            .with_step(RecoveryStep::new(2, "restart", StepAction::RestartService))
            .with_step(RecoveryStep::new(3, "verify", StepAction::HealthCheck))
    }

    #[tokio::test]
    async fn successful_run_resolves_crash_and_alert() {
        let f = fixture();
        f.procedures.save(basic_procedure()).await.unwrap();

        let event = CrashEvent::new("unit-1", "payments", "oom");
        let crash_id = event.id.clone();
        let outcome = f.orchestrator.handle_crash(event).await.unwrap();
        let execution_id = match outcome {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.steps_completed, 3);
        assert!((execution.progress_pct - 100.0).abs() < f64::EPSILON);

        // 步骤记录按步骤号与时间单调前进
        let records = &execution.step_records;
        assert_eq!(
            records.iter().map(|r| r.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        for pair in records.windows(2) {
            assert!(pair[1].started_at >= pair[0].finished_at);
        }

        let crash = f.crashes.get(&crash_id).await.unwrap();
        assert_eq!(crash.status, CrashStatus::Resolved);

        // 崩溃告警被以 Recovery 方式解决
        assert!(f.alerts.open_alerts().await.is_empty());
        let resolved = f
            .alerts
            .alerts_for_unit("unit-1")
            .await
            .into_iter()
            .find(|a| a.fingerprint == "crash:unit-1")
            .unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert_eq!(resolved.resolution, Some(ResolutionKind::Recovery));
    }

    #[tokio::test]
    async fn crash_is_published_on_the_bus() {
        let f = fixture();
        f.procedures.save(basic_procedure()).await.unwrap();
        let mut rx = f.bus.subscribe();

        let event = CrashEvent::new("unit-bus", "payments", "oom");
        let crash_id = event.id.clone();
        f.orchestrator.handle_crash(event).await.unwrap();

        // 崩溃消息先于该事件派生的告警消息发布
        let msg = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.topic, topics::CRASH_DETECTED);
        assert_eq!(msg.payload["crash_event_id"], crash_id.as_str());
        assert_eq!(msg.payload["unit_id"], "unit-bus");
    }

    #[tokio::test]
    async fn second_crash_attaches_to_active_execution() {
        let f = fixture();
        let mut procedure = basic_procedure();
        procedure.requires_approval = true;
        f.procedures.save(procedure).await.unwrap();

        let first = CrashEvent::new("unit-1", "payments", "oom");
        let first_id = first.id.clone();
        let outcome = f.orchestrator.handle_crash(first).await.unwrap();
        let execution_id = match outcome {
            CrashOutcome::AwaitingApproval(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        let second = CrashEvent::new("unit-1", "payments", "deadlock");
        let second_id = second.id.clone();
        let outcome = f.orchestrator.handle_crash(second).await.unwrap();
        assert_eq!(outcome, CrashOutcome::Attached(execution_id.clone()));

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.absorbed_crash_ids, vec![second_id.clone()]);
        assert_eq!(f.orchestrator.list_executions().await.len(), 1);

        let first_event = f.crashes.get(&first_id).await.unwrap();
        assert_eq!(first_event.related_event_ids, vec![second_id]);
    }

    #[tokio::test]
    async fn run_requires_prior_approval() {
        let f = fixture();
        let mut procedure = basic_procedure();
        procedure.requires_approval = true;
        f.procedures.save(procedure).await.unwrap();

        let outcome = f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap();
        let execution_id = match outcome {
            CrashOutcome::AwaitingApproval(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        assert!(matches!(
            f.orchestrator.run(&execution_id).await,
            Err(RecoveryError::InvalidState(_))
        ));

        f.orchestrator.approve(&execution_id, "ops-alice").await.unwrap();
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.approved_by.as_deref(), Some("ops-alice"));
    }

    #[tokio::test]
    async fn reject_frees_unit_and_requires_manual_intervention() {
        let f = fixture();
        let mut procedure = basic_procedure();
        procedure.requires_approval = true;
        f.procedures.save(procedure).await.unwrap();

        let event = CrashEvent::new("unit-1", "payments", "oom");
        let crash_id = event.id.clone();
        let execution_id = match f.orchestrator.handle_crash(event).await.unwrap() {
            CrashOutcome::AwaitingApproval(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };

        f.orchestrator.reject(&execution_id, "ops-bob").await.unwrap();
        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert_eq!(
            f.crashes.get(&crash_id).await.unwrap().status,
            CrashStatus::ManualInterventionRequired
        );

        // 单元已释放, 新的崩溃可以另起执行
        let outcome = f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap();
        assert!(matches!(outcome, CrashOutcome::AwaitingApproval(_)));
    }

    #[tokio::test]
    async fn retry_policy_retries_until_success() {
        let f = fixture();
        f.executor.script_action(
            "restart_service",
            vec![
                StepOutcome::failed("connection refused"),
                StepOutcome::failed("connection refused"),
            ],
        );
        let procedure = RecoveryProcedure::new("retry-flow", "payments", "oom").with_step(
            RecoveryStep::new(1, "restart", StepAction::RestartService)
                .with_on_error(OnError::Retry { max_retries: 2 }),
        );
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.step_records[0].attempts, 3);
    }

    #[tokio::test]
    async fn stop_policy_fails_execution_and_raises_manual_alert() {
        let f = fixture();
        f.executor
            .script_action("restart_service", vec![StepOutcome::failed("boom")]);
        let procedure = RecoveryProcedure::new("stop-flow", "payments", "oom")
            .with_step(RecoveryStep::new(1, "diagnose", StepAction::RunDiagnostics))
            .with_step(RecoveryStep::new(2, "restart", StepAction::RestartService));
        f.procedures.save(procedure).await.unwrap();

        let event = CrashEvent::new("unit-1", "payments", "oom");
        let crash_id = event.id.clone();
        let execution_id = match f.orchestrator.handle_crash(event).await.unwrap() {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Failed);

        assert_eq!(
            f.crashes.get(&crash_id).await.unwrap().status,
            CrashStatus::ManualInterventionRequired
        );
        let open = f.alerts.open_alerts().await;
        assert!(open
            .iter()
            .any(|a| a.fingerprint == "recovery-manual:unit-1"));
    }

    #[tokio::test]
    async fn skip_policy_records_skip_and_continues() {
        let f = fixture();
        f.executor
            .script_action("flush_cache", vec![StepOutcome::failed("cache unreachable")]);
        let procedure = RecoveryProcedure::new("skip-flow", "payments", "oom")
            .with_step(
                RecoveryStep::new(1, "flush", StepAction::FlushCache)
                    .with_on_error(OnError::Skip),
            )
            .with_step(RecoveryStep::new(2, "verify", StepAction::HealthCheck));
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.steps_skipped, 1);
        assert_eq!(execution.steps_completed, 1);
    }

    #[tokio::test]
    async fn fallback_reruns_target_and_can_recover() {
        let f = fixture();
        f.executor
            .script_action("health_check", vec![StepOutcome::failed("still unhealthy")]);
        let procedure = RecoveryProcedure::new("fallback-flow", "payments", "oom")
            .with_step(RecoveryStep::new(1, "restart", StepAction::RestartService))
            .with_step(
                RecoveryStep::new(2, "verify", StepAction::HealthCheck)
                    .with_on_error(OnError::Fallback { step: 1 }),
            );
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(
            execution
                .step_records
                .iter()
                .map(|r| r.step_number)
                .collect::<Vec<_>>(),
            vec![1, 2, 1, 2]
        );
        assert_eq!(execution.steps_failed, 0);
    }

    #[tokio::test]
    async fn fallback_loop_is_capped() {
        let f = fixture();
        // 脚本里塞满失败, 回退永远回到自己
        f.executor.script_action(
            "health_check",
            (0..32).map(|_| StepOutcome::failed("never healthy")).collect(),
        );
        let procedure = RecoveryProcedure::new("loop-flow", "payments", "oom").with_step(
            RecoveryStep::new(1, "verify", StepAction::HealthCheck)
                .with_on_error(OnError::Fallback { step: 1 }),
        );
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Failed);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert!(execution.error.unwrap().contains("fallback loop"));
        assert_eq!(execution.step_records.len() as u32, MAX_VISITS_PER_STEP);
    }

    #[tokio::test]
    async fn unmet_precondition_skips_when_allowed() {
        let f = fixture();
        f.executor.set_check("queue_empty", false);
        let procedure = RecoveryProcedure::new("precondition-flow", "payments", "oom")
            .with_step(
                RecoveryStep::new(1, "clear", StepAction::ClearQueue).with_preconditions(
                    vec![StepCondition::QueueEmpty],
                    true,
                ),
            )
            .with_step(RecoveryStep::new(2, "verify", StepAction::HealthCheck));
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Succeeded);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert_eq!(execution.step_records[0].result, StepResult::Skipped);
    }

    #[tokio::test]
    async fn failed_validation_counts_as_step_error() {
        let f = fixture();
        f.executor.set_check("unit_healthy", false);
        let procedure = RecoveryProcedure::new("validation-flow", "payments", "oom").with_step(
            RecoveryStep::new(1, "restart", StepAction::RestartService)
                .with_validations(vec![StepCondition::UnitHealthy]),
        );
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Failed);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert!(execution.error.unwrap().contains("validation"));
    }

    #[tokio::test(start_paused = true)]
    async fn step_timeout_aborts_under_stop_policy() {
        let f = fixture_with(ScriptedExecutor::with_delay(Duration::from_secs(120)));
        let procedure = RecoveryProcedure::new("slow-flow", "payments", "oom").with_step(
            RecoveryStep::new(1, "restart", StepAction::RestartService).with_timeout(5),
        );
        f.procedures.save(procedure).await.unwrap();

        let execution_id = match f
            .orchestrator
            .handle_crash(CrashEvent::new("unit-1", "payments", "oom"))
            .await
            .unwrap()
        {
            CrashOutcome::Started(id) => id,
            other => panic!("unexpected outcome: {:?}", other),
        };
        let status = f.orchestrator.run(&execution_id).await.unwrap();
        assert_eq!(status, ExecutionStatus::Failed);

        let execution = f.orchestrator.get_execution(&execution_id).await.unwrap();
        assert!(execution.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn missing_procedure_requires_manual_intervention() {
        let f = fixture();
        let event = CrashEvent::new("unit-1", "search", "oom");
        let crash_id = event.id.clone();
        let outcome = f.orchestrator.handle_crash(event).await.unwrap();
        assert_eq!(outcome, CrashOutcome::ManualInterventionRequired);
        assert_eq!(
            f.crashes.get(&crash_id).await.unwrap().status,
            CrashStatus::ManualInterventionRequired
        );
        let open = f.alerts.open_alerts().await;
        assert!(open
            .iter()
            .any(|a| a.fingerprint == "recovery-manual:unit-1"));
    }
}
