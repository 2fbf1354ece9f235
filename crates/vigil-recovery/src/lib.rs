//! 崩溃恢复编排
//!
//! 将崩溃事件映射到预定义的恢复流程并驱动其执行:
//! 流程选择 (精确匹配 + 生态默认兜底)、人工审批门、
//! 步骤级超时 / 重试 / 跳过 / 回退, 以及与告警生命周期的联动。

pub mod execution;
pub mod executor;
pub mod model;
pub mod orchestrator;

pub use execution::{ExecutionStatus, RecoveryExecution, StepRecord, StepResult};
pub use executor::{StepExecutor, StepOutcome};
pub use model::{
    CrashEvent, CrashEventStore, CrashStatus, OnError, ProcedureStore, RecoveryError,
    RecoveryProcedure, RecoveryStep, StepAction, StepCondition,
};
pub use orchestrator::{CrashOutcome, RecoveryOrchestrator};
