//! 恢复步骤执行器接口
//!
//! 编排器只负责状态机, 所有对被管单元的实际操作
//! (重启、回滚、清队列等) 由实现本接口的执行器完成。

use crate::model::{StepAction, StepCondition};
use async_trait::async_trait;
use serde_json::Value;

/// 单次步骤动作的执行结果
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub success: bool,
    /// 执行器返回的附加数据 (诊断输出等)
    pub data: Option<Value>,
    pub error: Option<String>,
}

impl StepOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn ok_with(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// 步骤执行器
///
/// `execute` 执行一个恢复动作; `check` 求值前置条件与完成校验。
/// 两者都不应自行处理超时, 超时由编排器统一控制。
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        action: &StepAction,
        config: &Value,
        unit_id: &str,
    ) -> anyhow::Result<StepOutcome>;

    async fn check(&self, condition: &StepCondition, unit_id: &str) -> anyhow::Result<bool>;
}
