//! 控制面客户端
//!
//! 纠正动作与恢复步骤最终都要作用到被管单元上;
//! 本模块把这些操作统一下发到配置的控制面 HTTP 端点。

use crate::config::ControlConfig;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};
use vigil_correction::{ActionExecutor, ActionOutcome, CorrectionAction, CostQualitySnapshot,
    MetricSnapshotProvider};
use vigil_recovery::{StepAction, StepCondition, StepExecutor, StepOutcome};

pub struct ControlPlaneClient {
    base: String,
    client: reqwest::Client,
}

impl ControlPlaneClient {
    pub fn new(config: &ControlConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            base: config.endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let payload: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(anyhow!(
                "control plane returned {} for {}: {}",
                status,
                url,
                payload
            ));
        }
        Ok(payload)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        let url = format!("{}{}", self.base, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!("control plane returned {} for {}", status, url));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl ActionExecutor for ControlPlaneClient {
    async fn apply(&self, action: &CorrectionAction, unit_id: &str) -> Result<ActionOutcome> {
        info!(unit_id = %unit_id, action = action.kind(), "Dispatching correction action");
        let body = json!({ "action": action });
        match self.post(&format!("/units/{}/actions", unit_id), &body).await {
            Ok(detail) => Ok(ActionOutcome {
                success: true,
                detail: Some(detail),
                error: None,
            }),
            Err(e) => Ok(ActionOutcome::failure(e.to_string())),
        }
    }
}

#[async_trait]
impl MetricSnapshotProvider for ControlPlaneClient {
    async fn snapshot(&self, unit_id: &str) -> Result<CostQualitySnapshot> {
        let payload = self.get(&format!("/units/{}/snapshot", unit_id)).await?;
        let cost = payload
            .get("cost")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("snapshot for {} is missing 'cost'", unit_id))?;
        let quality = payload
            .get("quality")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("snapshot for {} is missing 'quality'", unit_id))?;
        Ok(CostQualitySnapshot { cost, quality })
    }
}

#[async_trait]
impl StepExecutor for ControlPlaneClient {
    async fn execute(
        &self,
        action: &StepAction,
        config: &Value,
        unit_id: &str,
    ) -> Result<StepOutcome> {
        // 等待类步骤在本地完成, 其余下发控制面
        if let StepAction::WaitForStable { seconds } = action {
            debug!(unit_id = %unit_id, seconds, "Waiting for unit to stabilise");
            tokio::time::sleep(Duration::from_secs(*seconds)).await;
            return Ok(StepOutcome::ok());
        }

        info!(unit_id = %unit_id, action = action.kind(), "Dispatching recovery step");
        let body = json!({ "action": action, "config": config });
        match self.post(&format!("/units/{}/recovery", unit_id), &body).await {
            Ok(detail) => Ok(StepOutcome::ok_with(detail)),
            Err(e) => Ok(StepOutcome::failed(e.to_string())),
        }
    }

    async fn check(&self, condition: &StepCondition, unit_id: &str) -> Result<bool> {
        match condition {
            StepCondition::Always => Ok(true),
            StepCondition::UnitHealthy => {
                Ok(self.get(&format!("/units/{}/health", unit_id)).await.is_ok())
            }
            StepCondition::QueueEmpty => {
                let payload = self.get(&format!("/units/{}/queue", unit_id)).await?;
                Ok(payload.get("depth").and_then(Value::as_u64) == Some(0))
            }
            StepCondition::MetricBelow { metric, value } => {
                let current = self.metric_value(unit_id, metric).await?;
                Ok(current < *value)
            }
            StepCondition::MetricAbove { metric, value } => {
                let current = self.metric_value(unit_id, metric).await?;
                Ok(current > *value)
            }
        }
    }
}

impl ControlPlaneClient {
    async fn metric_value(&self, unit_id: &str, metric: &str) -> Result<f64> {
        let payload = self
            .get(&format!("/units/{}/metrics/{}", unit_id, metric))
            .await?;
        payload
            .get("value")
            .and_then(Value::as_f64)
            .ok_or_else(|| anyhow!("metric {} for {} has no value", metric, unit_id))
    }
}
