use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 监控范围：被监控单元 + 可选的细分范围
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    /// 被监控单元 ID（业务实体对核心不透明）
    pub unit_id: String,

    /// 细分范围（如单元内的某个任务或通道）
    pub sub_scope: Option<String>,
}

impl Scope {
    pub fn unit(unit_id: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            sub_scope: None,
        }
    }

    pub fn with_sub_scope(mut self, sub_scope: impl Into<String>) -> Self {
        self.sub_scope = Some(sub_scope.into());
        self
    }

    /// 稳定的范围键，参与指纹计算
    pub fn key(&self) -> String {
        match &self.sub_scope {
            Some(sub) => format!("{}/{}", self.unit_id, sub),
            None => self.unit_id.clone(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// 指标采样
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    /// 被监控单元 ID
    pub unit_id: String,

    /// 指标名称
    pub metric: String,

    /// 采样值
    pub value: f64,

    /// 采样时间
    pub timestamp: DateTime<Utc>,
}

impl MetricSample {
    pub fn new(unit_id: impl Into<String>, metric: impl Into<String>, value: f64) -> Self {
        Self {
            unit_id: unit_id.into(),
            metric: metric.into(),
            value,
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_key() {
        let scope = Scope::unit("svc-A");
        assert_eq!(scope.key(), "svc-A");

        let scope = Scope::unit("svc-A").with_sub_scope("worker-3");
        assert_eq!(scope.key(), "svc-A/worker-3");
    }

    #[test]
    fn test_sample_serialization() {
        let sample = MetricSample::new("svc-A", "error_rate", 0.06);
        let json = serde_json::to_string(&sample).unwrap();
        let back: MetricSample = serde_json::from_str(&json).unwrap();
        assert_eq!(back.unit_id, "svc-A");
        assert_eq!(back.metric, "error_rate");
    }
}
