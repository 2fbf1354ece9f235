use anyhow::Result;
use async_trait::async_trait;

/// 投递结果
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub external_id: Option<String>,
    pub error: Option<String>,
}

impl DeliveryResult {
    pub fn success() -> Self {
        Self {
            success: true,
            external_id: None,
            error: None,
        }
    }

    pub fn success_with_id(external_id: impl Into<String>) -> Self {
        Self {
            success: true,
            external_id: Some(external_id.into()),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            external_id: None,
            error: Some(error.into()),
        }
    }
}

/// 渠道适配器 trait
///
/// 每个外部渠道（邮件/短信/群聊/webhook）实现一次；
/// 核心只依赖该契约，不关心渠道内部如何投递。
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// 发送一条通知
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<DeliveryResult>;

    /// 适配器名称
    fn name(&self) -> &str;

    /// 是否启用
    fn is_enabled(&self) -> bool {
        true
    }
}
