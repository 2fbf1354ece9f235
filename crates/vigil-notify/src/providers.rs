use crate::adapter::{ChannelAdapter, DeliveryResult};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

// ============================================================================
// Webhook 通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// 自定义请求头
    pub headers: Vec<(String, String)>,

    /// 请求超时（秒）
    pub timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            timeout_seconds: 10,
        }
    }
}

/// Webhook 适配器；recipient 即目标 URL
pub struct WebhookAdapter {
    config: WebhookConfig,
    client: reqwest::Client,
    enabled: bool,
}

impl WebhookAdapter {
    pub fn new(config: WebhookConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_seconds))
            .build()
            .unwrap_or_default();
        Self {
            config,
            client,
            enabled: true,
        }
    }
}

#[async_trait]
impl ChannelAdapter for WebhookAdapter {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<DeliveryResult> {
        let payload = serde_json::json!({
            "subject": subject,
            "body": body,
            "source": "vigil",
        });

        let mut request = self.client.post(recipient).json(&payload);
        for (key, value) in &self.config.headers {
            request = request.header(key, value);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => Ok(DeliveryResult::success()),
            Ok(response) => Ok(DeliveryResult::failure(format!(
                "webhook returned status {}",
                response.status()
            ))),
            Err(e) => Ok(DeliveryResult::failure(format!("webhook request failed: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 邮件通知
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

/// SMTP 邮件适配器；recipient 即收件地址
pub struct EmailAdapter {
    config: EmailConfig,
    enabled: bool,
}

impl EmailAdapter {
    pub fn new(config: EmailConfig) -> Self {
        Self {
            config,
            enabled: true,
        }
    }
}

#[async_trait]
impl ChannelAdapter for EmailAdapter {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<DeliveryResult> {
        use lettre::message::header::ContentType;
        use lettre::transport::smtp::authentication::Credentials;
        use lettre::{Message, SmtpTransport, Transport};

        let email = Message::builder()
            .from(self.config.from.parse()?)
            .to(recipient.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())?;

        let creds = Credentials::new(
            self.config.username.clone(),
            self.config.password.clone(),
        );

        let mailer = SmtpTransport::relay(&self.config.smtp_host)?
            .credentials(creds)
            .port(self.config.smtp_port)
            .build();

        match mailer.send(&email) {
            Ok(response) => Ok(DeliveryResult::success_with_id(
                response.message().collect::<Vec<_>>().join(" "),
            )),
            Err(e) => Ok(DeliveryResult::failure(format!("email send failed: {}", e))),
        }
    }

    fn name(&self) -> &str {
        "email"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }
}

// ============================================================================
// 控制台通知（开发/测试用）
// ============================================================================

pub struct ConsoleAdapter;

#[async_trait]
impl ChannelAdapter for ConsoleAdapter {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<DeliveryResult> {
        info!(recipient = %recipient, subject = %subject, body = %body, "Console notification");
        Ok(DeliveryResult::success())
    }

    fn name(&self) -> &str {
        "console"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_console_adapter_always_succeeds() {
        let adapter = ConsoleAdapter;
        let result = adapter.send("operator", "subject", "body").await.unwrap();
        assert!(result.success);
    }
}
