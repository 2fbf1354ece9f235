use anyhow::Result;
use config::{Config, File, FileFormat};
use serde::Deserialize;
use vigil_notify::EmailConfig;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub eventbus: EventBusConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub correction: CorrectionConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventBusConfig {
    #[serde(default = "default_eventbus_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// 规则评估流水线参数
#[derive(Debug, Deserialize, Clone)]
pub struct EvaluationConfig {
    /// 指标样本通道容量
    #[serde(default = "default_sample_buffer")]
    pub sample_buffer: usize,
    /// 静默源扫描间隔
    #[serde(default = "default_staleness_interval")]
    pub staleness_interval_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AlertingConfig {
    /// 升级扫描间隔
    #[serde(default = "default_escalation_interval")]
    pub escalation_interval_seconds: u64,
    /// 升级历史保留条数
    #[serde(default = "default_history_max")]
    pub history_max_entries: usize,
    /// 已解决告警的清理间隔
    #[serde(default = "default_purge_interval")]
    pub purge_interval_hours: u64,
    /// 解决后保留时长
    #[serde(default = "default_purge_after")]
    pub purge_after_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotifyConfig {
    /// 单条通知的最大投递尝试数
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// 分发轮询间隔
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_seconds: u64,
    /// 单次投递尝试超时
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_seconds: u64,
    /// 配置后启用 webhook 渠道
    #[serde(default)]
    pub webhook_enabled: bool,
    /// 配置后启用邮件渠道
    #[serde(default)]
    pub email: Option<EmailConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CorrectionConfig {
    #[serde(default = "default_correction_log_max")]
    pub log_max_entries: usize,
}

/// 控制面端点: 纠正动作与恢复步骤的实际下发目标
#[derive(Debug, Deserialize, Clone)]
pub struct ControlConfig {
    #[serde(default = "default_control_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_control_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    /// 每日汇总保留天数
    #[serde(default = "default_retention_days")]
    pub retention_days: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_eventbus_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_sample_buffer() -> usize {
    1024
}

fn default_staleness_interval() -> u64 {
    60
}

fn default_escalation_interval() -> u64 {
    30
}

fn default_history_max() -> usize {
    10_000
}

fn default_purge_interval() -> u64 {
    6
}

fn default_purge_after() -> u64 {
    72
}

fn default_max_attempts() -> u32 {
    5
}

fn default_dispatch_interval() -> u64 {
    5
}

fn default_attempt_timeout() -> u64 {
    10
}

fn default_correction_log_max() -> usize {
    10_000
}

fn default_control_endpoint() -> String {
    "http://127.0.0.1:9090".to_string()
}

fn default_control_timeout() -> u64 {
    10
}

fn default_retention_days() -> usize {
    90
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            capacity: default_eventbus_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            sample_buffer: default_sample_buffer(),
            staleness_interval_seconds: default_staleness_interval(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            escalation_interval_seconds: default_escalation_interval(),
            history_max_entries: default_history_max(),
            purge_interval_hours: default_purge_interval(),
            purge_after_hours: default_purge_after(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            dispatch_interval_seconds: default_dispatch_interval(),
            attempt_timeout_seconds: default_attempt_timeout(),
            webhook_enabled: false,
            email: None,
        }
    }
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            log_max_entries: default_correction_log_max(),
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: default_control_endpoint(),
            request_timeout_seconds: default_control_timeout(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            eventbus: EventBusConfig::default(),
            logging: LoggingConfig::default(),
            evaluation: EvaluationConfig::default(),
            alerting: AlertingConfig::default(),
            notify: NotifyConfig::default(),
            correction: CorrectionConfig::default(),
            control: ControlConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl AppConfig {
    /// 从 TOML 文件加载配置, 缺省字段用默认值
    pub fn load(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).format(FileFormat::Toml))
            .build()?;
        Ok(settings.try_deserialize()?)
    }
}
