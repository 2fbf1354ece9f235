pub mod alerts;
pub mod corrections;
pub mod ingest;
pub mod policies;
pub mod recovery;
pub mod rules;
pub mod stats;
pub mod subscribers;

use std::sync::Arc;
use tokio::sync::mpsc;
use vigil_alert::{AlertManager, EscalationHistoryStore, PolicyStore};
use vigil_correction::{CorrectionLogStore, CorrectionRuleStore};
use vigil_notify::{NotificationQueue, SubscriberDirectory};
use vigil_recovery::{CrashEventStore, ProcedureStore, RecoveryOrchestrator};
use vigil_rule::RuleStorage;
use vigil_stats::{ControlLoopMetrics, StatsAggregator};
use vigil_types::MetricSample;

/// 应用状态: 各管理器的共享句柄
#[derive(Clone)]
pub struct AppState {
    pub alerts: Arc<AlertManager>,
    pub history: Arc<EscalationHistoryStore>,
    pub rules: Arc<RuleStorage>,
    pub policies: Arc<PolicyStore>,
    pub subscribers: Arc<SubscriberDirectory>,
    pub queue: Arc<NotificationQueue>,
    pub correction_rules: Arc<CorrectionRuleStore>,
    pub correction_log: Arc<CorrectionLogStore>,
    pub procedures: Arc<ProcedureStore>,
    pub crashes: Arc<CrashEventStore>,
    pub orchestrator: Arc<RecoveryOrchestrator>,
    pub aggregator: Arc<StatsAggregator>,
    pub metrics: Arc<ControlLoopMetrics>,
    /// 指标样本进入评估流水线的入口
    pub samples_tx: mpsc::Sender<MetricSample>,
}
