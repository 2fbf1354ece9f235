//! 运行时装配与后台工作器
//!
//! 把评估、告警、通知、纠正、恢复、统计各组件接成完整控制环:
//! 样本 -> 规则评估 -> 告警 -> 通知/升级, 旁路自动纠正与崩溃恢复。

use crate::config::AppConfig;
use crate::control::ControlPlaneClient;
use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use vigil_alert::{
    Alert, AlertManager, EscalationEngine, EscalationHistoryStore, PolicyStore, SubmitOutcome,
};
use vigil_api::AppState;
use vigil_core::{EventBus, SharedEventBus};
use vigil_correction::{
    ActionExecutor, CorrectionEngine, CorrectionLogStore, CorrectionOutcome, CorrectionRuleStore,
    MetricSnapshotProvider,
};
use vigil_notify::{
    ConsoleAdapter, EmailAdapter, NotificationDispatcher, NotificationQueue, NotifyChannel,
    SubscriberDirectory, WebhookAdapter, WebhookConfig,
};
use vigil_recovery::{CrashEventStore, ProcedureStore, RecoveryOrchestrator, StepExecutor};
use vigil_rule::{RuleEvaluator, RuleStorage};
use vigil_stats::{ControlLoopMetrics, StatsAggregator, StatsScheduler, SummaryStore};
use vigil_types::{topics, Message, MetricSample, Scope, Severity};

/// 装配完成的控制环运行时
pub struct Runtime {
    pub config: AppConfig,
    pub state: AppState,
    bus: SharedEventBus,
    evaluator: Arc<RuleEvaluator>,
    dispatcher: Arc<NotificationDispatcher>,
    escalation: Arc<EscalationEngine>,
    correction: Arc<CorrectionEngine>,
    samples_rx: Option<mpsc::Receiver<MetricSample>>,
    scheduler: Option<StatsScheduler>,
}

impl Runtime {
    /// 按配置装配全部组件 (不启动任何工作器)
    pub fn build(config: AppConfig) -> Result<Self> {
        let bus: SharedEventBus = Arc::new(EventBus::new(config.eventbus.capacity));

        // 通知
        let directory = Arc::new(SubscriberDirectory::new());
        let queue = Arc::new(NotificationQueue::new(
            directory.clone(),
            config.notify.max_attempts,
        ));
        let mut dispatcher = NotificationDispatcher::new(
            queue.clone(),
            directory.clone(),
            bus.clone(),
            Duration::from_secs(config.notify.attempt_timeout_seconds),
        );
        dispatcher.register_adapter(NotifyChannel::Console, Arc::new(ConsoleAdapter));
        if config.notify.webhook_enabled {
            dispatcher.register_adapter(
                NotifyChannel::Webhook,
                Arc::new(WebhookAdapter::new(WebhookConfig::default())),
            );
        }
        if let Some(email) = &config.notify.email {
            dispatcher
                .register_adapter(NotifyChannel::Email, Arc::new(EmailAdapter::new(email.clone())));
        }
        let dispatcher = Arc::new(dispatcher);

        // 告警
        let policies = Arc::new(PolicyStore::new());
        let history = Arc::new(EscalationHistoryStore::new(
            config.alerting.history_max_entries,
        ));
        let manager = Arc::new(AlertManager::new(
            queue.clone(),
            policies.clone(),
            history.clone(),
            bus.clone(),
        ));
        let escalation = Arc::new(EscalationEngine::new(
            manager.clone(),
            policies.clone(),
            queue.clone(),
            history.clone(),
        ));

        // 规则评估
        let rules = Arc::new(RuleStorage::new());
        let evaluator = Arc::new(RuleEvaluator::new(rules.clone()));

        // 控制面客户端 (纠正与恢复共用)
        let control = Arc::new(ControlPlaneClient::new(&config.control));

        // 纠正
        let correction_rules = Arc::new(CorrectionRuleStore::new());
        let correction_log = Arc::new(CorrectionLogStore::new(config.correction.log_max_entries));
        let correction = Arc::new(CorrectionEngine::new(
            correction_rules.clone(),
            correction_log.clone(),
            control.clone() as Arc<dyn ActionExecutor>,
            control.clone() as Arc<dyn MetricSnapshotProvider>,
            manager.clone(),
            bus.clone(),
        ));

        // 恢复
        let procedures = Arc::new(ProcedureStore::new());
        let crashes = Arc::new(CrashEventStore::new());
        let orchestrator = Arc::new(RecoveryOrchestrator::new(
            procedures.clone(),
            crashes.clone(),
            control.clone() as Arc<dyn StepExecutor>,
            manager.clone(),
            bus.clone(),
        ));

        // 统计
        let summaries = Arc::new(SummaryStore::new(config.stats.retention_days));
        let aggregator = Arc::new(StatsAggregator::new(
            manager.clone(),
            queue.clone(),
            correction_log.clone(),
            orchestrator.clone(),
            summaries,
        ));
        let metrics = Arc::new(ControlLoopMetrics::new()?);

        let (samples_tx, samples_rx) = mpsc::channel(config.evaluation.sample_buffer);

        let state = AppState {
            alerts: manager,
            history,
            rules,
            policies,
            subscribers: directory,
            queue,
            correction_rules,
            correction_log,
            procedures,
            crashes,
            orchestrator,
            aggregator,
            metrics,
            samples_tx,
        };

        Ok(Self {
            config,
            state,
            bus,
            evaluator,
            dispatcher,
            escalation,
            correction,
            samples_rx: Some(samples_rx),
            scheduler: None,
        })
    }

    /// 启动全部后台工作器
    pub async fn start(&mut self) -> Result<()> {
        self.escalation
            .start(self.config.alerting.escalation_interval_seconds)
            .await;

        self.spawn_sample_worker();
        self.spawn_staleness_worker();
        self.spawn_dispatch_worker();
        self.spawn_purge_worker();
        self.spawn_bus_listener();

        let mut scheduler = StatsScheduler::new(self.state.aggregator.clone()).await?;
        scheduler.start().await?;
        self.scheduler = Some(scheduler);

        info!("Control loop workers started");
        Ok(())
    }

    /// 样本工作器: 样本进入规则评估, 候选提交告警管理器
    fn spawn_sample_worker(&mut self) {
        let Some(mut rx) = self.samples_rx.take() else {
            warn!("Sample worker already started");
            return;
        };
        let evaluator = self.evaluator.clone();
        let manager = self.state.alerts.clone();
        let metrics = self.state.metrics.clone();

        tokio::spawn(async move {
            info!("Sample evaluation worker started");
            while let Some(sample) = rx.recv().await {
                let candidates = evaluator.ingest(&sample).await;
                for candidate in candidates {
                    metrics.record_candidate();
                    match manager.submit_candidate(&candidate).await {
                        SubmitOutcome::Created(alert_id) => {
                            debug!(alert_id = %alert_id, "Candidate became a new alert");
                        }
                        SubmitOutcome::Deduplicated(alert_id) => {
                            metrics.record_alert_deduplicated();
                            debug!(alert_id = %alert_id, "Candidate deduplicated");
                        }
                    }
                }
            }
            warn!("Sample channel closed, evaluation worker exiting");
        });
    }

    /// 静默源扫描: 超过 2x 窗口没有样本的 (规则, 单元) 发一条元告警
    fn spawn_staleness_worker(&self) {
        let evaluator = self.evaluator.clone();
        let manager = self.state.alerts.clone();
        let bus = self.bus.clone();
        let interval_seconds = self.config.evaluation.staleness_interval_seconds;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                for candidate in evaluator.check_staleness(Utc::now()).await {
                    bus.publish(Message::new(
                        topics::META_STALE_METRICS,
                        serde_json::json!({
                            "fingerprint": candidate.fingerprint,
                            "unit_id": candidate.scope.unit_id,
                        }),
                    ));
                    manager.submit_candidate(&candidate).await;
                }
            }
        });
    }

    /// 通知分发轮询
    fn spawn_dispatch_worker(&self) {
        let dispatcher = self.dispatcher.clone();
        let metrics = self.state.metrics.clone();
        let interval_seconds = self.config.notify.dispatch_interval_seconds;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                ticker.tick().await;
                let stats = dispatcher.process_due(Utc::now()).await;
                if stats.delivered > 0 {
                    metrics.record_notifications_delivered(stats.delivered);
                }
                if stats.delivered + stats.retried + stats.failed + stats.rescheduled > 0 {
                    debug!(
                        delivered = stats.delivered,
                        retried = stats.retried,
                        failed = stats.failed,
                        rescheduled = stats.rescheduled,
                        "Dispatch cycle finished"
                    );
                }
            }
        });
    }

    /// 已解决告警的保留期清理
    fn spawn_purge_worker(&self) {
        let manager = self.state.alerts.clone();
        let interval_hours = self.config.alerting.purge_interval_hours;
        let keep_hours = self.config.alerting.purge_after_hours;

        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(interval_hours * 3600));
            loop {
                ticker.tick().await;
                let removed = manager
                    .purge_resolved(chrono::Duration::hours(keep_hours as i64))
                    .await;
                if removed > 0 {
                    info!(removed, "Purged resolved alerts past retention");
                }
            }
        });
    }

    /// 总线监听: 自动纠正移交、元告警、指标打点
    fn spawn_bus_listener(&self) {
        let mut rx = self.bus.subscribe();
        let manager = self.state.alerts.clone();
        let correction = self.correction.clone();
        let metrics = self.state.metrics.clone();

        tokio::spawn(async move {
            info!("Bus listener started");
            loop {
                let msg = match rx.recv().await {
                    Ok(msg) => msg,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus listener lagged behind");
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        warn!("Event bus closed, listener exiting");
                        break;
                    }
                };

                match msg.topic.as_str() {
                    topics::ALERT_CREATED => {
                        if let Some(severity) = msg.payload["severity"].as_str() {
                            metrics.record_alert_created(severity);
                        }
                        metrics.set_open_alerts(manager.open_alerts().await.len());
                    }
                    topics::ALERT_RESOLVED => {
                        metrics.set_open_alerts(manager.open_alerts().await.len());
                    }
                    topics::ALERT_AUTO_CORRECT => {
                        let Some(alert_id) = msg.payload["alert_id"].as_str() else {
                            continue;
                        };
                        let Some(alert) = manager.get(alert_id).await else {
                            warn!(alert_id, "Auto-correct requested for unknown alert");
                            continue;
                        };
                        match correction.handle_alert(&alert).await {
                            Ok(CorrectionOutcome::Applied(log)) => {
                                metrics.record_correction(log.success);
                            }
                            Ok(CorrectionOutcome::Skipped(reason)) => {
                                debug!(alert_id, reason = %reason, "Correction skipped");
                            }
                            Err(e) => {
                                error!(alert_id, error = %e, "Correction engine failed");
                            }
                        }
                    }
                    topics::META_NOTIFICATION_FAILED => {
                        let channel = msg.payload["channel"].as_str().unwrap_or("unknown");
                        let subscriber = msg.payload["subscriber_id"].as_str().unwrap_or("unknown");
                        metrics.record_notification_failed(channel);
                        manager
                            .submit_alert(Alert::internal(
                                Scope::unit("notifications").with_sub_scope(subscriber),
                                Severity::Warning,
                                format!("notify-failed:{}:{}", subscriber, channel),
                                format!("Notification delivery failed on {}", channel),
                                format!(
                                    "Delivery to subscriber {} via {} exhausted all attempts: {}",
                                    subscriber,
                                    channel,
                                    msg.payload["error"].as_str().unwrap_or("unknown error")
                                ),
                            ))
                            .await;
                    }
                    _ => {}
                }
            }
        });
    }
}
