//! 汇总任务调度
//!
//! 每天 00:05 (UTC) 对前一天做一次汇总。

use crate::summary::StatsAggregator;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// 每日汇总的 cron 表达式 (秒 分 时 日 月 星期)
pub const DAILY_ROLLUP_CRON: &str = "0 5 0 * * *";

/// 统计调度器
pub struct StatsScheduler {
    scheduler: JobScheduler,
    aggregator: Arc<StatsAggregator>,
}

impl StatsScheduler {
    pub async fn new(aggregator: Arc<StatsAggregator>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new().await?;
        Ok(Self {
            scheduler,
            aggregator,
        })
    }

    /// 注册每日汇总任务并启动调度器
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let aggregator = self.aggregator.clone();
        let job = Job::new_async(DAILY_ROLLUP_CRON, move |_uuid, _l| {
            let aggregator = aggregator.clone();
            Box::pin(async move {
                let yesterday = Utc::now().date_naive() - Duration::days(1);
                info!(date = %yesterday, "Running daily statistics rollup");
                let summary = aggregator.rollup_daily(yesterday).await;
                info!(
                    date = %yesterday,
                    alerts_created = summary.alerts.created,
                    "Daily statistics rollup finished"
                );
            })
        })?;
        if let Err(e) = self.scheduler.add(job).await {
            error!(error = %e, "Failed to register daily rollup job");
            return Err(e.into());
        }
        self.scheduler.start().await?;
        info!(cron = DAILY_ROLLUP_CRON, "Statistics scheduler started");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> anyhow::Result<()> {
        self.scheduler.shutdown().await?;
        info!("Statistics scheduler stopped");
        Ok(())
    }
}
