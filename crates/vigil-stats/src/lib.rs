//! 控制环统计
//!
//! 每日 / 每月只读汇总 + prometheus 运行时指标。

pub mod metrics;
pub mod scheduler;
pub mod summary;

pub use metrics::ControlLoopMetrics;
pub use scheduler::{StatsScheduler, DAILY_ROLLUP_CRON};
pub use summary::{
    AlertStats, CorrectionStats, DailySummary, MonthlySummary, NotificationStats, RecoveryStats,
    StatsAggregator, SummaryStore,
};
