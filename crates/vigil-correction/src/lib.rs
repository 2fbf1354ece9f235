pub mod engine;
pub mod log;
pub mod model;

pub use engine::{
    ActionExecutor, ActionOutcome, CorrectionEngine, CorrectionOutcome, CostQualitySnapshot,
    MetricSnapshotProvider,
};
pub use log::{CorrectionLog, CorrectionLogStore};
pub use model::{CorrectionAction, CorrectionError, CorrectionRule, CorrectionRuleStore};
