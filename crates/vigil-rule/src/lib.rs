pub mod candidate;
pub mod evaluator;
pub mod model;
pub mod storage;

pub use candidate::AlertCandidate;
pub use evaluator::RuleEvaluator;
pub use model::{AlertRule, RuleError, RuleMetadata};
pub use storage::RuleStorage;
