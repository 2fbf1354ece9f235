pub mod message;
pub mod metric;
pub mod severity;

pub use message::{topics, Message};
pub use metric::{MetricSample, Scope};
pub use severity::{ComparisonOperator, Severity};
