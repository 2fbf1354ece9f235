pub mod escalation;
pub mod history;
pub mod manager;
pub mod model;
pub mod policy;

pub use escalation::EscalationEngine;
pub use history::{EscalationHistoryEntry, EscalationHistoryStore};
pub use manager::{AlertManager, SubmitOutcome};
pub use model::{Alert, AlertError, AlertStatus, Annotation, ResolutionKind};
pub use policy::{EscalationLevel, EscalationPolicy, PolicyError, PolicyStore};
