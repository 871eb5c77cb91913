pub mod cachet;
pub mod error;
pub mod identity;
pub mod retry;
pub mod synchronizer;
pub mod transition;

pub use alert_registry::{AlertEvent, AlertStatus, DEFAULT_LABEL_NAME};
