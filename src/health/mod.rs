//! Health monitoring and recovery

pub mod alerts;
pub mod metrics;
pub mod monitor;
pub mod supervisor;

pub use alerts::{Alert, AlertLevel, AlertLog};
pub use metrics::{MetricsSnapshot, PipelineMetrics, ProcessOutcome, RollingWindow};
pub use monitor::{HealthMonitor, RecoveryAction};
pub use supervisor::{Component, ComponentState, ComponentStatus, RestartDecision, Supervisor};
