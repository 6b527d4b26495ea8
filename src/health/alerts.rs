//! Leveled alerts with bounded history

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{error, info, warn};

/// An identical alert for the same component is not repeated within this
const REPEAT_QUIET: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Info => write!(f, "info"),
            AlertLevel::Warning => write!(f, "warning"),
            AlertLevel::Error => write!(f, "error"),
            AlertLevel::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: String,
    pub level: AlertLevel,
    /// Component the alert is about, e.g. `rpc_pool` or `source:polling`
    pub component: String,
    pub message: String,
    pub raised_at: DateTime<Utc>,
}

pub struct AlertLog {
    history: Mutex<VecDeque<Alert>>,
    capacity: usize,
}

impl AlertLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    fn history(&self) -> MutexGuard<'_, VecDeque<Alert>> {
        self.history.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Raise an alert and log it at the matching level.
    ///
    /// Returns `None` when the same alert was raised moments ago.
    pub fn raise(
        &self,
        level: AlertLevel,
        component: impl Into<String>,
        message: impl Into<String>,
    ) -> Option<Alert> {
        let component = component.into();
        let message = message.into();
        let now = Utc::now();

        let mut history = self.history();
        let repeated = history
            .iter()
            .rev()
            .find(|a| a.component == component)
            .is_some_and(|last| {
                last.level == level
                    && last.message == message
                    && (now - last.raised_at).to_std().unwrap_or_default() < REPEAT_QUIET
            });
        if repeated {
            return None;
        }

        match level {
            AlertLevel::Info => info!(component = %component, "{}", message),
            AlertLevel::Warning => warn!(component = %component, "{}", message),
            AlertLevel::Error => error!(component = %component, "{}", message),
            AlertLevel::Critical => error!(component = %component, critical = true, "{}", message),
        }

        let alert = Alert {
            id: uuid::Uuid::new_v4().to_string(),
            level,
            component,
            message,
            raised_at: now,
        };
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(alert.clone());
        Some(alert)
    }

    /// Alerts oldest first
    pub fn recent(&self) -> Vec<Alert> {
        self.history().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history().is_empty()
    }

    /// Alerts at or above `level`
    pub fn count_at_least(&self, level: AlertLevel) -> usize {
        self.history().iter().filter(|a| a.level >= level).count()
    }

    pub fn clear(&self) {
        self.history().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let log = AlertLog::new(3);
        for i in 0..5 {
            log.raise(AlertLevel::Warning, format!("c{}", i), "slow");
        }
        let recent = log.recent();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].component, "c2");
        assert_eq!(recent[2].component, "c4");
    }

    #[test]
    fn test_repeats_are_suppressed() {
        let log = AlertLog::new(10);
        assert!(log.raise(AlertLevel::Critical, "rpc_pool", "all down").is_some());
        assert!(log.raise(AlertLevel::Critical, "rpc_pool", "all down").is_none());
        // A different level or message is a new alert
        assert!(log.raise(AlertLevel::Error, "rpc_pool", "all down").is_some());
        assert!(log.raise(AlertLevel::Critical, "providers", "all down").is_some());
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_levels_are_ordered() {
        let log = AlertLog::new(10);
        log.raise(AlertLevel::Info, "a", "x");
        log.raise(AlertLevel::Error, "b", "x");
        log.raise(AlertLevel::Critical, "c", "x");
        assert_eq!(log.count_at_least(AlertLevel::Error), 2);
        assert_eq!(log.count_at_least(AlertLevel::Critical), 1);
        assert!(AlertLevel::Warning < AlertLevel::Error);
    }

    #[test]
    fn test_ids_are_unique() {
        let log = AlertLog::new(10);
        let a = log.raise(AlertLevel::Info, "a", "one").unwrap();
        let b = log.raise(AlertLevel::Info, "a", "two").unwrap();
        assert_ne!(a.id, b.id);
    }
}
