//! Bounded restart bookkeeping per component
//!
//! Every restart request consumes one attempt and pushes the next allowed
//! restart further out. After `max_attempts` consecutive attempts without
//! recovery the component is parked as degraded and stays parked until an
//! explicit [`Supervisor::reset`].

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::config::HealthConfig;
use crate::source::SourceKind;

/// A restartable part of the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Source(SourceKind),
    /// All sources together, restarted when detections stop
    Sources,
    Aggregator,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Source(kind) => write!(f, "source:{}", kind),
            Component::Sources => write!(f, "sources"),
            Component::Aggregator => write!(f, "aggregator"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    Running,
    Restarting,
    Stopped,
    Degraded,
}

/// What to do with a restart request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    /// Restart after `delay`
    Restart { attempt: u32, delay: Duration },
    /// Too soon since the last attempt
    Wait(Duration),
    /// Out of attempts, newly parked on this call
    Park,
    /// Already parked
    Parked,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub component: String,
    pub state: ComponentState,
    pub restart_attempts: u32,
}

struct Entry {
    state: ComponentState,
    attempts: u32,
    backoff: ExponentialBackoff,
    not_before: Option<Instant>,
}

pub struct Supervisor {
    max_attempts: u32,
    initial: Duration,
    max: Duration,
    entries: Mutex<HashMap<Component, Entry>>,
}

impl Supervisor {
    pub fn new(config: &HealthConfig) -> Self {
        Self {
            max_attempts: config.max_restart_attempts.max(1),
            initial: Duration::from_millis(config.restart_backoff_initial_ms),
            max: Duration::from_millis(config.restart_backoff_max_ms),
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<Component, Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn new_entry(&self) -> Entry {
        Entry {
            state: ComponentState::Running,
            attempts: 0,
            backoff: ExponentialBackoff {
                current_interval: self.initial,
                initial_interval: self.initial,
                max_interval: self.max,
                max_elapsed_time: None,
                ..Default::default()
            },
            not_before: None,
        }
    }

    /// Start tracking a component as running
    pub fn register(&self, component: Component) {
        let entry = self.new_entry();
        self.entries().insert(component, entry);
    }

    pub fn state(&self, component: Component) -> Option<ComponentState> {
        self.entries().get(&component).map(|e| e.state)
    }

    /// Record an observed state; parked components stay parked
    pub fn set_state(&self, component: Component, state: ComponentState) {
        let mut entries = self.entries();
        let entry = entries.entry(component).or_insert_with(|| self.new_entry());
        if entry.state != ComponentState::Degraded {
            entry.state = state;
        }
    }

    pub fn is_degraded(&self, component: Component) -> bool {
        self.state(component) == Some(ComponentState::Degraded)
    }

    /// Decide on a restart request at `now`
    pub fn request_restart(&self, component: Component, now: Instant) -> RestartDecision {
        let mut entries = self.entries();
        let entry = entries.entry(component).or_insert_with(|| self.new_entry());

        if entry.state == ComponentState::Degraded {
            return RestartDecision::Parked;
        }
        if let Some(not_before) = entry.not_before {
            if now < not_before {
                return RestartDecision::Wait(not_before - now);
            }
        }
        if entry.attempts >= self.max_attempts {
            entry.state = ComponentState::Degraded;
            error!(
                component = %component,
                attempts = entry.attempts,
                "Component parked in degraded state"
            );
            return RestartDecision::Park;
        }

        entry.attempts += 1;
        let delay = entry.backoff.next_backoff().unwrap_or(self.max);
        entry.not_before = Some(now.checked_add(delay).unwrap_or(now));
        entry.state = ComponentState::Restarting;
        info!(
            component = %component,
            attempt = entry.attempts,
            delay_ms = delay.as_millis() as u64,
            "Scheduling restart"
        );
        RestartDecision::Restart {
            attempt: entry.attempts,
            delay,
        }
    }

    /// The component is healthy again: clear its restart history
    pub fn mark_recovered(&self, component: Component) {
        let mut entries = self.entries();
        let Some(entry) = entries.get_mut(&component) else {
            return;
        };
        if entry.state == ComponentState::Degraded || entry.attempts == 0 {
            return;
        }
        info!(component = %component, attempts = entry.attempts, "Component recovered");
        entry.state = ComponentState::Running;
        entry.attempts = 0;
        entry.backoff.reset();
        entry.not_before = None;
    }

    /// Explicit operator restart: un-park and forget attempts
    pub fn reset(&self, component: Component) {
        let entry = self.new_entry();
        self.entries().insert(component, entry);
    }

    pub fn reset_all(&self) {
        let mut entries = self.entries();
        let components: Vec<Component> = entries.keys().copied().collect();
        for component in components {
            entries.insert(component, self.new_entry());
        }
    }

    pub fn degraded(&self) -> Vec<Component> {
        self.entries()
            .iter()
            .filter(|(_, e)| e.state == ComponentState::Degraded)
            .map(|(c, _)| *c)
            .collect()
    }

    pub fn statuses(&self) -> Vec<ComponentStatus> {
        let mut statuses: Vec<ComponentStatus> = self
            .entries()
            .iter()
            .map(|(c, e)| ComponentStatus {
                component: c.to_string(),
                state: e.state,
                restart_attempts: e.attempts,
            })
            .collect();
        statuses.sort_by(|a, b| a.component.cmp(&b.component));
        statuses
    }
}
