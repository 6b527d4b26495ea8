//! Pipeline counters and rolling windows
//!
//! Lifetime counters are plain atomics. Error rate and latency are read
//! over a rolling window so a burst of failures an hour ago does not
//! keep an alert raised.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ErrorClass;

/// Window for error rate and latency
const WINDOW: Duration = Duration::from_secs(300);
const WINDOW_MAX_SAMPLES: usize = 5000;

/// Time-bounded series of samples
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<(Instant, f64)>,
    window: Duration,
    max_samples: usize,
}

impl RollingWindow {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            window,
            max_samples,
        }
    }

    pub fn add(&mut self, value: f64) {
        self.add_at(Instant::now(), value);
    }

    fn add_at(&mut self, at: Instant, value: f64) {
        self.samples.push_back((at, value));
        self.prune(at);
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    fn prune(&mut self, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.window) else {
            return;
        };
        while self.samples.front().is_some_and(|(t, _)| *t < cutoff) {
            self.samples.pop_front();
        }
    }

    pub fn count(&self) -> usize {
        self.samples.len()
    }

    pub fn sum(&self) -> f64 {
        self.samples.iter().map(|(_, v)| v).sum()
    }

    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.sum() / self.samples.len() as f64
    }

    pub fn max(&self) -> f64 {
        self.samples.iter().map(|(_, v)| *v).fold(0.0, f64::max)
    }
}

/// Result of processing one candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// A token record was produced
    Extracted,
    /// Not a creation transaction
    Skipped,
    Failed(ErrorClass),
}

struct Windows {
    latency_ms: RollingWindow,
    /// 1.0 per failure, 0.0 per success
    failures: RollingWindow,
}

pub struct PipelineMetrics {
    started_at: Instant,
    /// Unique candidates accepted past dedup
    detected: AtomicU64,
    processed: AtomicU64,
    extracted: AtomicU64,
    skipped: AtomicU64,
    transient_errors: AtomicU64,
    structural_errors: AtomicU64,
    systemic_errors: AtomicU64,
    stale: AtomicU64,
    aggregated: AtomicU64,
    classified: AtomicU64,
    recommended: AtomicU64,
    last_detection: Mutex<Option<(Instant, DateTime<Utc>)>>,
    windows: Mutex<Windows>,
}

/// Serializable view of [`PipelineMetrics`]
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub detected: u64,
    pub processed: u64,
    pub extracted: u64,
    pub skipped: u64,
    pub errors: u64,
    pub transient_errors: u64,
    pub structural_errors: u64,
    pub systemic_errors: u64,
    pub stale: u64,
    pub aggregated: u64,
    pub classified: u64,
    pub recommended: u64,
    pub error_rate: f64,
    pub avg_processing_ms: f64,
    pub last_detection: Option<DateTime<Utc>>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            detected: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            extracted: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            transient_errors: AtomicU64::new(0),
            structural_errors: AtomicU64::new(0),
            systemic_errors: AtomicU64::new(0),
            stale: AtomicU64::new(0),
            aggregated: AtomicU64::new(0),
            classified: AtomicU64::new(0),
            recommended: AtomicU64::new(0),
            last_detection: Mutex::new(None),
            windows: Mutex::new(Windows {
                latency_ms: RollingWindow::new(WINDOW, WINDOW_MAX_SAMPLES),
                failures: RollingWindow::new(WINDOW, WINDOW_MAX_SAMPLES),
            }),
        }
    }

    fn windows(&self) -> MutexGuard<'_, Windows> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn record_detected(&self) {
        self.detected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one extraction attempt
    pub fn record_processed(&self, latency: Duration, outcome: ProcessOutcome) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        let failed = match outcome {
            ProcessOutcome::Extracted => {
                self.extracted.fetch_add(1, Ordering::Relaxed);
                *self.last_detection.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some((Instant::now(), Utc::now()));
                false
            }
            ProcessOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                false
            }
            ProcessOutcome::Failed(class) => {
                let counter = match class {
                    ErrorClass::Transient => &self.transient_errors,
                    ErrorClass::Structural => &self.structural_errors,
                    ErrorClass::Systemic => &self.systemic_errors,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                true
            }
        };

        let mut windows = self.windows();
        windows.latency_ms.add(latency.as_secs_f64() * 1000.0);
        windows.failures.add(if failed { 1.0 } else { 0.0 });
    }

    pub fn record_stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aggregated(&self, count: usize) {
        self.aggregated.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_classification(&self, classification: crate::token::Classification) {
        use crate::token::Classification;
        match classification {
            Classification::Recommended => {
                self.recommended.fetch_add(1, Ordering::Relaxed);
                self.classified.fetch_add(1, Ordering::Relaxed);
            }
            Classification::Classified => {
                self.classified.fetch_add(1, Ordering::Relaxed);
            }
            Classification::Ignored => {}
        }
    }

    pub fn detected(&self) -> u64 {
        self.detected.load(Ordering::Relaxed)
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.transient_errors.load(Ordering::Relaxed)
            + self.structural_errors.load(Ordering::Relaxed)
            + self.systemic_errors.load(Ordering::Relaxed)
    }

    /// Errors over processed candidates within the window
    pub fn error_rate(&self) -> f64 {
        self.windows().failures.average()
    }

    /// Processed candidates within the window
    pub fn window_samples(&self) -> usize {
        self.windows().failures.count()
    }

    pub fn avg_processing_ms(&self) -> f64 {
        self.windows().latency_ms.average()
    }

    /// Time since the last extracted token, or since start if none yet
    pub fn since_last_detection(&self) -> Duration {
        let last = *self.last_detection.lock().unwrap_or_else(|e| e.into_inner());
        last.map(|(at, _)| at)
            .unwrap_or(self.started_at)
            .elapsed()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let last_detection = self
            .last_detection
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|(_, at)| at);
        MetricsSnapshot {
            uptime_secs: self.started_at.elapsed().as_secs(),
            detected: self.detected(),
            processed: self.processed(),
            extracted: self.extracted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            errors: self.errors(),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            structural_errors: self.structural_errors.load(Ordering::Relaxed),
            systemic_errors: self.systemic_errors.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            aggregated: self.aggregated.load(Ordering::Relaxed),
            classified: self.classified.load(Ordering::Relaxed),
            recommended: self.recommended.load(Ordering::Relaxed),
            error_rate: self.error_rate(),
            avg_processing_ms: self.avg_processing_ms(),
            last_detection,
        }
    }
}
