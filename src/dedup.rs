//! Bounded set of recently seen transaction signatures
//!
//! Several sources report the same creation transaction. The dispatcher
//! calls [`Deduplicator::check_and_mark`] before queueing a candidate so
//! that each signature is extracted once within the window.
//!
//! When the set grows past its maximum it is cleared and reseeded with
//! the ids still in flight. Duplicates older than that can come through
//! again, which the pipeline tolerates (records merge by mint).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

#[derive(Default)]
struct DedupState {
    seen: HashSet<String>,
    in_flight: HashSet<String>,
}

pub struct Deduplicator {
    state: Mutex<DedupState>,
    max_size: usize,
    duplicates: AtomicU64,
    trims: AtomicU64,
}

impl Deduplicator {
    pub fn new(max_size: usize) -> Self {
        Self {
            state: Mutex::new(DedupState::default()),
            max_size: max_size.max(1),
            duplicates: AtomicU64::new(0),
            trims: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DedupState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check whether an id is in the window
    pub fn seen(&self, id: &str) -> bool {
        self.lock().seen.contains(id)
    }

    /// Add an id to the window
    pub fn mark(&self, id: &str) {
        let mut state = self.lock();
        self.insert(&mut state, id);
    }

    /// Atomically check and mark.
    ///
    /// Returns `true` when the id was new; it is then in flight until
    /// [`complete`](Self::complete) is called.
    pub fn check_and_mark(&self, id: &str) -> bool {
        let mut state = self.lock();
        if state.seen.contains(id) {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        state.in_flight.insert(id.to_string());
        self.insert(&mut state, id);
        true
    }

    /// End the in-flight period of an id
    pub fn complete(&self, id: &str) {
        self.lock().in_flight.remove(id);
    }

    fn insert(&self, state: &mut DedupState, id: &str) {
        state.seen.insert(id.to_string());
        if state.seen.len() > self.max_size {
            let before = state.seen.len();
            state.seen = state.in_flight.clone();
            self.trims.fetch_add(1, Ordering::Relaxed);
            debug!(
                before,
                kept = state.seen.len(),
                "Dedup window overflowed, reseeded from in-flight ids"
            );
        }
    }

    pub fn len(&self) -> usize {
        self.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    /// Duplicates rejected so far
    pub fn duplicates(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Times the window was trimmed
    pub fn trims(&self) -> u64 {
        self.trims.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_check_and_mark() {
        let dedup = Deduplicator::new(100);
        assert!(!dedup.seen("sig1"));
        assert!(dedup.check_and_mark("sig1"));
        assert!(!dedup.check_and_mark("sig1"));
        assert!(dedup.seen("sig1"));
        assert_eq!(dedup.duplicates(), 1);
    }

    #[test]
    fn test_mark_without_in_flight() {
        let dedup = Deduplicator::new(100);
        dedup.mark("sig1");
        assert!(dedup.seen("sig1"));
        assert_eq!(dedup.in_flight(), 0);
    }

    #[test]
    fn test_overflow_reseeds_from_in_flight() {
        let dedup = Deduplicator::new(3);
        assert!(dedup.check_and_mark("a"));
        assert!(dedup.check_and_mark("b"));
        dedup.complete("a");
        dedup.complete("b");
        assert!(dedup.check_and_mark("c"));
        // "d" overflows the window; only "c" and "d" are still in flight
        assert!(dedup.check_and_mark("d"));

        assert_eq!(dedup.trims(), 1);
        assert_eq!(dedup.len(), 2);
        assert!(dedup.seen("c"));
        assert!(dedup.seen("d"));
        assert!(!dedup.seen("a"));
        // Old duplicates past the window are let through again
        assert!(dedup.check_and_mark("a"));
    }

    #[test]
    fn test_concurrent_marks_admit_each_id_once() {
        let dedup = Arc::new(Deduplicator::new(10_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dedup = dedup.clone();
                std::thread::spawn(move || {
                    (0..500)
                        .filter(|i| dedup.check_and_mark(&format!("sig{}", i)))
                        .count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 500);
        assert_eq!(dedup.duplicates(), 8 * 500 - 500);
    }
}
