//! Session history and the immutable snapshot handed to the scorer

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use crate::token::TokenRecord;

/// Earlier launches of one creator this session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatorTrack {
    pub launches: usize,
    pub successes: usize,
}

/// What the session already knew about a record's name, symbol and
/// creator at scoring time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoringContext {
    /// Earlier tokens in the recent window with the same name
    pub name_seen: usize,
    /// Earlier tokens in the recent window with the same symbol
    pub symbol_seen: usize,
    /// Track record of the creator, excluding this mint
    pub creator: Option<CreatorTrack>,
}

#[derive(Default)]
struct HistoryInner {
    /// (mint, name key, symbol key) in arrival order
    recent: VecDeque<(String, String, String)>,
    names: HashMap<String, usize>,
    symbols: HashMap<String, usize>,
    /// creator -> mint -> reached the success market cap
    creators: HashMap<String, HashMap<String, bool>>,
    /// (creator, mint) in first-seen order, bounds `creators`
    launches: VecDeque<(String, String)>,
}

/// Rolling record of what the session has scored
pub struct SessionHistory {
    inner: Mutex<HistoryInner>,
    recent_window: usize,
    creator_window: usize,
    success_market_cap_usd: f64,
}

/// Creator launches remembered unless configured otherwise
const DEFAULT_CREATOR_WINDOW: usize = 10_000;

impl SessionHistory {
    pub fn new(recent_window: usize, success_market_cap_usd: f64) -> Self {
        Self {
            inner: Mutex::new(HistoryInner::default()),
            recent_window: recent_window.max(1),
            creator_window: DEFAULT_CREATOR_WINDOW,
            success_market_cap_usd,
        }
    }

    /// Bound the number of creator launches kept for track records
    pub fn with_creator_window(mut self, creator_window: usize) -> Self {
        self.creator_window = creator_window.max(1);
        self
    }

    /// Snapshot of the history relevant to `record`
    pub fn context_for(&self, record: &TokenRecord) -> ScoringContext {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let own = inner
            .recent
            .iter()
            .find(|(mint, _, _)| *mint == record.mint);
        let name_key = key(&record.name);
        let symbol_key = key(&record.symbol);

        // A record never counts as a duplicate of itself
        let discount = |own_key: Option<&String>, wanted: &str| {
            usize::from(own_key.is_some_and(|k| k == wanted))
        };
        let name_seen = inner
            .names
            .get(&name_key)
            .copied()
            .unwrap_or(0)
            .saturating_sub(discount(own.map(|(_, n, _)| n), &name_key));
        let symbol_seen = inner
            .symbols
            .get(&symbol_key)
            .copied()
            .unwrap_or(0)
            .saturating_sub(discount(own.map(|(_, _, s)| s), &symbol_key));

        let creator = record.creator.as_ref().and_then(|creator| {
            let mints = inner.creators.get(creator)?;
            let prior: Vec<bool> = mints
                .iter()
                .filter(|(mint, _)| **mint != record.mint)
                .map(|(_, success)| *success)
                .collect();
            (!prior.is_empty()).then(|| CreatorTrack {
                launches: prior.len(),
                successes: prior.iter().filter(|s| **s).count(),
            })
        });

        ScoringContext {
            name_seen: if record.metadata_verified { name_seen } else { 0 },
            symbol_seen: if record.metadata_verified { symbol_seen } else { 0 },
            creator,
        }
    }

    /// Add or refresh a record in the history
    pub fn record(&self, record: &TokenRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(creator) = &record.creator {
            let success = record
                .market_cap_usd
                .is_some_and(|cap| cap >= self.success_market_cap_usd);
            let mints = inner.creators.entry(creator.clone()).or_default();
            let is_new = !mints.contains_key(&record.mint);
            *mints.entry(record.mint.clone()).or_insert(false) |= success;

            if is_new {
                inner
                    .launches
                    .push_back((creator.clone(), record.mint.clone()));
                while inner.launches.len() > self.creator_window {
                    if let Some((creator, mint)) = inner.launches.pop_front() {
                        forget_launch(&mut inner.creators, &creator, &mint);
                    }
                }
            }
        }

        if !record.metadata_verified || inner.recent.iter().any(|(m, _, _)| *m == record.mint) {
            return;
        }

        let name_key = key(&record.name);
        let symbol_key = key(&record.symbol);
        *inner.names.entry(name_key.clone()).or_default() += 1;
        *inner.symbols.entry(symbol_key.clone()).or_default() += 1;
        inner
            .recent
            .push_back((record.mint.clone(), name_key, symbol_key));

        while inner.recent.len() > self.recent_window {
            if let Some((_, name, symbol)) = inner.recent.pop_front() {
                decrement(&mut inner.names, &name);
                decrement(&mut inner.symbols, &symbol);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creators with at least one remembered launch
    pub fn creator_count(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .creators
            .len()
    }
}

fn key(s: &str) -> String {
    s.trim().to_lowercase()
}

fn forget_launch(creators: &mut HashMap<String, HashMap<String, bool>>, creator: &str, mint: &str) {
    if let Some(mints) = creators.get_mut(creator) {
        mints.remove(mint);
        if mints.is_empty() {
            creators.remove(creator);
        }
    }
}

fn decrement(counts: &mut HashMap<String, usize>, key: &str) {
    if let Some(count) = counts.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(mint: &str, name: &str, symbol: &str, creator: &str) -> TokenRecord {
        let mut r = TokenRecord::new(mint, Utc::now());
        r.name = name.into();
        r.symbol = symbol.into();
        r.metadata_verified = true;
        r.creator = Some(creator.into());
        r
    }

    #[test]
    fn test_fresh_history_gives_empty_context() {
        let history = SessionHistory::new(10, 50_000.0);
        let ctx = history.context_for(&record("m1", "MoonCoin", "MOON", "c1"));
        assert_eq!(ctx, ScoringContext::default());
    }

    #[test]
    fn test_repeated_names_are_counted_case_insensitively() {
        let history = SessionHistory::new(10, 50_000.0);
        history.record(&record("m1", "MoonCoin", "MOON", "c1"));
        history.record(&record("m2", "mooncoin", "MOON", "c2"));

        let ctx = history.context_for(&record("m3", "MOONCOIN", "moon", "c3"));
        assert_eq!(ctx.name_seen, 2);
        assert_eq!(ctx.symbol_seen, 2);

        // Re-scoring an already recorded mint does not count itself
        let ctx = history.context_for(&record("m1", "MoonCoin", "MOON", "c1"));
        assert_eq!(ctx.name_seen, 1);
    }

    #[test]
    fn test_window_forgets_old_names() {
        let history = SessionHistory::new(2, 50_000.0);
        history.record(&record("m1", "Alpha", "ALP", "c"));
        history.record(&record("m2", "Beta", "BET", "c"));
        history.record(&record("m3", "Gamma", "GAM", "c"));

        assert_eq!(history.len(), 2);
        let ctx = history.context_for(&record("m4", "Alpha", "ALP", "x"));
        assert_eq!(ctx.name_seen, 0);
    }

    #[test]
    fn test_creator_track_excludes_current_mint() {
        let history = SessionHistory::new(10, 50_000.0);
        let mut winner = record("m1", "Winner", "WIN", "c1");
        winner.market_cap_usd = Some(80_000.0);
        history.record(&winner);
        history.record(&record("m2", "Loser", "LOSE", "c1"));

        let ctx = history.context_for(&record("m3", "Next", "NEXT", "c1"));
        assert_eq!(
            ctx.creator,
            Some(CreatorTrack {
                launches: 2,
                successes: 1
            })
        );

        let ctx = history.context_for(&record("m1", "Winner", "WIN", "c1"));
        assert_eq!(ctx.creator.map(|t| t.launches), Some(1));
    }

    #[test]
    fn test_success_is_sticky_across_updates() {
        let history = SessionHistory::new(10, 50_000.0);
        let mut token = record("m1", "Winner", "WIN", "c1");
        history.record(&token);
        token.market_cap_usd = Some(60_000.0);
        history.record(&token);

        let ctx = history.context_for(&record("m2", "Other", "OTH", "c1"));
        assert_eq!(ctx.creator.map(|t| t.successes), Some(1));
    }

    #[test]
    fn test_creator_window_forgets_oldest_launches() {
        let history = SessionHistory::new(10, 50_000.0).with_creator_window(2);
        let mut winner = record("m1", "Winner", "WIN", "old");
        winner.market_cap_usd = Some(80_000.0);
        history.record(&winner);
        history.record(&record("m2", "Second", "SEC", "c2"));
        assert_eq!(history.creator_count(), 2);

        // Refreshing a known launch does not take a slot
        history.record(&record("m2", "Second", "SEC", "c2"));
        history.record(&record("m3", "Third", "THI", "c2"));

        assert_eq!(history.creator_count(), 1);
        let ctx = history.context_for(&record("m4", "Next", "NEXT", "old"));
        assert_eq!(ctx.creator, None);
        let ctx = history.context_for(&record("m4", "Next", "NEXT", "c2"));
        assert_eq!(ctx.creator.map(|t| t.launches), Some(2));
    }
}
