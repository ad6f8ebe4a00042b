//! In-process fixed-window counter store.
//!
//! Used as the only limiter in single-process deployments and as the degraded
//! fallback when the shared backend is unavailable. Counts are per process:
//! across a fleet each node enforces its own copy of the quota.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::counter::{Counter, RateLimitResult};
use super::rules::{LimitTable, LimitType};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Chance that any single call sweeps expired records.
const SWEEP_PROBABILITY: f64 = 0.01;
/// Record count above which a call sweeps expired records.
const DEFAULT_CAPACITY_HINT: usize = 10_000;

/// One fixed window for one `limitType:identifier` key.
#[derive(Debug, Clone, Copy)]
struct CounterRecord {
    count: u64,
    /// Unix milliseconds at which this window closes
    reset_at: u64,
}

/// The local counter store.
///
/// Thread-safe; the check and the increment for a key happen under that key's
/// shard lock, so concurrent callers can never admit more than the quota.
pub struct LocalCounterStore {
    limits: Arc<LimitTable>,
    clock: Arc<dyn Clock>,
    records: DashMap<String, CounterRecord>,
    capacity_hint: usize,
    /// Record count that forces the next sweep; doubles the live count after each one
    sweep_threshold: AtomicUsize,
}

impl LocalCounterStore {
    /// Create a store over the given limit table using the system clock.
    pub fn new(limits: Arc<LimitTable>) -> Self {
        Self::with_clock(limits, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(limits: Arc<LimitTable>, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            records: DashMap::new(),
            capacity_hint: DEFAULT_CAPACITY_HINT,
            sweep_threshold: AtomicUsize::new(DEFAULT_CAPACITY_HINT),
        }
    }

    /// Force a sweep once more than `capacity_hint` keys are held.
    ///
    /// After a forced sweep the next one waits until the store has grown to
    /// twice the records that survived, so a store full of live keys is not
    /// rescanned on every call.
    pub fn with_capacity_hint(mut self, capacity_hint: usize) -> Self {
        self.capacity_hint = capacity_hint;
        self.sweep_threshold = AtomicUsize::new(capacity_hint);
        self
    }

    /// Count one request and decide it.
    ///
    /// A missing or expired record starts a fresh window; a full window
    /// rejects without touching the count.
    pub fn take_sync(&self, limit_type: LimitType, identifier: &str) -> RateLimitResult {
        let now = self.clock.now_millis();
        let rule = self.limits.get(limit_type);
        let key = format!("{}:{}", limit_type, identifier);

        let result = {
            let mut record = self.records.entry(key).or_insert(CounterRecord {
                count: 0,
                reset_at: 0,
            });

            let success = if now >= record.reset_at {
                *record = CounterRecord {
                    count: 1,
                    reset_at: now + rule.window_millis(),
                };
                true
            } else if record.count >= rule.requests {
                false
            } else {
                record.count += 1;
                true
            };

            if !success {
                debug!(
                    limit_type = %limit_type,
                    identifier = %identifier,
                    "Local rate limit exceeded"
                );
            }

            RateLimitResult::new(
                success,
                rule.requests,
                rule.requests.saturating_sub(record.count),
                record.reset_at,
                false,
            )
        };

        trace!(
            limit_type = %limit_type,
            identifier = %identifier,
            remaining = result.remaining,
            "Local rate limit checked"
        );

        self.maybe_sweep(now);
        result
    }

    /// Drop expired records, occasionally or when over the sweep threshold.
    ///
    /// Must not be called while an entry guard is held.
    fn maybe_sweep(&self, now: u64) {
        let threshold = self.sweep_threshold.load(Ordering::Relaxed);
        if self.records.len() > threshold {
            let live = self.sweep(now);
            let next = live.saturating_mul(2).max(self.capacity_hint);
            self.sweep_threshold.store(next, Ordering::Relaxed);
            debug!(live, next_sweep_at = next, "Counter store over capacity, swept");
        } else if rand::thread_rng().gen_bool(SWEEP_PROBABILITY) {
            self.sweep(now);
        }
    }

    /// Remove expired records and return how many remain.
    fn sweep(&self, now: u64) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| record.reset_at > now);
        let after = self.records.len();
        trace!(removed = before.saturating_sub(after), "Swept expired counters");
        after
    }

    /// Record count that will force the next sweep.
    fn sweep_threshold(&self) -> usize {
        self.sweep_threshold.load(Ordering::Relaxed)
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether no keys are held.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}

#[async_trait]
impl Counter for LocalCounterStore {
    async fn take(&self, limit_type: LimitType, identifier: &str) -> Result<RateLimitResult> {
        Ok(self.take_sync(limit_type, identifier))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::time::Duration;

    const START: u64 = 1_700_000_000_000;

    fn store() -> (LocalCounterStore, ManualClock) {
        let clock = ManualClock::new(START);
        let store = LocalCounterStore::with_clock(
            Arc::new(LimitTable::default()),
            Arc::new(clock.clone()),
        );
        (store, clock)
    }

    #[test]
    fn test_upload_scenario() {
        let (store, clock) = store();

        for expected_remaining in (0..10).rev() {
            let result = store.take_sync(LimitType::Upload, "X");
            assert!(result.success);
            assert_eq!(result.remaining, expected_remaining);
            assert_eq!(result.limit, 10);
            assert!(!result.is_distributed);
        }

        let rejected = store.take_sync(LimitType::Upload, "X");
        assert!(!rejected.success);
        assert_eq!(rejected.remaining, 0);

        clock.advance(Duration::from_secs(61));
        let result = store.take_sync(LimitType::Upload, "X");
        assert!(result.success);
        assert_eq!(result.remaining, 9);
    }

    #[test]
    fn test_quota_boundary_for_every_limit_type() {
        let (store, _clock) = store();
        let table = LimitTable::default();

        for limit_type in LimitType::ALL {
            let requests = table.get(limit_type).requests;
            let mut last = None;
            for _ in 0..requests {
                last = Some(store.take_sync(limit_type, "boundary"));
            }
            let nth = last.unwrap();
            assert!(nth.success, "{}", limit_type);
            assert_eq!(nth.remaining, 0);

            let over = store.take_sync(limit_type, "boundary");
            assert!(!over.success, "{}", limit_type);
            assert_eq!(over.remaining, 0);
            assert_eq!(over.reset, nth.reset);
        }
    }

    #[test]
    fn test_reset_is_window_end() {
        let (store, clock) = store();

        let first = store.take_sync(LimitType::Render, "a");
        assert_eq!(first.reset, (START + 60_000) / 1000);

        clock.advance(Duration::from_secs(30));
        let second = store.take_sync(LimitType::Render, "a");
        assert_eq!(second.reset, first.reset);
        assert!(second.reset * 1000 >= clock.now_millis());
    }

    #[test]
    fn test_identifiers_are_isolated() {
        let (store, _clock) = store();

        for _ in 0..10 {
            store.take_sync(LimitType::Upload, "a");
        }
        assert!(!store.take_sync(LimitType::Upload, "a").success);

        let other = store.take_sync(LimitType::Upload, "b");
        assert!(other.success);
        assert_eq!(other.remaining, 9);
    }

    #[test]
    fn test_limit_types_are_isolated() {
        let (store, _clock) = store();

        store.take_sync(LimitType::Upload, "a");
        store.take_sync(LimitType::Upload, "a");
        let booking = store.take_sync(LimitType::Booking, "a");
        let upload = store.take_sync(LimitType::Upload, "a");

        assert_eq!(booking.remaining, 29);
        assert_eq!(upload.remaining, 7);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_rejection_does_not_extend_window() {
        let (store, clock) = store();

        for _ in 0..10 {
            store.take_sync(LimitType::Upload, "a");
        }
        clock.advance(Duration::from_secs(59));
        let rejected = store.take_sync(LimitType::Upload, "a");
        assert!(!rejected.success);

        clock.advance(Duration::from_secs(1));
        assert!(store.take_sync(LimitType::Upload, "a").success);
    }

    #[test]
    fn test_reset_rounds_up_at_sub_second_start() {
        let clock = ManualClock::new(START + 250);
        let store = LocalCounterStore::with_clock(
            Arc::new(LimitTable::default()),
            Arc::new(clock.clone()),
        );

        for _ in 0..10 {
            store.take_sync(LimitType::Upload, "a");
        }
        clock.set(START + 20_100);
        let rejected = store.take_sync(LimitType::Upload, "a");

        assert!(!rejected.success);
        assert_eq!(rejected.reset, (START + 60_000) / 1000 + 1);
        assert!(rejected.reset * 1000 >= clock.now_millis());
        assert_eq!(rejected.retry_after_secs(clock.now_millis()), 41);

        clock.advance(Duration::from_secs(41));
        assert!(store.take_sync(LimitType::Upload, "a").success);
    }

    #[test]
    fn test_live_records_over_capacity_back_off_sweeping() {
        let (store, _clock) = store();
        let store = store.with_capacity_hint(2);

        for id in ["a", "b", "c"] {
            store.take_sync(LimitType::Default, id);
        }
        assert_eq!(store.sweep_threshold(), 6);

        for id in ["d", "e", "f"] {
            store.take_sync(LimitType::Default, id);
            assert_eq!(store.sweep_threshold(), 6);
        }
        assert_eq!(store.len(), 6);

        store.take_sync(LimitType::Default, "g");
        assert_eq!(store.sweep_threshold(), 14);
        assert_eq!(store.len(), 7);
    }

    #[test]
    fn test_expired_records_are_swept_over_capacity() {
        let (store, clock) = store();
        let store = store.with_capacity_hint(2);

        for id in ["a", "b", "c"] {
            store.take_sync(LimitType::Default, id);
        }
        clock.advance(Duration::from_secs(120));
        for id in ["d", "e", "f", "g"] {
            store.take_sync(LimitType::Default, id);
        }

        assert_eq!(store.len(), 4);
        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_takes_never_exceed_quota() {
        let (store, _clock) = store();
        let store = Arc::new(store);

        let successes: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let store = Arc::clone(&store);
                    s.spawn(move || {
                        (0..25)
                            .filter(|_| store.take_sync(LimitType::Upload, "shared").success)
                            .count()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(successes, 10);
    }

    #[test]
    fn test_counter_trait_never_errors() {
        let (store, _clock) = store();
        let result = tokio_test::block_on(Counter::take(&store, LimitType::Default, "a")).unwrap();
        assert!(result.success);
        assert_eq!(result.remaining, 99);
    }
}
