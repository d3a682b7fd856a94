// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Hit, miss and error accounting.

use parking_lot::Mutex;
use serde::Serialize;

/// A point-in-time copy of a coalescer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Callers that received a shared outcome without running the work.
    pub hits: u64,
    /// Callers that ran the work as the leader of a round.
    pub misses: u64,
    /// Rounds whose execution failed, counted once per round.
    pub errors: u64,
    /// Rounds currently present in the registry.
    pub active: u64,
}

impl Stats {
    /// Returns `hits / (hits + misses)`, or `0.0` before any call completed.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "a ratio does not need every bit of a u64")]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Concurrent counters behind a coalescer.
///
/// All counters sit behind one lock so that [`StatsTracker::snapshot`] never observes a
/// half-applied update. `active` is a gauge owned by the registry and survives
/// [`StatsTracker::reset`].
#[derive(Debug, Default)]
pub(crate) struct StatsTracker {
    counters: Mutex<Stats>,
}

impl StatsTracker {
    pub fn record_hit(&self) {
        self.counters.lock().hits += 1;
    }

    pub fn record_miss(&self) {
        self.counters.lock().misses += 1;
    }

    pub fn record_error(&self) {
        self.counters.lock().errors += 1;
    }

    /// Called by the registry, under its lock, whenever its size changes.
    pub fn set_active(&self, active: usize) {
        self.counters.lock().active = active as u64;
    }

    pub fn snapshot(&self) -> Stats {
        *self.counters.lock()
    }

    pub fn reset(&self) {
        let mut counters = self.counters.lock();
        *counters = Stats {
            active: counters.active,
            ..Stats::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn hit_rate_is_zero_without_calls() {
        assert!(Stats::default().hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn hit_rate_matches_counters() {
        let stats = Stats {
            hits: 3,
            misses: 1,
            ..Stats::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_keeps_active_gauge() {
        let tracker = StatsTracker::default();
        tracker.record_hit();
        tracker.record_miss();
        tracker.record_error();
        tracker.set_active(2);

        tracker.reset();

        assert_eq!(
            tracker.snapshot(),
            Stats {
                active: 2,
                ..Stats::default()
            }
        );
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let tracker = Arc::new(StatsTracker::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = Arc::clone(&tracker);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        tracker.record_hit();
                        tracker.record_miss();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let stats = tracker.snapshot();
        assert_eq!(stats.hits, 8_000);
        assert_eq!(stats.misses, 8_000);
    }

    #[test]
    fn stats_serialize_with_field_names() {
        let json = serde_json::to_string(&Stats {
            hits: 1,
            misses: 2,
            errors: 3,
            active: 4,
        })
        .unwrap();
        assert_eq!(json, r#"{"hits":1,"misses":2,"errors":3,"active":4}"#);
    }
}
