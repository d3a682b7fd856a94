// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The call registry and the leader election protocol shared by both coalescer flavors.
//!
//! Every step that touches the registry happens under one short lock: looking a key up,
//! inserting a new round, publishing a round's outcome and removing it, and invalidation.
//! The unit of work never runs under that lock. The only suspension points are a waiter
//! waiting on its round's [`Completion`], which each flavor does in its own way.

use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt,
    hash::Hash,
    sync::{
        Arc, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use ahash::RandomState;
use parking_lot::Mutex;
use tick::Stopwatch;

use crate::{
    completion::Completion,
    error::{Error, Failure, Outcome},
    stats::{Stats, StatsTracker},
    telemetry::{Activity, Telemetry},
};

type Calls<K, T, E, C> = HashMap<K, Arc<CallEntry<T, E, C>>, RandomState>;

/// One round: a single execution of the unit of work for one key.
///
/// The entry outlives its registry slot for as long as a caller holds it, so waiters detached
/// from lookup by invalidation still receive the outcome.
pub(crate) struct CallEntry<T, E, C> {
    outcome: OnceLock<Outcome<T, E>>,
    completion: C,
    // Observability only, never used for control flow.
    waiters: AtomicUsize,
}

impl<T, E, C: Completion> CallEntry<T, E, C> {
    fn new() -> Self {
        Self {
            outcome: OnceLock::new(),
            completion: C::new(),
            waiters: AtomicUsize::new(1),
        }
    }
}

impl<T, E, C> fmt::Debug for CallEntry<T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallEntry")
            .field("published", &self.outcome.get().is_some())
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// State shared by every handle of one coalescer.
pub(crate) struct Core<K, T, E, C> {
    calls: Mutex<Calls<K, T, E, C>>,
    stats: StatsTracker,
    telemetry: Telemetry,
}

impl<K, T, E, C> fmt::Debug for Core<K, T, E, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Core")
            .field("in_flight", &self.calls.lock().len())
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

/// What a caller became after joining the registry.
pub(crate) enum Role<'a, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    Leader(Leader<'a, K, T, E, C>),
    Waiter(Waiter<'a, K, T, E, C>),
}

impl<K, T, E, C> Core<K, T, E, C>
where
    K: Hash + Eq + Clone,
    C: Completion,
{
    pub fn new(telemetry: Telemetry) -> Self {
        Self {
            calls: Mutex::new(HashMap::default()),
            stats: StatsTracker::default(),
            telemetry,
        }
    }

    /// Attaches to the round for `key`, starting a new one if none is in flight.
    pub fn join(&self, key: K) -> Role<'_, K, T, E, C> {
        let mut calls = self.calls.lock();

        if let Some(entry) = calls.get(&key) {
            entry.waiters.fetch_add(1, Ordering::Relaxed);
            return Role::Waiter(Waiter {
                core: self,
                entry: Arc::clone(entry),
            });
        }

        let entry = Arc::new(CallEntry::new());
        calls.insert(key.clone(), Arc::clone(&entry));
        self.stats.set_active(calls.len());
        drop(calls);

        Role::Leader(Leader {
            core: self,
            key,
            entry,
            stopwatch: self.telemetry.stopwatch(),
            published: false,
        })
    }
}

impl<K, T, E, C> Core<K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    /// Stores the outcome, wakes every waiter and retires the round, in one critical section.
    fn publish(&self, key: &K, entry: &Arc<CallEntry<T, E, C>>, outcome: Outcome<T, E>) {
        let mut calls = self.calls.lock();

        // Only the leader publishes, and only once.
        _ = entry.outcome.set(outcome);
        entry.completion.complete();

        // After invalidation the key may already belong to a newer round.
        if calls.get(key).is_some_and(|current| Arc::ptr_eq(current, entry)) {
            calls.remove(key);
            self.stats.set_active(calls.len());
        }
    }

    pub fn forget<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut calls = self.calls.lock();
        let removed = calls.remove(key).is_some();
        self.stats.set_active(calls.len());
        drop(calls);

        if removed {
            self.telemetry.record(Activity::Forgotten, None);
        }
        removed
    }

    pub fn forget_all(&self) -> usize {
        let mut calls = self.calls.lock();
        let removed = calls.len();
        calls.clear();
        self.stats.set_active(0);
        drop(calls);

        for _ in 0..removed {
            self.telemetry.record(Activity::Forgotten, None);
        }
        removed
    }

    pub fn in_flight(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn waiters<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.calls.lock().get(key).map(|entry| entry.waiters.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> Stats {
        self.stats.snapshot()
    }

    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// The caller that runs the unit of work for a round.
///
/// Dropping a leader that has not published, because its future was cancelled or its thread
/// is unwinding, fails the round with [`Error::Abandoned`] so that no waiter is stranded.
pub(crate) struct Leader<'a, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    core: &'a Core<K, T, E, C>,
    key: K,
    entry: Arc<CallEntry<T, E, C>>,
    stopwatch: Option<Stopwatch>,
    published: bool,
}

impl<K, T, E, C> Leader<'_, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    /// Shares the result of the unit of work with the round and returns the leader's copy.
    pub fn publish(mut self, result: Result<T, E>) -> Result<T, Error<E>>
    where
        T: Clone,
    {
        match result {
            Ok(value) => {
                self.finish(Ok(value.clone()));
                Ok(value)
            }
            Err(error) => {
                let error = Arc::new(error);
                self.finish(Err(Failure::Execution(Arc::clone(&error))));
                Err(Error::Execution(error))
            }
        }
    }

    fn finish(&mut self, outcome: Outcome<T, E>) {
        self.published = true;

        let activity = match &outcome {
            Ok(_) => Activity::Leader,
            Err(Failure::Execution(_)) => Activity::Failed,
            Err(Failure::Abandoned) => Activity::Abandoned,
        };

        self.core.publish(&self.key, &self.entry, outcome);
        self.entry.waiters.fetch_sub(1, Ordering::Relaxed);

        self.core.stats.record_miss();
        if activity != Activity::Leader {
            self.core.stats.record_error();
        }

        let elapsed = self.stopwatch.as_ref().map(Stopwatch::elapsed);
        self.core.telemetry.record(activity, elapsed);
    }
}

impl<K, T, E, C> Drop for Leader<'_, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    fn drop(&mut self) {
        if !self.published {
            self.finish(Err(Failure::Abandoned));
        }
    }
}

/// A caller attached to a round it does not execute.
pub(crate) struct Waiter<'a, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    core: &'a Core<K, T, E, C>,
    entry: Arc<CallEntry<T, E, C>>,
}

impl<K, T, E, C> Waiter<'_, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    /// The signal the round's leader fires once the outcome is published.
    pub fn completion(&self) -> &C {
        &self.entry.completion
    }

    /// Reads the published outcome. Call only after [`Waiter::completion`] fired.
    pub fn outcome(self) -> Result<T, Error<E>>
    where
        T: Clone,
    {
        let Some(outcome) = self.entry.outcome.get() else {
            // The completion fires strictly after the outcome is stored.
            return Err(Error::Abandoned);
        };

        self.core.stats.record_hit();
        self.core.telemetry.record(Activity::Hit, None);
        outcome.clone().map_err(Error::from)
    }

    /// Detaches this waiter without reading the outcome.
    pub fn cancel(self) -> Error<E> {
        self.core.telemetry.record(Activity::Cancelled, None);
        Error::Cancelled
    }
}

impl<K, T, E, C> Drop for Waiter<'_, K, T, E, C>
where
    K: Hash + Eq,
    C: Completion,
{
    fn drop(&mut self) {
        self.entry.waiters.fetch_sub(1, Ordering::Relaxed);
    }
}
