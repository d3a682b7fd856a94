// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Single-fire broadcast signals that waiters of a round suspend on.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::watch;

/// A signal that fires once and wakes every party waiting on it.
///
/// Firing happens-before any waiter observing the signal, so an outcome written before
/// [`Completion::complete`] is visible to every woken waiter.
pub(crate) trait Completion: Send + Sync {
    fn new() -> Self;

    fn complete(&self);
}

/// Completion for preemptible threads, backed by a condition variable.
#[derive(Debug, Default)]
pub(crate) struct Latch {
    done: Mutex<bool>,
    cond: Condvar,
}

impl Completion for Latch {
    fn new() -> Self {
        Self::default()
    }

    fn complete(&self) {
        *self.done.lock() = true;
        self.cond.notify_all();
    }
}

impl Latch {
    /// Blocks the current thread until the latch fires.
    pub fn wait(&self) {
        let mut done = self.done.lock();
        while !*done {
            self.cond.wait(&mut done);
        }
    }

    /// Blocks until the latch fires or `timeout` elapses. Returns whether it fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.wait();
            return true;
        };

        let mut done = self.done.lock();
        while !*done {
            if self.cond.wait_until(&mut done, deadline).timed_out() {
                return *done;
            }
        }
        true
    }
}

/// Completion for cooperative tasks, backed by a `watch` channel.
///
/// Resumption of waiters is scheduled by the executor; no wake-up order is promised.
#[derive(Debug)]
pub(crate) struct Beacon {
    done: watch::Sender<bool>,
}

impl Completion for Beacon {
    fn new() -> Self {
        Self {
            done: watch::Sender::new(false),
        }
    }

    fn complete(&self) {
        self.done.send_replace(true);
    }
}

impl Beacon {
    /// Suspends the current task until the beacon fires.
    pub async fn wait(&self) {
        let mut done = self.done.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        _ = done.wait_for(|done| *done).await;
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, thread};

    use super::*;

    #[test]
    fn latch_wakes_every_waiter() {
        let latch = Arc::new(Latch::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = Arc::clone(&latch);
                thread::spawn(move || latch.wait())
            })
            .collect();

        latch.complete();

        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn latch_fired_before_wait_returns_immediately() {
        let latch = Latch::new();
        latch.complete();
        latch.wait();
        assert!(latch.wait_timeout(Duration::ZERO));
    }

    #[test]
    fn latch_timeout_expires_when_never_fired() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn latch_with_unbounded_timeout_still_wakes() {
        let latch = Arc::new(Latch::new());
        let waiter = {
            let latch = Arc::clone(&latch);
            thread::spawn(move || latch.wait_timeout(Duration::MAX))
        };

        latch.complete();
        assert!(waiter.join().unwrap());
    }

    #[tokio::test]
    async fn beacon_wakes_every_waiter() {
        let beacon = Arc::new(Beacon::new());

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let beacon = Arc::clone(&beacon);
                tokio::spawn(async move { beacon.wait().await })
            })
            .collect();

        tokio::task::yield_now().await;
        beacon.complete();

        for waiter in waiters {
            waiter.await.unwrap();
        }
    }

    #[tokio::test]
    async fn beacon_fired_before_wait_returns_immediately() {
        let beacon = Beacon::new();
        beacon.complete();
        beacon.wait().await;
    }
}
