// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The coalescer for preemptible threads.

use std::{borrow::Borrow, fmt, hash::Hash, sync::Arc, time::Duration};

use serde::Serialize;

use crate::{
    Builder, Error, Stats,
    completion::Latch,
    key::{ArgsKey, KeyFn},
    registry::{Core, Role},
};

/// Runs blocking work at most once per key at a time.
///
/// Threads calling [`Coalescer::call`] with equal keys while a call is in flight do not run
/// their own work; they block until the leading thread publishes and then return the same
/// value or the same failure. Calls for different keys run fully in parallel.
///
/// `Coalescer` is a cheap handle: clones share the same registry and statistics.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, thread};
///
/// use coalescer::Coalescer;
///
/// let group: Coalescer<&str, String, std::io::Error> = Coalescer::new();
///
/// let handles: Vec<_> = (0..4)
///     .map(|_| {
///         let group = group.clone();
///         thread::spawn(move || group.call("config", || Ok("loaded".to_string())))
///     })
///     .collect();
///
/// for handle in handles {
///     assert_eq!(handle.join().unwrap().unwrap(), "loaded");
/// }
/// ```
pub struct Coalescer<K, T, E> {
    core: Arc<Core<K, T, E, Latch>>,
}

impl<K, T, E> Clone for Coalescer<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K, T, E> fmt::Debug for Coalescer<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coalescer").field("core", &self.core).finish()
    }
}

impl<K, T, E> Default for Coalescer<K, T, E>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<K, T, E> Coalescer<K, T, E>
where
    K: Hash + Eq + Clone,
{
    /// Creates a coalescer with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a builder for configuring a coalescer.
    #[must_use]
    pub fn builder() -> Builder<Self> {
        Builder::new()
    }

    pub(crate) fn from_core(core: Arc<Core<K, T, E, Latch>>) -> Self {
        Self { core }
    }

    /// Runs `work` for `key`, unless a call for `key` is already in flight, in which case this
    /// thread blocks and returns that call's outcome instead.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] carrying the shared failure if the work failed, and
    /// [`Error::Abandoned`] if the leading thread panicked before publishing.
    pub fn call<F>(&self, key: K, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Result<T, E>,
        T: Clone,
    {
        match self.core.join(key) {
            Role::Leader(leader) => leader.publish(work()),
            Role::Waiter(waiter) => {
                waiter.completion().wait();
                waiter.outcome()
            }
        }
    }

    /// Like [`Coalescer::call`], but a thread that ends up waiting gives up after `timeout`.
    ///
    /// Giving up affects only this caller: the round keeps running and every other caller still
    /// receives its outcome. A thread that leads the round is not bounded by `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the wait timed out, otherwise as [`Coalescer::call`].
    pub fn call_timeout<F>(&self, key: K, timeout: Duration, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Result<T, E>,
        T: Clone,
    {
        match self.core.join(key) {
            Role::Leader(leader) => leader.publish(work()),
            Role::Waiter(waiter) => {
                let fired = waiter.completion().wait_timeout(timeout);
                if fired { waiter.outcome() } else { Err(waiter.cancel()) }
            }
        }
    }

    /// Wraps `work` so that concurrent calls with equal arguments are coalesced.
    ///
    /// Keys are derived with [`ArgsKey::of`], named after the type of `work`. Closures get an
    /// identity of their own, so two wrapped closures never share a round.
    ///
    /// # Examples
    ///
    /// ```
    /// use coalescer::Coalescer;
    ///
    /// let group: Coalescer<String, u64, std::io::Error> = Coalescer::new();
    /// let double = group.wrap(|n: u64| Ok(n * 2));
    ///
    /// assert_eq!(double(21).unwrap(), 42);
    /// ```
    pub fn wrap<A, F>(&self, work: F) -> impl Fn(A) -> Result<T, Error<E>> + use<K, T, E, A, F>
    where
        F: Fn(A) -> Result<T, E>,
        A: Serialize,
        K: From<String>,
        T: Clone,
    {
        self.wrap_with(ArgsKey::of::<F>(), work)
    }

    /// Wraps `work`, deriving each call's key with `key_fn`.
    ///
    /// # Examples
    ///
    /// ```
    /// use coalescer::Coalescer;
    ///
    /// let group: Coalescer<String, String, std::io::Error> = Coalescer::new();
    ///
    /// // Coalesce by user id only, ignoring the request timestamp.
    /// let profile = group.wrap_with(
    ///     |args: &(u64, u64)| format!("user:{}", args.0),
    ///     |(user, _ts): (u64, u64)| Ok(format!("profile of {user}")),
    /// );
    ///
    /// assert_eq!(profile((7, 1_700_000_000)).unwrap(), "profile of 7");
    /// ```
    pub fn wrap_with<A, F, KF>(&self, key_fn: KF, work: F) -> impl Fn(A) -> Result<T, Error<E>> + use<K, T, E, A, F, KF>
    where
        F: Fn(A) -> Result<T, E>,
        KF: KeyFn<A, K>,
        T: Clone,
    {
        let this = self.clone();
        move |args: A| {
            let key = key_fn.key(&args)?;
            this.call(key, || work(args))
        }
    }

    /// Returns a snapshot of the statistics.
    #[must_use]
    pub fn stats(&self) -> Stats {
        self.core.stats()
    }

    /// Zeroes hits, misses and errors. In-flight rounds are unaffected.
    pub fn reset_stats(&self) {
        self.core.reset_stats();
    }

    /// Detaches the round for `key` from lookup. Returns `false` if there was none.
    ///
    /// The detached round keeps running, and the callers already attached to it still receive
    /// its outcome. The next call for `key` starts a new round, which may run concurrently with
    /// the detached one.
    pub fn forget<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.forget(key)
    }

    /// Detaches every round from lookup. Returns how many were detached.
    pub fn forget_all(&self) -> usize {
        self.core.forget_all()
    }

    /// Returns the number of rounds currently reachable by lookup.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.core.in_flight()
    }

    /// Returns how many callers are attached to the round for `key`, leader included.
    #[must_use]
    pub fn waiters<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.waiters(key)
    }
}
