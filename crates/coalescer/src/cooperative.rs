// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The coalescer for cooperatively scheduled tasks.

use std::{borrow::Borrow, fmt, hash::Hash, sync::Arc, time::Duration};

use tick::{Clock, FutureExt as _};

use crate::{
    Builder, Error, Stats,
    completion::Beacon,
    key::{ArgsKey, KeyFn},
    registry::{Core, Role},
};

/// Runs async work at most once per key at a time.
///
/// Tasks awaiting [`AsyncCoalescer::call`] with equal keys while a call is in flight do not
/// poll their own work; they suspend until the leading task publishes and then resolve to the
/// same value or the same failure. Works on any executor, single-threaded or not.
///
/// A task joins a round the first time its `call` future is polled. Dropping a waiting future
/// detaches that task only. Dropping the leading future fails the round with
/// [`Error::Abandoned`] for every attached task.
///
/// # Examples
///
/// ```
/// use coalescer::AsyncCoalescer;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let group: AsyncCoalescer<&str, String, std::io::Error> = AsyncCoalescer::new();
///
/// let (a, b) = tokio::join!(
///     group.call("config", || async {
///         tokio::task::yield_now().await;
///         Ok("loaded".to_string())
///     }),
///     group.call("config", || async { Ok("loaded again".to_string()) }),
/// );
///
/// assert_eq!(a.unwrap(), "loaded");
/// assert_eq!(b.unwrap(), "loaded");
/// # }
/// ```
pub struct AsyncCoalescer<K, T, E> {
    core: Arc<Core<K, T, E, Beacon>>,
}

impl<K, T, E> Clone for AsyncCoalescer<K, T, E> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<K, T, E> fmt::Debug for AsyncCoalescer<K, T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCoalescer").field("core", &self.core).finish()
    }
}

impl<K, T, E> Default for AsyncCoalescer<K, T, E>
where
    K: Hash + Eq + Clone,
{
    fn default() -> Self {
        Self::builder().build()
    }
}

impl<K, T, E> AsyncCoalescer<K, T, E>
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

    pub(crate) fn from_core(core: Arc<Core<K, T, E, Beacon>>) -> Self {
        Self { core }
    }

    /// Runs the future produced by `work` for `key`, unless a call for `key` is already in
    /// flight, in which case this task waits for that call's outcome instead.
    ///
    /// `work` is only invoked by the leading task.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Execution`] carrying the shared failure if the work failed, and
    /// [`Error::Abandoned`] if the leading future was dropped or panicked before publishing.
    pub async fn call<F, Fut>(&self, key: K, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Clone,
    {
        match self.core.join(key) {
            Role::Leader(leader) => leader.publish(work().await),
            Role::Waiter(waiter) => {
                waiter.completion().wait().await;
                waiter.outcome()
            }
        }
    }

    /// Like [`AsyncCoalescer::call`], but a task that ends up waiting gives up after `timeout`
    /// as measured by `clock`.
    ///
    /// Giving up affects only this task. A task that leads the round is not bounded by
    /// `timeout`; wrap the whole call in a timeout to bound it, which abandons the round.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the wait timed out, otherwise as [`AsyncCoalescer::call`].
    pub async fn call_timeout<F, Fut>(&self, key: K, timeout: Duration, clock: &Clock, work: F) -> Result<T, Error<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        T: Clone,
    {
        match self.core.join(key) {
            Role::Leader(leader) => leader.publish(work().await),
            Role::Waiter(waiter) => {
                let fired = waiter.completion().wait().timeout(clock, timeout).await.is_ok();
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
    /// use coalescer::AsyncCoalescer;
    ///
    /// # #[tokio::main(flavor = "current_thread")]
    /// # async fn main() {
    /// let group: AsyncCoalescer<String, u64, std::io::Error> = AsyncCoalescer::new();
    /// let double = group.wrap(|n: u64| async move { Ok(n * 2) });
    ///
    /// assert_eq!(double.call(21).await.unwrap(), 42);
    /// # }
    /// ```
    #[must_use]
    pub fn wrap<F>(&self, work: F) -> Wrapped<K, T, E, F, ArgsKey> {
        self.wrap_with(ArgsKey::of::<F>(), work)
    }

    /// Wraps `work`, deriving each call's key with `key_fn`.
    #[must_use]
    pub fn wrap_with<F, KF>(&self, key_fn: KF, work: F) -> Wrapped<K, T, E, F, KF> {
        Wrapped {
            coalescer: self.clone(),
            key_fn,
            work,
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
    /// See [`Coalescer::forget`](crate::Coalescer::forget).
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

    /// Returns how many tasks are attached to the round for `key`, leader included.
    #[must_use]
    pub fn waiters<Q>(&self, key: &Q) -> Option<usize>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.core.waiters(key)
    }
}

/// An async function whose concurrent calls are coalesced.
///
/// Created by [`AsyncCoalescer::wrap`] and [`AsyncCoalescer::wrap_with`].
pub struct Wrapped<K, T, E, F, KF> {
    coalescer: AsyncCoalescer<K, T, E>,
    key_fn: KF,
    work: F,
}

impl<K, T, E, F, KF> Clone for Wrapped<K, T, E, F, KF>
where
    F: Clone,
    KF: Clone,
{
    fn clone(&self) -> Self {
        Self {
            coalescer: self.coalescer.clone(),
            key_fn: self.key_fn.clone(),
            work: self.work.clone(),
        }
    }
}

impl<K, T, E, F, KF> fmt::Debug for Wrapped<K, T, E, F, KF> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("coalescer", &self.coalescer)
            .finish_non_exhaustive()
    }
}

impl<K, T, E, F, KF> Wrapped<K, T, E, F, KF>
where
    K: Hash + Eq + Clone,
{
    /// Calls the wrapped function with `args`, coalescing with concurrent calls whose
    /// arguments map to the same key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Key`] if no key could be derived from `args`, in which case the
    /// function is not called; otherwise as [`AsyncCoalescer::call`].
    pub async fn call<A, Fut>(&self, args: A) -> Result<T, Error<E>>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        KF: KeyFn<A, K>,
        T: Clone,
    {
        let key = self.key_fn.key(&args)?;
        self.coalescer.call(key, || (self.work)(args)).await
    }

    /// The coalescer the calls go through.
    #[must_use]
    pub fn coalescer(&self) -> &AsyncCoalescer<K, T, E> {
        &self.coalescer
    }
}
