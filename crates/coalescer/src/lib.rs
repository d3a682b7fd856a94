// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Request coalescing: concurrent calls that share a key run the work once and share the
//! outcome.
//!
//! When many callers ask for the same expensive thing at the same moment, only the first
//! caller for a key (the *leader*) runs the work. Callers that arrive while it runs (the
//! *waiters*) do not run anything; they wait for the leader and receive the same value, or the
//! same failure. Once the leader publishes, the round is over: the next caller for that key
//! starts a new round. Nothing is cached beyond the lifetime of a round.
//!
//! Two flavors share one registry and one protocol:
//!
//! - [`Coalescer`] for preemptible threads. Waiters block on a condition variable.
//! - [`AsyncCoalescer`] for cooperatively scheduled tasks. Waiters suspend on a watch channel.
//!
//! # When to Use
//!
//! - **Cache population**: prevent a thundering herd when a cache entry expires
//! - **Database queries**: coalesce identical queries issued simultaneously
//! - **Remote calls**: deduplicate concurrent requests for the same resource
//!
//! # Example
//!
//! ```
//! use coalescer::AsyncCoalescer;
//!
//! # async fn example() {
//! let products: AsyncCoalescer<u64, String, std::io::Error> = AsyncCoalescer::new();
//!
//! // Concurrent calls for product 42 share one database query.
//! let product = products
//!     .call(42, || async { Ok("espresso machine".to_string()) })
//!     .await;
//!
//! let stats = products.stats();
//! println!("hits: {}, misses: {}", stats.hits, stats.misses);
//! # }
//! ```
//!
//! # Keys
//!
//! Keys are supplied explicitly to `call`, or derived from the arguments of a wrapped function.
//! [`wrap`](Coalescer::wrap) hashes the function's type name and its serialized arguments with
//! [`ArgsKey`]; [`wrap_with`](Coalescer::wrap_with) takes any [`KeyFn`], such as a closure that
//! ignores some arguments, [`key::constant`] or [`key::unique`]. Derived keys are advisory: a
//! hash collision would coalesce unrelated calls.
//!
//! # Failures and Cancellation
//!
//! - A failure of the work is shared: every caller of the round receives
//!   [`Error::Execution`] wrapping the same `Arc`, and it is counted once.
//! - A leader that panics, or whose future is dropped, fails the round with
//!   [`Error::Abandoned`] so waiters are never stranded.
//! - A waiter that times out or whose future is dropped detaches itself only, and returns
//!   [`Error::Cancelled`] where there is a caller to return to. The round carries on.
//!
//! # Invalidation
//!
//! [`forget`](Coalescer::forget) and [`forget_all`](Coalescer::forget_all) detach rounds from
//! lookup. A detached round keeps running and its attached waiters still receive its outcome,
//! while the next caller for the key starts a new round concurrently with it.
//!
//! # Telemetry
//!
//! Configure instances through [`Builder`]: [`enable_logs`](Builder::enable_logs) emits
//! `tracing` events for every round activity, and with the `metrics` feature
//! `Builder::metrics` records OpenTelemetry counters and an execution duration histogram.

mod blocking;
mod builder;
mod completion;
mod cooperative;
mod error;
pub mod key;
mod registry;
mod stats;
mod telemetry;

pub use blocking::Coalescer;
pub use builder::Builder;
pub use cooperative::{AsyncCoalescer, Wrapped};
pub use error::{Error, KeyError};
pub use key::{ArgsKey, KeyFn};
pub use stats::Stats;
