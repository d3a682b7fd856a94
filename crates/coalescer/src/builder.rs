// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration for coalescer instances.

use std::{fmt, hash::Hash, marker::PhantomData, sync::Arc};

#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Meter, MeterProvider};
use tick::Clock;

use crate::{AsyncCoalescer, Coalescer, registry::Core, telemetry::Telemetry};

const DEFAULT_NAME: &str = "default";

/// Builder for [`Coalescer`] and [`AsyncCoalescer`] instances.
///
/// Created by [`Coalescer::builder`] or [`AsyncCoalescer::builder`]. Every built instance owns
/// its own registry and statistics; nothing is shared through global state.
///
/// # Examples
///
/// ```
/// use coalescer::Coalescer;
///
/// let users: Coalescer<String, String, std::io::Error> = Coalescer::builder()
///     .name("users")
///     .enable_logs()
///     .build();
/// ```
pub struct Builder<C> {
    name: &'static str,
    logs_enabled: bool,
    clock: Option<Clock>,
    #[cfg(feature = "metrics")]
    meter: Option<Meter>,
    _flavor: PhantomData<fn() -> C>,
}

impl<C> fmt::Debug for Builder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("name", &self.name)
            .field("logs_enabled", &self.logs_enabled)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<C> Builder<C> {
    pub(crate) fn new() -> Self {
        Self {
            name: DEFAULT_NAME,
            logs_enabled: false,
            clock: None,
            #[cfg(feature = "metrics")]
            meter: None,
            _flavor: PhantomData,
        }
    }

    /// Names the instance. The name is attached to every log record and metric.
    #[must_use]
    pub fn name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Emits structured logs for round activity through `tracing`.
    #[must_use]
    pub fn enable_logs(self) -> Self {
        Self {
            logs_enabled: true,
            ..self
        }
    }

    /// Times leader executions with `clock`; the durations show up in logs and metrics.
    #[must_use]
    pub fn clock(self, clock: Clock) -> Self {
        Self {
            clock: Some(clock),
            ..self
        }
    }

    /// Records OpenTelemetry metrics through `provider`.
    #[cfg(feature = "metrics")]
    #[must_use]
    pub fn metrics(self, provider: &dyn MeterProvider) -> Self {
        Self {
            meter: Some(crate::telemetry::metrics::create_meter(provider)),
            ..self
        }
    }

    fn telemetry(self) -> Telemetry {
        #[cfg(feature = "metrics")]
        if let Some(meter) = &self.meter {
            return Telemetry::new(self.name, self.logs_enabled, self.clock.clone()).with_meter(meter);
        }

        Telemetry::new(self.name, self.logs_enabled, self.clock)
    }
}

impl<K, T, E> Builder<Coalescer<K, T, E>>
where
    K: Hash + Eq + Clone,
{
    /// Builds a coalescer for preemptible threads.
    #[must_use]
    pub fn build(self) -> Coalescer<K, T, E> {
        Coalescer::from_core(Arc::new(Core::new(self.telemetry())))
    }
}

impl<K, T, E> Builder<AsyncCoalescer<K, T, E>>
where
    K: Hash + Eq + Clone,
{
    /// Builds a coalescer for cooperatively scheduled tasks.
    #[must_use]
    pub fn build(self) -> AsyncCoalescer<K, T, E> {
        AsyncCoalescer::from_core(Arc::new(Core::new(self.telemetry())))
    }
}
