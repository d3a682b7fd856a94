// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Structured logs and OpenTelemetry metrics for coalesced calls.
//!
//! Logs are emitted through `tracing` when enabled on the builder. Metrics are recorded when
//! the `metrics` feature is on and a meter provider was supplied. Neither affects control flow.

use std::time::Duration;

#[cfg(any(feature = "metrics", test))]
use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};
use tick::{Clock, Stopwatch};

pub(crate) mod attributes;
#[cfg(any(feature = "metrics", test))]
pub(crate) mod metrics;
#[cfg(test)]
pub(crate) mod testing;

/// Something that happened to a caller or a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Activity {
    /// A leader ran the work and published a value.
    Leader,
    /// A waiter received a published outcome.
    Hit,
    /// A leader ran the work and it failed.
    Failed,
    /// A leader went away without publishing.
    Abandoned,
    /// A waiter gave up waiting.
    Cancelled,
    /// A round was detached from lookup by invalidation.
    Forgotten,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Severity {
    Debug,
    Info,
    Warn,
}

impl Activity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Leader => "coalescer.leader",
            Self::Hit => "coalescer.hit",
            Self::Failed => "coalescer.failed",
            Self::Abandoned => "coalescer.abandoned",
            Self::Cancelled => "coalescer.cancelled",
            Self::Forgotten => "coalescer.forgotten",
        }
    }

    pub fn severity(self) -> Severity {
        match self {
            Self::Leader | Self::Hit => Severity::Debug,
            Self::Cancelled | Self::Forgotten => Severity::Info,
            Self::Failed | Self::Abandoned => Severity::Warn,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Telemetry {
    name: &'static str,
    logs_enabled: bool,
    clock: Option<Clock>,
    #[cfg(any(feature = "metrics", test))]
    event_counter: Option<Counter<u64>>,
    #[cfg(any(feature = "metrics", test))]
    execution_duration: Option<Histogram<f64>>,
}

impl Telemetry {
    pub fn new(name: &'static str, logs_enabled: bool, clock: Option<Clock>) -> Self {
        Self {
            name,
            logs_enabled,
            clock,
            #[cfg(any(feature = "metrics", test))]
            event_counter: None,
            #[cfg(any(feature = "metrics", test))]
            execution_duration: None,
        }
    }

    #[cfg(test)]
    pub fn disabled() -> Self {
        Self::new("test", false, None)
    }

    #[cfg(any(feature = "metrics", test))]
    #[must_use]
    pub fn with_meter(self, meter: &Meter) -> Self {
        Self {
            event_counter: Some(metrics::create_event_counter(meter)),
            execution_duration: Some(metrics::create_execution_duration_histogram(meter)),
            ..self
        }
    }

    /// Starts timing a leader execution, if a clock was configured.
    pub fn stopwatch(&self) -> Option<Stopwatch> {
        self.clock.as_ref().map(Clock::stopwatch)
    }

    pub fn record(&self, activity: Activity, duration: Option<Duration>) {
        #[cfg(any(feature = "metrics", test))]
        self.record_metrics(activity, duration);

        if self.logs_enabled {
            Self::emit(self.name, activity, duration);
        }
    }

    #[cfg(any(feature = "metrics", test))]
    fn record_metrics(&self, activity: Activity, duration: Option<Duration>) {
        let attrs = [
            KeyValue::new(attributes::COALESCER_NAME, self.name),
            KeyValue::new(attributes::COALESCER_ACTIVITY_NAME, activity.as_str()),
        ];

        if let Some(counter) = &self.event_counter {
            counter.add(1, &attrs);
        }

        if let (Some(d), Some(h)) = (duration, &self.execution_duration) {
            h.record(d.as_secs_f64(), &attrs);
        }
    }

    fn emit(name: &'static str, activity: Activity, duration: Option<Duration>) {
        let activity_name = activity.as_str();
        let duration_ns = duration.map(|d| d.as_nanos());

        // The level of a tracing event must be a constant.
        macro_rules! emit_event {
            ($level:ident) => {
                tracing::$level!(
                    coalescer.name = name,
                    coalescer.activity = activity_name,
                    coalescer.duration_ns = ?duration_ns,
                    "coalescer.event"
                )
            };
        }

        match activity.severity() {
            Severity::Debug => emit_event!(debug),
            Severity::Info => emit_event!(info),
            Severity::Warn => emit_event!(warn),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::testing::{LogCapture, MetricTester};

    #[test]
    fn activity_as_str() {
        assert_eq!(Activity::Leader.as_str(), "coalescer.leader");
        assert_eq!(Activity::Hit.as_str(), "coalescer.hit");
        assert_eq!(Activity::Failed.as_str(), "coalescer.failed");
        assert_eq!(Activity::Abandoned.as_str(), "coalescer.abandoned");
        assert_eq!(Activity::Cancelled.as_str(), "coalescer.cancelled");
        assert_eq!(Activity::Forgotten.as_str(), "coalescer.forgotten");
    }

    #[test]
    fn failures_are_warnings() {
        assert_eq!(Activity::Failed.severity(), Severity::Warn);
        assert_eq!(Activity::Abandoned.severity(), Severity::Warn);
        assert_eq!(Activity::Forgotten.severity(), Severity::Info);
        assert_eq!(Activity::Hit.severity(), Severity::Debug);
    }

    #[test]
    fn logs_emit_contains_all_fields_and_values() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        Telemetry::emit("users", Activity::Failed, Some(Duration::from_nanos(12_345)));

        capture.assert_contains(attributes::COALESCER_NAME);
        capture.assert_contains(attributes::COALESCER_ACTIVITY_NAME);
        capture.assert_contains(attributes::COALESCER_DURATION_NAME);
        capture.assert_contains(attributes::COALESCER_EVENT_NAME);

        capture.assert_contains("users");
        capture.assert_contains(Activity::Failed.as_str());
        capture.assert_contains("12345");
        capture.assert_contains("WARN");
    }

    #[test]
    fn logs_disabled_emits_nothing() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        Telemetry::new("quiet", false, None).record(Activity::Leader, Some(Duration::from_secs(1)));

        assert!(capture.output().is_empty());
    }

    #[test]
    fn logs_enabled_records_through_subscriber() {
        let capture = LogCapture::new();
        let _guard = tracing::subscriber::set_default(capture.subscriber());

        Telemetry::new("loud", true, None).record(Activity::Forgotten, None);

        capture.assert_contains("INFO");
        capture.assert_contains("coalescer.forgotten");
    }

    #[test]
    fn metrics_record_emits_name_and_activity() {
        let tester = MetricTester::new();
        let meter = metrics::create_meter(tester.meter_provider());
        let telemetry = Telemetry::new("orders", false, None).with_meter(&meter);

        telemetry.record(Activity::Leader, Some(Duration::from_millis(5)));

        tester.assert_attributes_contain(&[
            KeyValue::new(attributes::COALESCER_NAME, "orders"),
            KeyValue::new(attributes::COALESCER_ACTIVITY_NAME, Activity::Leader.as_str()),
        ]);
    }

    #[test]
    fn stopwatch_requires_clock() {
        assert!(Telemetry::disabled().stopwatch().is_none());
        assert!(Telemetry::new("timed", false, Some(Clock::new_frozen())).stopwatch().is_some());
    }
}
