// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use opentelemetry::{
    InstrumentationScope,
    metrics::{Counter, Histogram, Meter, MeterProvider},
};

const METER_NAME: &str = "coalescer";
const VERSION: &str = "v0.1.0";
const SCHEMA_URL: &str = "https://opentelemetry.io/schemas/1.47.0";
const EVENT_COUNT_NAME: &str = "coalescer.event.count";
const EXECUTION_DURATION_NAME: &str = "coalescer.execution.duration";

pub(crate) fn create_meter(meter_provider: &dyn MeterProvider) -> Meter {
    meter_provider.meter_with_scope(
        InstrumentationScope::builder(METER_NAME)
            .with_version(VERSION)
            .with_schema_url(SCHEMA_URL)
            .build(),
    )
}

pub(crate) fn create_event_counter(meter: &Meter) -> Counter<u64> {
    meter
        .u64_counter(EVENT_COUNT_NAME)
        .with_description("Coalesced call events")
        .with_unit("{event}")
        .build()
}

pub(crate) fn create_execution_duration_histogram(meter: &Meter) -> Histogram<f64> {
    meter
        .f64_histogram(EXECUTION_DURATION_NAME)
        .with_description("Duration of leader executions")
        .with_unit("s")
        .build()
}
