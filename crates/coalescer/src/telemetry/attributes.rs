// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

// Field names must match the tracing fields in `Telemetry::emit`.

#[cfg(any(feature = "metrics", test))]
pub(crate) const COALESCER_NAME: &str = "coalescer.name";

#[cfg(any(feature = "metrics", test))]
pub(crate) const COALESCER_ACTIVITY_NAME: &str = "coalescer.activity";

#[cfg(test)]
pub(crate) const COALESCER_DURATION_NAME: &str = "coalescer.duration_ns";

#[cfg(test)]
pub(crate) const COALESCER_EVENT_NAME: &str = "coalescer.event";
