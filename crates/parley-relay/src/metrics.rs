//! Relay metrics for observability.
//!
//! Uses the global OpenTelemetry meter provider. Until the host installs
//! one, every instrument is a no-op.

use opentelemetry::metrics::{Counter, Gauge, Meter};
use opentelemetry::KeyValue;
use std::sync::OnceLock;

static METER: OnceLock<Meter> = OnceLock::new();

fn meter() -> &'static Meter {
    METER.get_or_init(|| opentelemetry::global::meter("parley-relay"))
}

// ============================================================================
// Counters (Cumulative)
// ============================================================================

/// Counter for admission attempts.
pub fn admissions() -> Counter<u64> {
    meter()
        .u64_counter("relay.admissions")
        .with_description("Total connection admission attempts")
        .with_unit("attempt")
        .build()
}

/// Counter for envelopes taken off the router queue.
pub fn envelopes_routed() -> Counter<u64> {
    meter()
        .u64_counter("relay.envelopes.routed")
        .with_description("Total envelopes processed by the router")
        .with_unit("envelope")
        .build()
}

/// Counter for connections dropped for breaking the protocol.
pub fn protocol_violations() -> Counter<u64> {
    meter()
        .u64_counter("relay.protocol.violations")
        .with_description("Total connections dropped for protocol violations")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Gauges (Current State)
// ============================================================================

/// Gauge for registered connections.
pub fn connections_active() -> Gauge<i64> {
    meter()
        .i64_gauge("relay.connections.active")
        .with_description("Current number of registered connections")
        .with_unit("connection")
        .build()
}

// ============================================================================
// Metric Recording Helpers
// ============================================================================

/// Record an admission attempt and how it ended.
pub fn record_admission(result: &'static str) {
    admissions().add(1, &[KeyValue::new("result", result)]);
}

/// Record a routed envelope by outcome.
pub fn record_route(outcome: &'static str) {
    envelopes_routed().add(1, &[KeyValue::new("outcome", outcome)]);
}

/// Record a protocol violation by stage (handshake or pipeline).
pub fn record_protocol_violation(stage: &'static str) {
    protocol_violations().add(1, &[KeyValue::new("stage", stage)]);
}

/// Record the registered connection count.
pub fn record_connection_count(count: i64) {
    connections_active().record(count, &[]);
}
