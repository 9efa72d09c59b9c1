//! Gateway Metrics
//!
//! Lightweight instrumentation via the `metrics` facade crate only.
//! This crate installs no recorder — a host process wires up
//! Prometheus, statsd, or whatever it prefers; `metrics`' macros are
//! no-ops until one is installed.
//!
//! # Metrics
//!
//! - `mt_gateway_packets_journaled_total` — packets written by the
//!   packet logger (labeled by packet type).
//! - `mt_gateway_packets_reordered_total` — packets buffered by the
//!   orderer pending an earlier sequence number.
//! - `mt_gateway_out_of_order_events_total` — orderer timeouts that
//!   triggered a resubscribe.
//! - `mt_gateway_rpcs_in_flight` — current pending RPC count.
//! - `mt_gateway_reconnects_total` — successful reconnects.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Register metric descriptions with whatever recorder the host
/// process installed. Calling this before a recorder is installed is
/// harmless; calling it is optional (`metrics` macros self-describe
/// lazily), but doing it once up front gives exporters like
/// Prometheus a help string immediately.
pub fn describe() {
    describe_counter!(
        "mt_gateway_packets_journaled_total",
        "Packets written to the on-disk packet journal"
    );
    describe_counter!(
        "mt_gateway_packets_reordered_total",
        "Packets buffered by the orderer pending an earlier sequence number"
    );
    describe_counter!(
        "mt_gateway_out_of_order_events_total",
        "Orderer timeouts that triggered a resubscribe"
    );
    describe_gauge!(
        "mt_gateway_rpcs_in_flight",
        "Number of RPCs currently awaiting a response"
    );
    describe_counter!("mt_gateway_reconnects_total", "Successful reconnects");
}

/// Record a packet written to the journal.
pub fn record_packet_journaled(packet_type: &'static str) {
    counter!("mt_gateway_packets_journaled_total", "type" => packet_type).increment(1);
}

/// Record a packet buffered by the orderer out of sequence.
pub fn record_packet_reordered() {
    counter!("mt_gateway_packets_reordered_total").increment(1);
}

/// Record an orderer timeout that triggered a resubscribe.
pub fn record_out_of_order_event() {
    counter!("mt_gateway_out_of_order_events_total").increment(1);
}

/// Update the current pending-RPC count.
pub fn set_rpcs_in_flight(count: f64) {
    gauge!("mt_gateway_rpcs_in_flight").set(count);
}

/// Record a successful reconnect.
pub fn record_reconnect() {
    counter!("mt_gateway_reconnects_total").increment(1);
}
