//! Tracing Setup
//!
//! A small `tracing_subscriber` init helper for tests and downstream
//! binaries. This crate is a library, not a deployed service, so it
//! carries no OpenTelemetry OTLP exporter and no metrics HTTP
//! endpoint — those are deployment concerns for a host process, not
//! this crate's (§10).
//!
//! # Usage
//!
//! ```ignore
//! use mt_gateway::infrastructure::telemetry;
//!
//! telemetry::init();
//!
//! #[tracing::instrument]
//! fn process_packet() {
//!     tracing::info!("processing packet");
//! }
//! ```

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Initialize a `tracing` subscriber with an `EnvFilter` reading
/// `RUST_LOG`, defaulting to `info` for this crate.
///
/// Idempotent: a second call after the global subscriber is already
/// set is a no-op rather than a panic, so test modules can call it
/// freely.
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("mt_gateway=info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_on_repeat_calls() {
        init();
        init();
    }
}
