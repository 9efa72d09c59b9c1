//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the gateway's
//! wire transport, reassembly, RPC correlation, and journaling.

/// Gateway connection, RPC multiplexer, packet orderer, and
/// synchronization dispatcher (C1, C4, C5, C6).
pub mod gateway;

/// On-disk packet journal (C2).
pub mod logger;

/// Gateway configuration.
pub mod config;

/// Lightweight metrics instrumentation.
pub mod metrics;

/// Tracing setup.
pub mod telemetry;
