#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! MetaApi Terminal Gateway - RPC Multiplexing and Terminal State Replication
//!
//! A client-side SDK that maintains a single WebSocket session to a
//! MetaApi terminal gateway, multiplexes RPC requests over it, and
//! replicates the remote terminal's account state (positions, orders,
//! history, prices) from an ordered stream of synchronization packets.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: Wire envelope, terminal replica, listener capability
//!   sets, and the closed error taxonomy. No I/O.
//!   - `packet`: `Request`/`InboundFrame`/`SynchronizationPacket`
//!   - `terminal`: `TerminalState` and its value types
//!   - `listener`: `SynchronizationListener`, `ReconnectListener`,
//!     `ResyncListener`
//!   - `error`: `GatewayError`
//!
//! - **Application**: The connection lifecycle service (C8).
//!   - `ports`: `GatewayPort`, the seam infrastructure implements
//!   - `services`: `Gateway` - connect/synchronize/wait/rpc_request
//!
//! - **Infrastructure**: Adapters and external integrations.
//!   - `gateway`: socket lifecycle (C5), RPC multiplexer (C4), packet
//!     orderer (C1), synchronization dispatcher (C6/C7)
//!   - `logger`: on-disk packet journal (C2)
//!   - `config`: `GatewayConfig`, `PacketLoggerConfig`
//!   - `metrics`: `metrics`-facade instrumentation
//!   - `telemetry`: `tracing` subscriber setup
//!
//! # Data Flow
//!
//! ```text
//! WebSocket  --response/processingError-->  RpcMultiplexer  --> caller
//!            --synchronization packet-->  PacketLogger
//!                                       -> PacketOrderer
//!                                       -> SynchronizationDispatcher -> TerminalState
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Domain layer - wire types, terminal replica, listeners, errors.
pub mod domain;

/// Application layer - connection lifecycle service (C8).
pub mod application;

/// Infrastructure layer - socket, journal, config, metrics, telemetry.
pub mod infrastructure;

// Domain types
pub use domain::{
    AccountInformation, Deal, GatewayError, InboundFrame, LogRecord, Order, Position, Price,
    ProcessingErrorFrame, ReconnectListener, Request, ResponseFrame, ResyncListener,
    SymbolSpecification, SynchronizationListener, SynchronizationPacket, TerminalState,
};

// Application layer
pub use application::{Gateway, GatewayPort};

// Infrastructure config
pub use infrastructure::config::{ConfigError, GatewayConfig, PacketLoggerConfig};

// Gateway connection, multiplexer, orderer, dispatcher
pub use infrastructure::gateway::{
    GatewayConnection, IngestResult, OutOfOrderEvent, PacketOrderer, RpcMultiplexer,
    SynchronizationDispatcher, TerminalStateHandle, await_with_timeout, map_processing_error,
};

// Packet logger
pub use infrastructure::logger::{PacketLogger, read_logs};

// Metrics
pub use infrastructure::metrics::describe as describe_metrics;

// Telemetry
pub use infrastructure::telemetry::init as init_telemetry;
