//! Gateway connection, RPC multiplexer, packet orderer, and
//! synchronization dispatcher (C1, C4, C5, C6).

/// Gateway Connection: socket lifecycle, reconnect, frame routing (C5).
pub mod connection;

/// Synchronization Dispatcher and the Terminal State listener adapter (C6, C7).
pub mod dispatcher;

/// Packet Orderer: per-account sequence reassembly (C1).
pub mod orderer;

/// RPC Multiplexer and the wire error mapper (C3, C4).
pub mod rpc;

pub use connection::GatewayConnection;
pub use dispatcher::{SynchronizationDispatcher, TerminalStateHandle};
pub use orderer::{IngestResult, OutOfOrderEvent, PacketOrderer};
pub use rpc::{RpcMultiplexer, await_with_timeout, map_processing_error};
