//! Gateway error taxonomy.
//!
//! Every fallible gateway operation resolves to exactly one of these
//! kinds. The wire-level mapping from a `processingError` packet's
//! `error` discriminant lives in [`crate::infrastructure::gateway::rpc`].

use std::time::Duration;

/// Closed set of error kinds a caller can observe from the gateway.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Caller input was rejected by the remote terminal.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description.
        message: String,
        /// Field-level detail, if the server supplied any.
        details: Vec<serde_json::Value>,
    },

    /// Referenced position, order, or account does not exist.
    #[error("not found: {message}")]
    NotFound {
        /// Human-readable description.
        message: String,
    },

    /// The account has not completed synchronization yet.
    #[error("account not synchronized: {message}")]
    NotSynchronized {
        /// Human-readable description.
        message: String,
    },

    /// The remote side timed out processing the request.
    #[error("remote timeout: {message}")]
    RemoteTimeout {
        /// Human-readable description.
        message: String,
    },

    /// The remote terminal is not connected to its broker.
    #[error("terminal not connected to broker: {message}")]
    NotConnected {
        /// Human-readable description.
        message: String,
    },

    /// A `trade` request was rejected by the terminal.
    #[error("trade rejected ({string_code}/{numeric_code}): {message}")]
    Trade {
        /// Human-readable description.
        message: String,
        /// MetaTrader numeric return code.
        numeric_code: i64,
        /// MetaTrader symbolic return code, e.g. `TRADE_RETCODE_REJECT`.
        string_code: String,
    },

    /// The auth token was rejected; the gateway tears itself down.
    #[error("unauthorized: {message}")]
    Unauthorized {
        /// Human-readable description.
        message: String,
    },

    /// An RPC exceeded its client-side deadline without a response.
    #[error("request '{request_type}' timed out after {timeout:?}")]
    Timeout {
        /// The request `type` that timed out, for caller diagnostics.
        request_type: String,
        /// The deadline that was exceeded.
        timeout: Duration,
    },

    /// The gateway was closed while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// Unclassified wire error.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable description.
        message: String,
    },

    /// The underlying WebSocket transport failed.
    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// A packet or response payload failed to (de)serialize.
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl GatewayError {
    /// True if this kind mandates gateway teardown per the error
    /// handling design (`Unauthorized` closes the connection).
    #[must_use]
    pub const fn requires_teardown(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}
