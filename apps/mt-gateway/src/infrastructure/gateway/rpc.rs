//! RPC Multiplexer (C4).
//!
//! Correlates outbound requests with inbound `response`/
//! `processingError` frames by `requestId`, and enforces a per-request
//! deadline (§4.4).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::domain::error::GatewayError;
use crate::domain::packet::{ProcessingErrorFrame, ResponseFrame};

/// Maps a wire `processingError` discriminant to the closed taxonomy
/// (C3, §4.3).
#[must_use]
pub fn map_processing_error(frame: &ProcessingErrorFrame) -> GatewayError {
    match frame.error.as_str() {
        "ValidationError" => GatewayError::Validation {
            message: frame.message.clone(),
            details: frame.details.clone(),
        },
        "NotFoundError" => GatewayError::NotFound {
            message: frame.message.clone(),
        },
        "NotSynchronizedError" => GatewayError::NotSynchronized {
            message: frame.message.clone(),
        },
        "TimeoutError" => GatewayError::RemoteTimeout {
            message: frame.message.clone(),
        },
        "NotAuthenticatedError" => GatewayError::NotConnected {
            message: frame.message.clone(),
        },
        "TradeError" => GatewayError::Trade {
            message: frame.message.clone(),
            numeric_code: frame.numeric_code.unwrap_or_default(),
            string_code: frame.string_code.clone().unwrap_or_default(),
        },
        "UnauthorizedError" => GatewayError::Unauthorized {
            message: frame.message.clone(),
        },
        _ => GatewayError::Internal {
            message: frame.message.clone(),
        },
    }
}

type PendingSender = oneshot::Sender<Result<serde_json::Value, GatewayError>>;

/// Outstanding request/response correlation table.
///
/// Cheaply cloneable; every clone shares the same pending-request map
/// so RPCs can be awaited from any caller context while responses
/// arrive on the single read-loop task (§5).
#[derive(Clone, Default)]
pub struct RpcMultiplexer {
    pending: Arc<Mutex<HashMap<String, PendingSender>>>,
}

impl RpcMultiplexer {
    /// An empty multiplexer with no outstanding requests.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `request_id` as awaiting a response, returning the
    /// receiving half of its resolution channel.
    pub fn register(&self, request_id: String) -> oneshot::Receiver<Result<serde_json::Value, GatewayError>> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(request_id, tx);
        rx
    }

    /// Number of RPCs currently awaiting a response.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.pending.lock().len()
    }

    /// Resolve a pending request with its `response` frame payload.
    pub fn resolve(&self, frame: ResponseFrame) {
        if let Some(tx) = self.pending.lock().remove(&frame.request_id) {
            let _ = tx.send(Ok(frame.response));
        }
    }

    /// Reject a pending request with its mapped `processingError`.
    pub fn reject(&self, frame: &ProcessingErrorFrame) {
        if let Some(tx) = self.pending.lock().remove(&frame.request_id) {
            let _ = tx.send(Err(map_processing_error(frame)));
        }
    }

    /// Reject every outstanding request with [`GatewayError::ConnectionClosed`]
    /// (§4.5 Close, §7, §8 property 4).
    pub fn reject_all_closed(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(GatewayError::ConnectionClosed));
        }
    }

    /// Reject every outstanding request with
    /// [`GatewayError::NotConnected`], e.g. when the socket drops and
    /// a reconnect attempt begins. Distinct from
    /// [`Self::reject_all_closed`]: the gateway isn't torn down, so a
    /// caller may legitimately retry.
    pub fn reject_all_disconnected(&self) {
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(GatewayError::NotConnected {
                message: "socket disconnected while the request was outstanding".to_string(),
            }));
        }
    }

    /// Drop a request's registration without resolving it, e.g. after
    /// its deadline has already fired and the caller stopped waiting.
    pub fn forget(&self, request_id: &str) {
        self.pending.lock().remove(request_id);
    }
}

/// Await `rx` until it resolves or `timeout` elapses, mapping elapsed
/// time to [`GatewayError::Timeout`] naming `request_type` (§4.4, §8
/// scenario S6).
pub async fn await_with_timeout(
    multiplexer: &RpcMultiplexer,
    request_id: &str,
    request_type: &str,
    timeout: Duration,
    rx: oneshot::Receiver<Result<serde_json::Value, GatewayError>>,
) -> Result<serde_json::Value, GatewayError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
        Err(_) => {
            multiplexer.forget(request_id);
            Err(GatewayError::Timeout {
                request_type: request_type.to_string(),
                timeout,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn error_frame(error: &str) -> ProcessingErrorFrame {
        ProcessingErrorFrame {
            request_id: "r1".to_string(),
            error: error.to_string(),
            message: "boom".to_string(),
            details: vec![],
            numeric_code: Some(10004),
            string_code: Some("TRADE_RETCODE_REJECT".to_string()),
        }
    }

    #[test_case("ValidationError", "validation error")]
    #[test_case("NotFoundError", "not found")]
    #[test_case("NotSynchronizedError", "not synchronized")]
    #[test_case("TimeoutError", "remote timeout")]
    #[test_case("NotAuthenticatedError", "not connected")]
    #[test_case("TradeError", "trade rejected")]
    #[test_case("UnauthorizedError", "unauthorized")]
    #[test_case("SomeUnknownError", "internal error")]
    fn maps_wire_error_to_taxonomy(wire_error: &str, expected_prefix: &str) {
        let mapped = map_processing_error(&error_frame(wire_error));
        assert!(
            mapped.to_string().starts_with(expected_prefix),
            "expected '{mapped}' to start with '{expected_prefix}'"
        );
    }

    #[test]
    fn unauthorized_requires_teardown() {
        let mapped = map_processing_error(&error_frame("UnauthorizedError"));
        assert!(mapped.requires_teardown());
        let mapped = map_processing_error(&error_frame("ValidationError"));
        assert!(!mapped.requires_teardown());
    }

    #[tokio::test]
    async fn resolve_delivers_response_payload() {
        let mux = RpcMultiplexer::new();
        let rx = mux.register("r1".to_string());
        mux.resolve(ResponseFrame {
            request_id: "r1".to_string(),
            response: serde_json::json!({"ok": true}),
        });
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap(), serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn reject_delivers_mapped_error() {
        let mux = RpcMultiplexer::new();
        let rx = mux.register("r1".to_string());
        mux.reject(&error_frame("TradeError"));
        let result = rx.await.unwrap();
        assert!(matches!(result, Err(GatewayError::Trade { .. })));
    }

    #[tokio::test]
    async fn reject_all_closed_resolves_every_pending_request() {
        let mux = RpcMultiplexer::new();
        let rx1 = mux.register("r1".to_string());
        let rx2 = mux.register("r2".to_string());
        mux.reject_all_closed();
        assert!(matches!(
            rx1.await.unwrap(),
            Err(GatewayError::ConnectionClosed)
        ));
        assert!(matches!(
            rx2.await.unwrap(),
            Err(GatewayError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn timeout_fires_and_forgets_registration() {
        let mux = RpcMultiplexer::new();
        let rx = mux.register("r1".to_string());
        let result = await_with_timeout(
            &mux,
            "r1",
            "getAccountInformation",
            Duration::from_millis(20),
            rx,
        )
        .await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
        assert_eq!(mux.in_flight(), 0);
    }
}
