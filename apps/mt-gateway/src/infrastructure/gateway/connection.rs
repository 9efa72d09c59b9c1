//! Gateway Connection (C5).
//!
//! Owns the WebSocket socket lifecycle: connect with a per-attempt
//! timeout, read frames and route them to C4/C1/C6, and reconnect
//! indefinitely on drop until [`GatewayConnection::close`] is called
//! (§4.5). Unlike the source excerpt's own reconnect policy, retries
//! carry no exponential backoff — just a fixed minimal delay between
//! attempts so a persistent outage doesn't spin the task hot.
//!
//! A periodic sweep also surfaces the packet orderer's own recovery
//! path: when an account's buffered gap times out, the flushed
//! packets are dispatched and the account id is handed to every
//! registered [`ResyncListener`] so the connection lifecycle (C8) can
//! re-subscribe it (§4.1 rule 6).

use std::sync::{Arc, Once};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};

use crate::domain::error::GatewayError;
use crate::domain::listener::{ReconnectListener, ResyncListener, SynchronizationListener};
use crate::domain::packet::{InboundFrame, Request};
use crate::infrastructure::config::GatewayConfig;
use crate::infrastructure::logger::PacketLogger;
use crate::infrastructure::metrics;

use super::dispatcher::SynchronizationDispatcher;
use super::orderer::PacketOrderer;
use super::rpc::{RpcMultiplexer, await_with_timeout};

/// Delay between failed connect attempts. Fixed, not exponential
/// (§4.5 deviation from the source excerpt's backoff policy).
const RECONNECT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Packet-ordering timeout sweep cadence.
const TIMEOUT_SWEEP_INTERVAL: Duration = Duration::from_secs(5);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

static CRYPTO_PROVIDER: Once = Once::new();

/// Install the process-wide `rustls` crypto provider on first use.
/// `connect_async`'s TLS handshake panics without one installed.
fn ensure_crypto_provider() {
    CRYPTO_PROVIDER.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

struct Shared {
    config: GatewayConfig,
    rpc: RpcMultiplexer,
    orderer: Mutex<PacketOrderer>,
    dispatcher: RwLock<SynchronizationDispatcher>,
    logger: Option<PacketLogger>,
    reconnect_listeners: Mutex<Vec<Arc<dyn ReconnectListener>>>,
    resync_listeners: Mutex<Vec<Arc<dyn ResyncListener>>>,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closed: AtomicBool,
}

/// A live MetaApi gateway socket, with RPC multiplexing, packet
/// reassembly, and terminal-state dispatch wired over it.
pub struct GatewayConnection {
    shared: Arc<Shared>,
}

impl GatewayConnection {
    /// Build a connection. Call [`Self::run`] to start the socket
    /// lifecycle task; the connection is otherwise inert.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        ensure_crypto_provider();
        let logger = PacketLogger::spawn(config.packet_logger.clone());
        Self {
            shared: Arc::new(Shared {
                orderer: Mutex::new(PacketOrderer::new(config.packet_ordering_timeout)),
                dispatcher: RwLock::new(SynchronizationDispatcher::new()),
                logger,
                reconnect_listeners: Mutex::new(Vec::new()),
                resync_listeners: Mutex::new(Vec::new()),
                outbound: Mutex::new(None),
                closed: AtomicBool::new(false),
                rpc: RpcMultiplexer::new(),
                config,
            }),
        }
    }

    /// The RPC multiplexer backing [`Self::request`].
    #[must_use]
    pub fn rpc(&self) -> &RpcMultiplexer {
        &self.shared.rpc
    }

    /// Register a synchronization listener for `account_id` (§4.6).
    pub fn add_listener(&self, account_id: &str, listener: Arc<dyn SynchronizationListener>) {
        self.shared.dispatcher.write().add_listener(account_id, listener);
    }

    /// Deregister a synchronization listener. No-op if unknown (§9).
    pub fn remove_listener(&self, account_id: &str, listener: &Arc<dyn SynchronizationListener>) {
        self.shared
            .dispatcher
            .write()
            .remove_listener(account_id, listener);
    }

    /// Register a reconnect listener, notified sequentially after
    /// every successful reconnect (§4.5).
    pub fn add_reconnect_listener(&self, listener: Arc<dyn ReconnectListener>) {
        self.shared.reconnect_listeners.lock().push(listener);
    }

    /// Register a resync listener, notified with an account id
    /// whenever the packet orderer gives up on that account's gap and
    /// flushes its buffer (§4.1 rule 6).
    pub fn add_resync_listener(&self, listener: Arc<dyn ResyncListener>) {
        self.shared.resync_listeners.lock().push(listener);
    }

    /// Whether a socket is currently established.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.outbound.lock().is_some()
    }

    /// Start the connect/read/reconnect lifecycle. Resolves once the
    /// first connect attempt succeeds; the socket is then driven by a
    /// background task until [`Self::close`] is called.
    pub async fn run(&self) {
        // `closed` can only already be true here if the caller called
        // `close()` before `run()`, which has nothing to tear down.
        let Some(stream) = connect_until_success(&self.shared).await else {
            return;
        };
        spawn_socket_task(Arc::clone(&self.shared), stream, false);
        spawn_timeout_sweep(Arc::clone(&self.shared));
    }

    /// Send a request and await its correlated response, bounded by
    /// `config.request_timeout` (§4.4).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotConnected`] if no socket is
    /// currently established, [`GatewayError::Timeout`] if the
    /// deadline elapses, or the mapped wire error otherwise.
    pub async fn request(&self, request: Request) -> Result<serde_json::Value, GatewayError> {
        self.request_with_timeout(request, self.shared.config.request_timeout)
            .await
    }

    /// As [`Self::request`], but with an explicit client-side deadline
    /// instead of `config.request_timeout`. Used by `waitSynchronized`
    /// (§4.4, §4.8), whose caller-specified wait can legitimately run
    /// longer than an ordinary RPC's deadline.
    ///
    /// # Errors
    ///
    /// Same as [`Self::request`].
    pub async fn request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError> {
        let request_id = request.request_id.clone();
        let request_type = request.request_type.clone();
        let rx = self.shared.rpc.register(request_id.clone());

        let Some(tx) = self.shared.outbound.lock().clone() else {
            self.shared.rpc.forget(&request_id);
            return Err(GatewayError::NotConnected {
                message: "no active gateway socket".to_string(),
            });
        };

        let payload = serde_json::to_string(&request)?;
        if tx.send(Message::Text(payload.into())).is_err() {
            self.shared.rpc.forget(&request_id);
            return Err(GatewayError::NotConnected {
                message: "gateway socket writer has shut down".to_string(),
            });
        }

        metrics::set_rpcs_in_flight(self.shared.rpc.in_flight() as f64);
        let result =
            await_with_timeout(&self.shared.rpc, &request_id, &request_type, timeout, rx).await;
        metrics::set_rpcs_in_flight(self.shared.rpc.in_flight() as f64);
        result
    }

    /// Close the connection: reject every pending RPC with
    /// [`GatewayError::ConnectionClosed`] and stop reconnecting.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.rpc.reject_all_closed();
        *self.shared.outbound.lock() = None;
    }
}

/// A fresh per-connect client id, sent as a header so the gateway can
/// tell reconnects of the same logical session apart in its own logs.
fn client_id_header() -> String {
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn build_connect_request(
    config: &GatewayConfig,
) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = config
        .connect_url()
        .into_client_request()
        .expect("connect_url is always a valid wss:// URL");
    request.headers_mut().insert(
        "Client-Id",
        HeaderValue::from_str(&client_id_header()).expect("hex string is a valid header value"),
    );
    request
}

/// Retry `connect_async` with a per-attempt timeout until it
/// succeeds, or return `None` if `close()` fires while retrying.
async fn connect_until_success(shared: &Arc<Shared>) -> Option<WsStream> {
    loop {
        if shared.closed.load(Ordering::SeqCst) {
            return None;
        }
        let request = build_connect_request(&shared.config);
        match tokio::time::timeout(
            shared.config.connect_timeout,
            tokio_tungstenite::connect_async(request),
        )
        .await
        {
            Ok(Ok((stream, _response))) => return Some(stream),
            Ok(Err(error)) => {
                tracing::warn!(%error, "gateway connect attempt failed");
            }
            Err(_) => {
                tracing::warn!(
                    timeout = ?shared.config.connect_timeout,
                    "gateway connect attempt timed out"
                );
            }
        }
        tokio::time::sleep(RECONNECT_RETRY_DELAY).await;
    }
}

/// Drive one socket to completion (until it errs or the peer closes
/// it), then either reconnect or exit depending on `shared.closed`.
fn spawn_socket_task(shared: Arc<Shared>, stream: WsStream, is_reconnect: bool) {
    tokio::spawn(async move {
        let (sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *shared.outbound.lock() = Some(tx);

        let write_task = {
            let mut sink = sink;
            tokio::spawn(async move {
                while let Some(message) = rx.recv().await {
                    if sink.send(message).await.is_err() {
                        break;
                    }
                }
            })
        };

        if is_reconnect {
            metrics::record_reconnect();
            notify_reconnected(&shared).await;
        }

        while let Some(frame) = source.next().await {
            match frame {
                Ok(Message::Text(text)) => handle_frame(&shared, &text).await,
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(%error, "gateway socket read error");
                    break;
                }
            }
        }

        *shared.outbound.lock() = None;
        write_task.abort();

        if shared.closed.load(Ordering::SeqCst) {
            return;
        }

        shared.rpc.reject_all_disconnected();
        tracing::info!("gateway socket dropped; reconnecting");
        let Some(stream) = connect_until_success(&shared).await else {
            return;
        };
        spawn_socket_task(shared, stream, true);
    });
}

async fn notify_reconnected(shared: &Arc<Shared>) {
    let listeners = shared.reconnect_listeners.lock().clone();
    for listener in listeners {
        listener.on_reconnected().await;
    }
}

async fn notify_resync_needed(shared: &Arc<Shared>, account_id: &str) {
    let listeners = shared.resync_listeners.lock().clone();
    for listener in listeners {
        listener.on_resync_needed(account_id.to_string()).await;
    }
}

async fn handle_frame(shared: &Arc<Shared>, text: &str) {
    let frame: InboundFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(error) => {
            tracing::warn!(%error, "failed to decode inbound gateway frame");
            return;
        }
    };

    match frame {
        InboundFrame::Response(response) => shared.rpc.resolve(response),
        InboundFrame::ProcessingError(error) => {
            let mapped = super::rpc::map_processing_error(&error);
            let requires_teardown = mapped.requires_teardown();
            shared.rpc.reject(&error);
            if requires_teardown {
                tracing::error!("unauthorized; tearing down gateway connection");
                shared.closed.store(true, Ordering::SeqCst);
                shared.rpc.reject_all_closed();
            }
        }
        InboundFrame::Synchronization(packet) => {
            let now = Utc::now();
            if let Some(logger) = &shared.logger {
                logger.log_packet(packet.account_id(), (*packet).clone(), now);
            }
            let ready = shared.orderer.lock().ingest(*packet, Instant::now());
            if ready.ready.len() > 1 {
                metrics::record_packet_reordered();
            }
            for packet in ready.ready {
                shared.dispatcher.read().dispatch(packet).await;
            }
        }
    }
}

fn spawn_timeout_sweep(shared: Arc<Shared>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TIMEOUT_SWEEP_INTERVAL);
        loop {
            interval.tick().await;
            if shared.closed.load(Ordering::SeqCst) {
                return;
            }
            let events = shared.orderer.lock().check_timeouts(Instant::now());
            for event in events {
                metrics::record_out_of_order_event();
                tracing::warn!(
                    account_id = %event.account_id,
                    flushed = event.flushed.len(),
                    "packet ordering timed out; flushing buffered packets and re-subscribing"
                );
                for packet in event.flushed {
                    shared.dispatcher.read().dispatch(packet).await;
                }
                notify_resync_needed(&shared, &event.account_id).await;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_without_a_socket_fails_fast() {
        let connection = GatewayConnection::new(GatewayConfig::new("tok"));
        let request = Request {
            request_id: "r1".to_string(),
            account_id: "acc".to_string(),
            application: "MetaApi".to_string(),
            request_type: "getAccountInformation".to_string(),
            payload: serde_json::json!({}),
        };
        let result = connection.request(request).await;
        assert!(matches!(result, Err(GatewayError::NotConnected { .. })));
        assert_eq!(connection.rpc().in_flight(), 0);
    }

    #[test]
    fn close_marks_disconnected_and_rejects_pending() {
        let connection = GatewayConnection::new(GatewayConfig::new("tok"));
        connection.close();
        assert!(!connection.is_connected());
    }

    struct RecordingResyncListener(Arc<Mutex<Vec<String>>>);

    #[async_trait::async_trait]
    impl ResyncListener for RecordingResyncListener {
        async fn on_resync_needed(&self, account_id: String) {
            self.0.lock().push(account_id);
        }
    }

    /// §4.1 rule 6 / S5: an orderer timeout must surface the stalled
    /// account id to every registered resync listener so C8 can
    /// re-subscribe it.
    #[tokio::test]
    async fn timeout_sweep_plumbing_notifies_resync_listeners_with_account_id() {
        let connection = GatewayConnection::new(GatewayConfig::new("tok"));
        let notified = Arc::new(Mutex::new(Vec::new()));
        connection.add_resync_listener(Arc::new(RecordingResyncListener(Arc::clone(&notified))));

        notify_resync_needed(&connection.shared, "acc-1").await;

        assert_eq!(*notified.lock(), vec!["acc-1".to_string()]);
    }
}
