//! Application Services
//!
//! [`Gateway`] is the connection lifecycle service (C8): it turns the
//! low-level [`crate::application::ports::GatewayPort`] into the
//! account-oriented API a caller actually wants — `connect`,
//! `synchronize`, `wait_synchronized`, `rpc_request` — and reissues
//! `subscribe`+`synchronize` for every tracked account whenever the
//! socket reconnects (§4.5, §4.8), or for just the one account the
//! packet orderer gave up on when its buffered gap times out (§4.1
//! rule 6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::domain::error::GatewayError;
use crate::domain::listener::{ReconnectListener, ResyncListener, SynchronizationListener};
use crate::domain::packet::Request;
use crate::infrastructure::gateway::TerminalStateHandle;

use super::ports::GatewayPort;

/// Parameters needed to resubscribe and resynchronize an account
/// after a reconnect (§4.8).
#[derive(Clone, Debug, Default)]
struct TrackedAccount {
    starting_history_order_time: Option<DateTime<Utc>>,
    starting_deal_time: Option<DateTime<Utc>>,
}

/// The connection lifecycle service (C8).
///
/// Owns one [`GatewayPort`] and every account connected through it.
/// Cheaply cloneable: clones share the same underlying socket and
/// tracked-account table.
#[derive(Clone)]
pub struct Gateway {
    connection: Arc<dyn GatewayPort>,
    application: String,
    tracked: Arc<Mutex<HashMap<String, TrackedAccount>>>,
    terminal_states: Arc<Mutex<HashMap<String, TerminalStateHandle>>>,
    denormalize_position_pnl: bool,
}

impl Gateway {
    /// Wrap `connection`, registering a reconnect handler that
    /// resubscribes every tracked account.
    #[must_use]
    pub fn new(connection: Arc<dyn GatewayPort>, application: String, denormalize_position_pnl: bool) -> Self {
        let gateway = Self {
            connection,
            application,
            tracked: Arc::new(Mutex::new(HashMap::new())),
            terminal_states: Arc::new(Mutex::new(HashMap::new())),
            denormalize_position_pnl,
        };
        gateway
            .connection
            .add_reconnect_listener(Arc::new(ReconnectHandler {
                connection: Arc::clone(&gateway.connection),
                application: gateway.application.clone(),
                tracked: Arc::clone(&gateway.tracked),
            }));
        gateway
            .connection
            .add_resync_listener(Arc::new(ResyncHandler {
                connection: Arc::clone(&gateway.connection),
                application: gateway.application.clone(),
                tracked: Arc::clone(&gateway.tracked),
            }));
        gateway
    }

    /// Start the socket lifecycle. Must be called once before any
    /// other method (§4.5).
    pub async fn run(&self) {
        self.connection.run().await;
    }

    /// The replicated terminal state for `account_id`, if
    /// [`Self::connect`] has been called for it.
    #[must_use]
    pub fn terminal_state(&self, account_id: &str) -> Option<TerminalStateHandle> {
        self.terminal_states.lock().get(account_id).cloned()
    }

    /// Register an additional synchronization listener for
    /// `account_id` (§4.6). `account_id` need not already be
    /// connected.
    pub fn add_listener(&self, account_id: &str, listener: Arc<dyn SynchronizationListener>) {
        self.connection.add_listener(account_id, listener);
    }

    /// Deregister a synchronization listener (§9).
    pub fn remove_listener(&self, account_id: &str, listener: &Arc<dyn SynchronizationListener>) {
        self.connection.remove_listener(account_id, listener);
    }

    /// Start tracking `account_id`: register its terminal state
    /// replica as a listener, then issue `subscribe` followed by
    /// `synchronize` (§4.8's resolution of the subscribe-vs-synchronize
    /// Open Question: both are issued, in that order, on every
    /// (re)connect).
    ///
    /// # Errors
    ///
    /// Propagates any [`GatewayError`] from the `subscribe` or
    /// `synchronize` RPCs.
    pub async fn connect(
        &self,
        account_id: &str,
        starting_history_order_time: Option<DateTime<Utc>>,
        starting_deal_time: Option<DateTime<Utc>>,
    ) -> Result<(), GatewayError> {
        let handle = self
            .terminal_states
            .lock()
            .entry(account_id.to_string())
            .or_insert_with(|| TerminalStateHandle::new(self.denormalize_position_pnl))
            .clone();
        self.connection
            .add_listener(account_id, Arc::new(handle) as Arc<dyn SynchronizationListener>);

        let tracked = TrackedAccount {
            starting_history_order_time,
            starting_deal_time,
        };
        self.tracked
            .lock()
            .insert(account_id.to_string(), tracked.clone());

        subscribe_and_synchronize(self.connection.as_ref(), &self.application, account_id, &tracked).await
    }

    /// Stop tracking `account_id`: it will no longer be resubscribed
    /// on reconnect. Does not remove its listeners (§9).
    pub fn disconnect(&self, account_id: &str) {
        self.tracked.lock().remove(account_id);
        self.terminal_states.lock().remove(account_id);
    }

    /// Block until `account_id` reports synchronized, or until
    /// `timeout` elapses (§4.4, §4.8).
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] if synchronization doesn't
    /// complete within `timeout`, or the mapped wire error otherwise.
    pub async fn wait_synchronized(
        &self,
        account_id: &str,
        application_pattern: Option<&str>,
        timeout: Duration,
    ) -> Result<(), GatewayError> {
        let mut payload = serde_json::json!({ "timeoutInSeconds": timeout.as_secs() });
        if let Some(pattern) = application_pattern {
            payload["applicationPattern"] = serde_json::Value::String(pattern.to_string());
        }
        let request = build_request(&self.application, account_id, "waitSynchronized", payload);
        // Wait one second longer than the server-side deadline we
        // just asked for, so a `NotSynchronizedError` response beats a
        // client-side `Timeout` to the caller (§4.4, §4.8).
        let client_timeout = timeout + Duration::from_secs(1);
        self.connection
            .request_with_timeout(request, client_timeout)
            .await
            .map(|_| ())
    }

    /// Issue an arbitrary RPC against `account_id` (§6). `trade`
    /// requests get their broker-level return code inspected: a
    /// non-success `stringCode` rejects the call even though the wire
    /// frame was a `response`, not a `processingError` (§4.3, §6).
    ///
    /// # Errors
    ///
    /// Returns the mapped wire error, a client-side
    /// [`GatewayError::Timeout`], or — for `trade` requests — a
    /// synthesized [`GatewayError::Trade`] built from the response
    /// payload's return code.
    pub async fn rpc_request(
        &self,
        account_id: &str,
        request_type: &str,
        payload: serde_json::Value,
    ) -> Result<serde_json::Value, GatewayError> {
        let request = build_request(&self.application, account_id, request_type, payload);
        let response = self.connection.request(request).await?;
        if request_type == "trade" {
            post_process_trade_response(response)
        } else {
            Ok(response)
        }
    }

    /// Close the underlying connection (§4.5).
    pub fn close(&self) {
        self.connection.close();
    }
}

async fn subscribe_and_synchronize(
    connection: &dyn GatewayPort,
    application: &str,
    account_id: &str,
    tracked: &TrackedAccount,
) -> Result<(), GatewayError> {
    let subscribe = build_request(application, account_id, "subscribe", serde_json::json!({}));
    connection.request(subscribe).await?;

    let mut payload = serde_json::json!({ "synchronizationId": uuid::Uuid::new_v4().to_string() });
    if let Some(time) = tracked.starting_history_order_time {
        payload["startingHistoryOrderTime"] = serde_json::Value::String(time.to_rfc3339());
    }
    if let Some(time) = tracked.starting_deal_time {
        payload["startingDealTime"] = serde_json::Value::String(time.to_rfc3339());
    }
    let synchronize = build_request(application, account_id, "synchronize", payload);
    connection.request(synchronize).await?;
    Ok(())
}

fn build_request(
    application: &str,
    account_id: &str,
    request_type: &str,
    payload: serde_json::Value,
) -> Request {
    Request {
        request_id: uuid::Uuid::new_v4().to_string(),
        account_id: account_id.to_string(),
        application: application.to_string(),
        request_type: request_type.to_string(),
        payload,
    }
}

/// Trade return codes that indicate a successfully placed or
/// completed order; anything else in a `trade` response's
/// `stringCode` is a rejection surfaced as `GatewayError::Trade`,
/// mirroring the rejection shape already used for `processingError`
/// frames so callers handle both paths identically (§6).
const TRADE_SUCCESS_CODES: &[&str] = &["TRADE_RETCODE_DONE", "TRADE_RETCODE_PLACED"];

fn post_process_trade_response(
    response: serde_json::Value,
) -> Result<serde_json::Value, GatewayError> {
    let string_code = response.get("stringCode").and_then(serde_json::Value::as_str);
    match string_code {
        Some(code) if !TRADE_SUCCESS_CODES.contains(&code) => Err(GatewayError::Trade {
            message: response
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("trade request rejected")
                .to_string(),
            numeric_code: response
                .get("numericCode")
                .and_then(serde_json::Value::as_i64)
                .unwrap_or_default(),
            string_code: code.to_string(),
        }),
        _ => Ok(response),
    }
}

struct ReconnectHandler {
    connection: Arc<dyn GatewayPort>,
    application: String,
    tracked: Arc<Mutex<HashMap<String, TrackedAccount>>>,
}

#[async_trait]
impl ReconnectListener for ReconnectHandler {
    async fn on_reconnected(&self) {
        let accounts: Vec<(String, TrackedAccount)> = self
            .tracked
            .lock()
            .iter()
            .map(|(id, tracked)| (id.clone(), tracked.clone()))
            .collect();
        for (account_id, tracked) in accounts {
            if let Err(error) =
                subscribe_and_synchronize(self.connection.as_ref(), &self.application, &account_id, &tracked)
                    .await
            {
                tracing::error!(%account_id, %error, "failed to resubscribe after reconnect");
            }
        }
    }
}

struct ResyncHandler {
    connection: Arc<dyn GatewayPort>,
    application: String,
    tracked: Arc<Mutex<HashMap<String, TrackedAccount>>>,
}

#[async_trait]
impl ResyncListener for ResyncHandler {
    /// Re-subscribes (and resynchronizes) the one account the packet
    /// orderer gave up waiting on, same as a full reconnect but scoped
    /// to that account (§4.1 rule 6, property 14, scenario S5).
    async fn on_resync_needed(&self, account_id: String) {
        let Some(tracked) = self.tracked.lock().get(&account_id).cloned() else {
            return;
        };
        if let Err(error) =
            subscribe_and_synchronize(self.connection.as_ref(), &self.application, &account_id, &tracked)
                .await
        {
            tracing::error!(%account_id, %error, "failed to resubscribe after packet ordering timeout");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeGateway {
        requests: AsyncMutex<Vec<Request>>,
        reconnect_listeners: Mutex<Vec<Arc<dyn ReconnectListener>>>,
        resync_listeners: Mutex<Vec<Arc<dyn ResyncListener>>>,
        responses: Mutex<HashMap<String, serde_json::Value>>,
    }

    #[async_trait]
    impl GatewayPort for FakeGateway {
        async fn run(&self) {}

        async fn request(&self, request: Request) -> Result<serde_json::Value, GatewayError> {
            let response = self
                .responses
                .lock()
                .get(&request.request_type)
                .cloned()
                .unwrap_or(serde_json::json!({}));
            self.requests.lock().await.push(request);
            Ok(response)
        }

        async fn request_with_timeout(
            &self,
            request: Request,
            _timeout: Duration,
        ) -> Result<serde_json::Value, GatewayError> {
            self.request(request).await
        }

        fn add_listener(&self, _account_id: &str, _listener: Arc<dyn SynchronizationListener>) {}

        fn remove_listener(&self, _account_id: &str, _listener: &Arc<dyn SynchronizationListener>) {}

        fn add_reconnect_listener(&self, listener: Arc<dyn ReconnectListener>) {
            self.reconnect_listeners.lock().push(listener);
        }

        fn add_resync_listener(&self, listener: Arc<dyn ResyncListener>) {
            self.resync_listeners.lock().push(listener);
        }

        fn close(&self) {}
    }

    #[tokio::test]
    async fn connect_issues_subscribe_then_synchronize() {
        let fake = Arc::new(FakeGateway::default());
        let gateway = Gateway::new(fake.clone(), "MetaApi".to_string(), false);
        gateway.connect("acc", None, None).await.unwrap();

        let requests = fake.requests.lock().await;
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].request_type, "subscribe");
        assert_eq!(requests[1].request_type, "synchronize");
    }

    #[tokio::test]
    async fn reconnect_resubscribes_every_tracked_account() {
        let fake = Arc::new(FakeGateway::default());
        let gateway = Gateway::new(fake.clone(), "MetaApi".to_string(), false);
        gateway.connect("acc-1", None, None).await.unwrap();
        gateway.connect("acc-2", None, None).await.unwrap();
        fake.requests.lock().await.clear();

        let listeners = fake.reconnect_listeners.lock().clone();
        for listener in listeners {
            listener.on_reconnected().await;
        }

        let requests = fake.requests.lock().await;
        assert_eq!(requests.len(), 4); // subscribe+synchronize per account
    }

    #[tokio::test]
    async fn resync_needed_resubscribes_only_the_stalled_account() {
        let fake = Arc::new(FakeGateway::default());
        let gateway = Gateway::new(fake.clone(), "MetaApi".to_string(), false);
        gateway.connect("acc-1", None, None).await.unwrap();
        gateway.connect("acc-2", None, None).await.unwrap();
        fake.requests.lock().await.clear();

        let listeners = fake.resync_listeners.lock().clone();
        for listener in listeners {
            listener.on_resync_needed("acc-1".to_string()).await;
        }

        let requests = fake.requests.lock().await;
        assert_eq!(requests.len(), 2); // subscribe+synchronize for acc-1 only
        assert!(requests.iter().all(|r| r.account_id == "acc-1"));
    }

    #[tokio::test]
    async fn resync_needed_for_untracked_account_is_a_no_op() {
        let fake = Arc::new(FakeGateway::default());
        let gateway = Gateway::new(fake.clone(), "MetaApi".to_string(), false);
        gateway.connect("acc-1", None, None).await.unwrap();
        fake.requests.lock().await.clear();

        let listeners = fake.resync_listeners.lock().clone();
        for listener in listeners {
            listener.on_resync_needed("unknown".to_string()).await;
        }
        assert!(fake.requests.lock().await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_excludes_account_from_resubscription() {
        let fake = Arc::new(FakeGateway::default());
        let gateway = Gateway::new(fake.clone(), "MetaApi".to_string(), false);
        gateway.connect("acc-1", None, None).await.unwrap();
        gateway.disconnect("acc-1");
        fake.requests.lock().await.clear();

        let listeners = fake.reconnect_listeners.lock().clone();
        for listener in listeners {
            listener.on_reconnected().await;
        }
        assert!(fake.requests.lock().await.is_empty());
    }

    #[test]
    fn trade_response_with_success_code_passes_through() {
        let response = serde_json::json!({"stringCode": "TRADE_RETCODE_DONE", "orderId": "1"});
        assert!(post_process_trade_response(response).is_ok());
    }

    #[test]
    fn trade_response_with_rejection_code_becomes_trade_error() {
        let response = serde_json::json!({
            "stringCode": "TRADE_RETCODE_REJECT",
            "numericCode": 10006,
            "message": "Request rejected"
        });
        let result = post_process_trade_response(response);
        assert!(matches!(result, Err(GatewayError::Trade { numeric_code: 10006, .. })));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn gateway_is_send_and_sync() {
        assert_send_sync::<Gateway>();
    }
}
