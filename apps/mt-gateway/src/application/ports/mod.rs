//! Port Interfaces
//!
//! Defines the interface the application layer depends on instead of
//! the concrete [`crate::infrastructure::gateway::GatewayConnection`],
//! following the same hexagonal seam the rest of this crate uses at
//! its infrastructure boundary.
//!
//! ## Driven Port (Outbound)
//!
//! - [`GatewayPort`]: everything the connection lifecycle service (C8)
//!   needs from a live gateway socket: issuing RPCs and registering
//!   listeners. [`crate::infrastructure::gateway::GatewayConnection`]
//!   is its only production implementation; tests substitute a fake.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::error::GatewayError;
use crate::domain::listener::{ReconnectListener, ResyncListener, SynchronizationListener};
use crate::domain::packet::Request;

/// Everything the application layer needs from a gateway socket.
#[async_trait]
pub trait GatewayPort: Send + Sync {
    /// Start the connect/reconnect lifecycle (§4.5).
    async fn run(&self);

    /// Issue a request and await its correlated response (§4.4).
    async fn request(&self, request: Request) -> Result<serde_json::Value, GatewayError>;

    /// As [`Self::request`], but with an explicit client-side
    /// deadline instead of the gateway's configured default (§4.4,
    /// §4.8's `waitSynchronized`).
    async fn request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError>;

    /// Register a synchronization listener for `account_id` (§4.6).
    fn add_listener(&self, account_id: &str, listener: Arc<dyn SynchronizationListener>);

    /// Deregister a synchronization listener (§9).
    fn remove_listener(&self, account_id: &str, listener: &Arc<dyn SynchronizationListener>);

    /// Register a reconnect listener (§4.5).
    fn add_reconnect_listener(&self, listener: Arc<dyn ReconnectListener>);

    /// Register a resync listener, notified with an account id when
    /// the packet orderer gives up on that account's gap (§4.1 rule 6).
    fn add_resync_listener(&self, listener: Arc<dyn ResyncListener>);

    /// Close the connection and stop reconnecting (§4.5).
    fn close(&self);
}

#[async_trait]
impl GatewayPort for crate::infrastructure::gateway::GatewayConnection {
    async fn run(&self) {
        Self::run(self).await;
    }

    async fn request(&self, request: Request) -> Result<serde_json::Value, GatewayError> {
        Self::request(self, request).await
    }

    async fn request_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> Result<serde_json::Value, GatewayError> {
        Self::request_with_timeout(self, request, timeout).await
    }

    fn add_listener(&self, account_id: &str, listener: Arc<dyn SynchronizationListener>) {
        Self::add_listener(self, account_id, listener);
    }

    fn remove_listener(&self, account_id: &str, listener: &Arc<dyn SynchronizationListener>) {
        Self::remove_listener(self, account_id, listener);
    }

    fn add_reconnect_listener(&self, listener: Arc<dyn ReconnectListener>) {
        Self::add_reconnect_listener(self, listener);
    }

    fn add_resync_listener(&self, listener: Arc<dyn ResyncListener>) {
        Self::add_resync_listener(self, listener);
    }

    fn close(&self) {
        Self::close(self);
    }
}
