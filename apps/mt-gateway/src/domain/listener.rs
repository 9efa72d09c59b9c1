//! Listener capability sets (§4.6).
//!
//! Every method has a no-op default so a listener only implements the
//! events it cares about. Methods take owned values rather than
//! references: the dispatcher fans a single event out to an unknown
//! number of listeners concurrently (§5), so each listener gets its
//! own clone.

use async_trait::async_trait;

use super::terminal::{AccountInformation, Deal, Order, Position, SymbolSpecification, Price};

/// Per-account synchronization event sink (C6/C7's capability set).
///
/// A listener that panics or returns an error is caught by the
/// dispatcher, logged, and does not affect its peers or subsequent
/// packets (§7).
#[async_trait]
pub trait SynchronizationListener: Send + Sync {
    /// The gateway's socket authenticated for this account.
    async fn on_connected(&self) {}

    /// The gateway's socket for this account dropped.
    async fn on_disconnected(&self) {}

    /// A fresh synchronization pass has begun.
    async fn on_synchronization_started(&self) {}

    /// Replace the cached account information.
    async fn on_account_information_updated(&self, _info: AccountInformation) {}

    /// Replace the full position list.
    async fn on_positions_replaced(&self, _positions: Vec<Position>) {}

    /// A single position was created or changed.
    async fn on_position_updated(&self, _position: Position) {}

    /// A position closed.
    async fn on_position_removed(&self, _id: String) {}

    /// Replace the full pending-order list.
    async fn on_orders_replaced(&self, _orders: Vec<Order>) {}

    /// A single pending order was created or changed.
    async fn on_order_updated(&self, _order: Order) {}

    /// A pending order completed or was cancelled.
    async fn on_order_completed(&self, _id: String) {}

    /// A history order was observed.
    async fn on_history_order_added(&self, _order: Order) {}

    /// A deal was observed.
    async fn on_deal_added(&self, _deal: Deal) {}

    /// Deal history replay finished for `synchronization_id`.
    async fn on_deal_synchronization_finished(&self, _synchronization_id: String) {}

    /// Order history replay finished for `synchronization_id`.
    async fn on_order_synchronization_finished(&self, _synchronization_id: String) {}

    /// Broker connectivity changed.
    async fn on_broker_connection_status_changed(&self, _connected: bool) {}

    /// A symbol specification was created or changed.
    async fn on_symbol_specification_updated(&self, _specification: SymbolSpecification) {}

    /// A symbol price tick arrived.
    async fn on_symbol_price_updated(&self, _price: Price) {}
}

/// Notified sequentially after a successful reconnect (§4.5). A
/// listener's failure is logged and does not stop notification of
/// others.
#[async_trait]
pub trait ReconnectListener: Send + Sync {
    /// The gateway reconnected and will resubscribe/resynchronize.
    async fn on_reconnected(&self);
}

/// Notified when the packet orderer gives up waiting for a gap to
/// fill and flushes an account's buffer (§4.1 rule 6). The gateway
/// then re-subscribes (and resynchronizes) that account, same as a
/// socket reconnect but scoped to the one account that fell behind.
#[async_trait]
pub trait ResyncListener: Send + Sync {
    /// `account_id`'s packet buffer timed out and was flushed.
    async fn on_resync_needed(&self, account_id: String);
}
