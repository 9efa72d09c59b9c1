//! Synchronization Dispatcher (C6) and the Terminal State listener
//! adapter (C7) it drives.
//!
//! Decodes packets already ordered by [`super::orderer::PacketOrderer`]
//! and fans each one out to every listener registered for its
//! account, per the invocation table in §4.6.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::RwLock;

use crate::domain::listener::SynchronizationListener;
use crate::domain::packet::SynchronizationPacket;
use crate::domain::terminal::TerminalState;

/// A cheaply cloneable read/write handle onto one account's
/// [`TerminalState`]. Implements [`SynchronizationListener`] so the
/// connection lifecycle can register it as an ordinary listener
/// (§4.7); external callers only ever reach it through the read
/// accessors, never the mutators.
#[derive(Clone)]
pub struct TerminalStateHandle(Arc<RwLock<TerminalState>>);

impl TerminalStateHandle {
    /// Wrap a fresh, empty replica.
    #[must_use]
    pub fn new(denormalize_pnl: bool) -> Self {
        Self(Arc::new(RwLock::new(TerminalState::new(denormalize_pnl))))
    }

    /// Take a read-only snapshot guard. Never blocks the dispatcher:
    /// readers and the dispatcher's writes use the same `RwLock`, but
    /// individual mutations are held only for the duration of a
    /// single field assignment.
    #[must_use]
    pub fn read(&self) -> parking_lot::RwLockReadGuard<'_, TerminalState> {
        self.0.read()
    }
}

#[async_trait]
impl SynchronizationListener for TerminalStateHandle {
    async fn on_connected(&self) {
        self.0.write().set_connected(true);
    }

    async fn on_disconnected(&self) {
        self.0.write().set_connected(false);
    }

    async fn on_broker_connection_status_changed(&self, connected: bool) {
        self.0.write().set_connected_to_broker(connected);
    }

    async fn on_account_information_updated(
        &self,
        info: crate::domain::terminal::AccountInformation,
    ) {
        self.0.write().replace_account_information(info);
    }

    async fn on_positions_replaced(&self, positions: Vec<crate::domain::terminal::Position>) {
        self.0.write().replace_positions(positions);
    }

    async fn on_position_updated(&self, position: crate::domain::terminal::Position) {
        self.0.write().upsert_position(position);
    }

    async fn on_position_removed(&self, id: String) {
        self.0.write().remove_position(&id);
    }

    async fn on_orders_replaced(&self, orders: Vec<crate::domain::terminal::Order>) {
        self.0.write().replace_orders(orders);
    }

    async fn on_order_updated(&self, order: crate::domain::terminal::Order) {
        self.0.write().upsert_order(order);
    }

    async fn on_order_completed(&self, id: String) {
        self.0.write().remove_order(&id);
    }

    async fn on_symbol_specification_updated(
        &self,
        specification: crate::domain::terminal::SymbolSpecification,
    ) {
        self.0.write().upsert_specification(specification);
    }

    async fn on_symbol_price_updated(&self, price: crate::domain::terminal::Price) {
        self.0.write().upsert_price(price);
    }
}

/// Per-account registry of external synchronization listeners plus
/// the dispatch loop that drives them (§4.6).
#[derive(Default)]
pub struct SynchronizationDispatcher {
    listeners: HashMap<String, Vec<Arc<dyn SynchronizationListener>>>,
}

impl SynchronizationDispatcher {
    /// An empty dispatcher with no registered listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `account_id`. Order of registration is
    /// preserved but carries no dispatch-order guarantee beyond "all
    /// listeners for an event run concurrently" (§4.6).
    pub fn add_listener(&mut self, account_id: &str, listener: Arc<dyn SynchronizationListener>) {
        self.listeners
            .entry(account_id.to_string())
            .or_default()
            .push(listener);
    }

    /// Remove a previously registered listener by pointer identity.
    /// A no-op if the account or listener is unknown (§9 Open
    /// Questions).
    pub fn remove_listener(&mut self, account_id: &str, listener: &Arc<dyn SynchronizationListener>) {
        if let Some(list) = self.listeners.get_mut(account_id) {
            list.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Dispatch one ordered packet to every listener registered for
    /// its account, per the invocation table in §4.6. Waits for the
    /// full concurrent batch of listener calls (one per sub-event) to
    /// complete before returning, so the caller's read loop stays
    /// correlated with wire order (§5).
    pub async fn dispatch(&self, packet: SynchronizationPacket) {
        let account_id = packet.account_id().to_string();
        let Some(listeners) = self.listeners.get(&account_id) else {
            return;
        };
        if listeners.is_empty() {
            return;
        }

        match packet {
            SynchronizationPacket::Authenticated { .. } => {
                Self::fan_out(listeners, |l| l.on_connected()).await;
            }
            SynchronizationPacket::Disconnected { .. } => {
                Self::fan_out(listeners, |l| l.on_disconnected()).await;
            }
            SynchronizationPacket::SynchronizationStarted { .. } => {
                Self::fan_out(listeners, |l| l.on_synchronization_started()).await;
            }
            SynchronizationPacket::AccountInformation {
                account_information, ..
            } => {
                Self::fan_out(listeners, |l| {
                    l.on_account_information_updated(account_information.clone())
                })
                .await;
            }
            SynchronizationPacket::Positions { positions, .. } => {
                Self::fan_out(listeners, |l| l.on_positions_replaced(positions.clone())).await;
            }
            SynchronizationPacket::Orders { orders, .. } => {
                Self::fan_out(listeners, |l| l.on_orders_replaced(orders.clone())).await;
            }
            SynchronizationPacket::HistoryOrders { history_orders, .. } => {
                for order in history_orders {
                    Self::fan_out(listeners, |l| l.on_history_order_added(order.clone())).await;
                }
            }
            SynchronizationPacket::Deals { deals, .. } => {
                for deal in deals {
                    Self::fan_out(listeners, |l| l.on_deal_added(deal.clone())).await;
                }
            }
            SynchronizationPacket::Update {
                account_information,
                updated_positions,
                removed_position_ids,
                updated_orders,
                completed_order_ids,
                history_orders,
                deals,
                ..
            } => {
                if let Some(info) = account_information {
                    Self::fan_out(listeners, |l| l.on_account_information_updated(info.clone()))
                        .await;
                }
                for position in updated_positions {
                    Self::fan_out(listeners, |l| l.on_position_updated(position.clone())).await;
                }
                for id in removed_position_ids {
                    Self::fan_out(listeners, |l| l.on_position_removed(id.clone())).await;
                }
                for order in updated_orders {
                    Self::fan_out(listeners, |l| l.on_order_updated(order.clone())).await;
                }
                for id in completed_order_ids {
                    Self::fan_out(listeners, |l| l.on_order_completed(id.clone())).await;
                }
                for order in history_orders {
                    Self::fan_out(listeners, |l| l.on_history_order_added(order.clone())).await;
                }
                for deal in deals {
                    Self::fan_out(listeners, |l| l.on_deal_added(deal.clone())).await;
                }
            }
            SynchronizationPacket::DealSynchronizationFinished {
                synchronization_id, ..
            } => {
                Self::fan_out(listeners, |l| {
                    l.on_deal_synchronization_finished(synchronization_id.clone())
                })
                .await;
            }
            SynchronizationPacket::OrderSynchronizationFinished {
                synchronization_id, ..
            } => {
                Self::fan_out(listeners, |l| {
                    l.on_order_synchronization_finished(synchronization_id.clone())
                })
                .await;
            }
            SynchronizationPacket::Status { connected, .. } => {
                Self::fan_out(listeners, |l| {
                    l.on_broker_connection_status_changed(connected)
                })
                .await;
            }
            SynchronizationPacket::Specifications { specifications, .. } => {
                for spec in specifications {
                    Self::fan_out(listeners, |l| {
                        l.on_symbol_specification_updated(spec.clone())
                    })
                    .await;
                }
            }
            SynchronizationPacket::Prices { prices, .. } => {
                for price in prices {
                    Self::fan_out(listeners, |l| l.on_symbol_price_updated(price.clone())).await;
                }
            }
        }
    }

    /// Invoke `call` against every listener concurrently and await
    /// the whole batch. A listener's failure is caught and logged; it
    /// never affects its peers or the packets that follow.
    async fn fan_out<'a, F, Fut>(listeners: &'a [Arc<dyn SynchronizationListener>], call: F)
    where
        F: Fn(&'a Arc<dyn SynchronizationListener>) -> Fut,
        Fut: std::future::Future<Output = ()> + 'a,
    {
        let futures = listeners.iter().map(|listener| {
            let fut = call(listener);
            async move {
                // Listener methods on this trait don't return a
                // Result, so "a listener that throws" maps to a
                // caught panic in AssertUnwindSafe rather than an
                // Err; either way it's isolated from its peers.
                std::panic::AssertUnwindSafe(fut)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!("synchronization listener panicked; continuing");
                    });
            }
        });
        futures::future::join_all(futures).await;
    }
}
