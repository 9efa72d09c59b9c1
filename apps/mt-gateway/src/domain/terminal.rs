//! Terminal replica: the cached view of one remote trading terminal
//! (C7) plus the domain value types it stores.
//!
//! Timestamp fields are typed `DateTime<Utc>` rather than coerced from
//! a string by a field-name heuristic (§4.4, §9): each payload
//! declares which of its fields are platform instants versus
//! broker-local strings up front.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Account-level snapshot: balance, equity, broker identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInformation {
    /// Broker display name.
    pub broker: String,
    /// Account currency, e.g. `"USD"`.
    pub currency: String,
    /// Trade server name.
    pub server: String,
    /// Account balance.
    pub balance: Decimal,
    /// Account equity (balance plus floating P&L).
    pub equity: Decimal,
    /// Margin currently in use.
    pub margin: Decimal,
    /// Free margin available for new positions.
    #[serde(rename = "freeMargin")]
    pub free_margin: Decimal,
    /// Margin level as a percentage, when the broker reports one.
    #[serde(rename = "marginLevel", default)]
    pub margin_level: Option<Decimal>,
}

/// An open market exposure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Unique position id, stable across updates.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Position direction/type, e.g. `"POSITION_TYPE_BUY"`.
    #[serde(rename = "type")]
    pub position_type: String,
    /// Position volume in lots.
    pub volume: Decimal,
    /// Price the position was opened at.
    #[serde(rename = "openPrice")]
    pub open_price: Decimal,
    /// Current market price for this symbol.
    #[serde(rename = "currentPrice", default)]
    pub current_price: Option<Decimal>,
    /// Floating profit, denormalized from price ticks when
    /// [`crate::infrastructure::config::GatewayConfig::denormalize_position_pnl`]
    /// is enabled.
    #[serde(default)]
    pub profit: Decimal,
    /// Time the position was opened.
    pub time: DateTime<Utc>,
}

/// A pending (not yet executed, not yet cancelled) instruction to
/// trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order id, stable across updates.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Order type, e.g. `"ORDER_TYPE_BUY_LIMIT"`.
    #[serde(rename = "type")]
    pub order_type: String,
    /// Requested volume in lots.
    pub volume: Decimal,
    /// Requested open price.
    #[serde(rename = "openPrice")]
    pub open_price: Decimal,
    /// Time the order was placed.
    pub time: DateTime<Utc>,
}

/// A completed transaction leg; immutable once observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deal {
    /// Unique deal id.
    pub id: String,
    /// Instrument symbol.
    pub symbol: String,
    /// Deal type, e.g. `"DEAL_TYPE_BUY"`.
    #[serde(rename = "type")]
    pub deal_type: String,
    /// Executed volume in lots.
    pub volume: Decimal,
    /// Execution price.
    pub price: Decimal,
    /// Realized profit contributed by this deal.
    #[serde(default)]
    pub profit: Decimal,
    /// Execution time.
    pub time: DateTime<Utc>,
}

/// Per-symbol metadata required to interpret prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolSpecification {
    /// Instrument symbol; unique key.
    pub symbol: String,
    /// Number of decimal digits in quoted prices.
    pub digits: u32,
    /// Contract size in base units per lot.
    #[serde(rename = "contractSize")]
    pub contract_size: Decimal,
    /// Value of one tick in the account currency, when the broker
    /// reports one; used to denormalize position P&L from price
    /// ticks.
    #[serde(rename = "tickValue", default)]
    pub tick_value: Option<Decimal>,
}

/// Latest bid/ask for a symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Price {
    /// Instrument symbol.
    pub symbol: String,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Time the quote was generated by the broker.
    pub time: DateTime<Utc>,
}

/// Event-driven replica of one remote terminal's observable state
/// (§3, §4.7). Owned exclusively by the dispatcher task; external
/// callers only ever see it through read accessors.
#[derive(Debug, Clone, Default)]
pub struct TerminalState {
    connected: bool,
    connected_to_broker: bool,
    account_information: Option<AccountInformation>,
    positions: Vec<Position>,
    orders: Vec<Order>,
    specifications: HashMap<String, SymbolSpecification>,
    prices: HashMap<String, Price>,
    denormalize_position_pnl: bool,
}

impl TerminalState {
    /// A fresh, empty replica. `denormalize_pnl` mirrors
    /// [`GatewayConfig::denormalize_position_pnl`](crate::infrastructure::config::GatewayConfig::denormalize_position_pnl).
    #[must_use]
    pub fn new(denormalize_pnl: bool) -> Self {
        Self {
            denormalize_position_pnl: denormalize_pnl,
            ..Self::default()
        }
    }

    /// True while the gateway holds an authenticated socket for this
    /// account.
    #[must_use]
    pub const fn connected(&self) -> bool {
        self.connected
    }

    /// True while the remote terminal reports broker connectivity.
    #[must_use]
    pub const fn connected_to_broker(&self) -> bool {
        self.connected_to_broker
    }

    /// Cached account snapshot, `None` until the first
    /// `accountInformation` event.
    #[must_use]
    pub fn account_information(&self) -> Option<&AccountInformation> {
        self.account_information.as_ref()
    }

    /// Open positions in observation order.
    #[must_use]
    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    /// Pending orders in observation order.
    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// All known symbol specifications.
    #[must_use]
    pub fn specifications(&self) -> impl Iterator<Item = &SymbolSpecification> {
        self.specifications.values()
    }

    /// O(1) specification lookup by symbol.
    #[must_use]
    pub fn specification(&self, symbol: &str) -> Option<&SymbolSpecification> {
        self.specifications.get(symbol)
    }

    /// O(1) latest-price lookup by symbol.
    #[must_use]
    pub fn price(&self, symbol: &str) -> Option<&Price> {
        self.prices.get(symbol)
    }

    pub(crate) fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
        if !connected {
            self.connected_to_broker = false;
        }
    }

    pub(crate) fn set_connected_to_broker(&mut self, connected: bool) {
        self.connected_to_broker = connected;
    }

    pub(crate) fn replace_account_information(&mut self, info: AccountInformation) {
        self.account_information = Some(info);
    }

    pub(crate) fn replace_positions(&mut self, positions: Vec<Position>) {
        self.positions = positions;
    }

    pub(crate) fn upsert_position(&mut self, position: Position) {
        if let Some(existing) = self.positions.iter_mut().find(|p| p.id == position.id) {
            *existing = position;
        } else {
            self.positions.push(position);
        }
    }

    pub(crate) fn remove_position(&mut self, id: &str) {
        self.positions.retain(|p| p.id != id);
    }

    pub(crate) fn replace_orders(&mut self, orders: Vec<Order>) {
        self.orders = orders;
    }

    pub(crate) fn upsert_order(&mut self, order: Order) {
        if let Some(existing) = self.orders.iter_mut().find(|o| o.id == order.id) {
            *existing = order;
        } else {
            self.orders.push(order);
        }
    }

    pub(crate) fn remove_order(&mut self, id: &str) {
        self.orders.retain(|o| o.id != id);
    }

    pub(crate) fn upsert_specification(&mut self, spec: SymbolSpecification) {
        self.specifications.insert(spec.symbol.clone(), spec);
    }

    /// Overwrite the cached price for `price.symbol` and, when
    /// denormalization is enabled, recompute the floating profit of
    /// every open position on that symbol (§4.7, §9 Open Questions).
    pub(crate) fn upsert_price(&mut self, price: Price) {
        let symbol = price.symbol.clone();
        self.prices.insert(symbol.clone(), price.clone());

        if !self.denormalize_position_pnl {
            return;
        }
        let Some(spec) = self.specifications.get(&symbol) else {
            return;
        };
        let Some(tick_value) = spec.tick_value else {
            return;
        };
        for position in &mut self.positions {
            if position.symbol != symbol {
                continue;
            }
            let close_price = if position.position_type.ends_with("BUY") {
                price.bid
            } else {
                price.ask
            };
            position.current_price = Some(close_price);
            let direction = if position.position_type.ends_with("BUY") {
                Decimal::ONE
            } else {
                -Decimal::ONE
            };
            position.profit =
                direction * (close_price - position.open_price) * position.volume * tick_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn price(symbol: &str, bid: &str, ask: &str) -> Price {
        Price {
            symbol: symbol.to_string(),
            bid: bid.parse().unwrap(),
            ask: ask.parse().unwrap(),
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn disconnect_clears_broker_connectivity() {
        let mut state = TerminalState::new(false);
        state.set_connected(true);
        state.set_connected_to_broker(true);
        state.set_connected(false);
        assert!(!state.connected());
        assert!(!state.connected_to_broker());
    }

    #[test]
    fn position_upsert_preserves_order_and_dedups_by_id() {
        let mut state = TerminalState::new(false);
        let mut p1 = Position {
            id: "1".into(),
            symbol: "EURUSD".into(),
            position_type: "POSITION_TYPE_BUY".into(),
            volume: "1".parse().unwrap(),
            open_price: "1.1000".parse().unwrap(),
            current_price: None,
            profit: Decimal::ZERO,
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };
        state.upsert_position(p1.clone());
        p1.volume = "2".parse().unwrap();
        state.upsert_position(p1.clone());
        assert_eq!(state.positions().len(), 1);
        assert_eq!(state.positions()[0].volume, p1.volume);
    }

    #[test]
    fn position_removal_of_absent_id_is_noop() {
        let mut state = TerminalState::new(false);
        state.remove_position("missing");
        assert!(state.positions().is_empty());
    }

    #[test]
    fn price_update_is_a_noop_on_positions_when_denormalization_disabled() {
        let mut state = TerminalState::new(false);
        state.upsert_position(Position {
            id: "1".into(),
            symbol: "EURUSD".into(),
            position_type: "POSITION_TYPE_BUY".into(),
            volume: "1".parse().unwrap(),
            open_price: "1.1000".parse().unwrap(),
            current_price: None,
            profit: Decimal::ZERO,
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        state.upsert_price(price("EURUSD", "1.1050", "1.1052"));
        assert_eq!(state.positions()[0].profit, Decimal::ZERO);
        assert!(state.positions()[0].current_price.is_none());
    }

    #[test]
    fn price_update_denormalizes_position_profit_when_enabled() {
        let mut state = TerminalState::new(true);
        state.upsert_specification(SymbolSpecification {
            symbol: "EURUSD".into(),
            digits: 4,
            contract_size: "100000".parse().unwrap(),
            tick_value: Some("1".parse().unwrap()),
        });
        state.upsert_position(Position {
            id: "1".into(),
            symbol: "EURUSD".into(),
            position_type: "POSITION_TYPE_BUY".into(),
            volume: "1".parse().unwrap(),
            open_price: "1.1000".parse().unwrap(),
            current_price: None,
            profit: Decimal::ZERO,
            time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        state.upsert_price(price("EURUSD", "1.1050", "1.1052"));
        let profit = state.positions()[0].profit;
        assert_eq!(profit, "0.0050".parse().unwrap());
    }

    #[test]
    fn specification_lookup_is_by_symbol() {
        let mut state = TerminalState::new(false);
        state.upsert_specification(SymbolSpecification {
            symbol: "GBPUSD".into(),
            digits: 4,
            contract_size: "100000".parse().unwrap(),
            tick_value: None,
        });
        assert!(state.specification("GBPUSD").is_some());
        assert!(state.specification("EURUSD").is_none());
    }
}
