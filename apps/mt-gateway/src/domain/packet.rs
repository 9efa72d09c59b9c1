//! Wire envelope types.
//!
//! The gateway speaks one JSON object per WebSocket text frame. Every
//! frame is one of the three top-level kinds the transport can emit or
//! receive; synchronization frames carry a closed `type` discriminant
//! (§4.6/§9: prefer a tagged enum over matching on a raw string so an
//! unhandled packet type fails to compile rather than silently
//! no-opping).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::terminal::{AccountInformation, Deal, Order, Position, Price, SymbolSpecification};

/// An outbound request frame.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    /// Correlation id, matched against the eventual `response` frame.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Target account for this request.
    #[serde(rename = "accountId")]
    pub account_id: String,
    /// Application identifier, injected once per gateway.
    pub application: String,
    /// Request discriminant, e.g. `"getAccountInformation"`.
    #[serde(rename = "type")]
    pub request_type: String,
    /// Request-type-specific fields, flattened into the envelope.
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// An inbound frame, dispatched on `type`/shape before further
/// decoding of its payload.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    /// A resolved RPC response, matched by `requestId`.
    Response(ResponseFrame),
    /// A rejected RPC, matched by `requestId`.
    ProcessingError(ProcessingErrorFrame),
    /// A synchronization event for some account.
    Synchronization(Box<SynchronizationPacket>),
}

/// `response` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseFrame {
    /// Echoes the originating request's id.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Request-type-specific response payload. Required so an
    /// untagged `processingError` frame (which has no `response`
    /// field) fails this variant and falls through to
    /// [`ProcessingErrorFrame`] instead of matching here with a null
    /// payload.
    pub response: serde_json::Value,
}

/// `processingError` frame payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingErrorFrame {
    /// Echoes the originating request's id.
    #[serde(rename = "requestId")]
    pub request_id: String,
    /// Wire error discriminant, e.g. `"ValidationError"`.
    pub error: String,
    /// Human-readable message.
    pub message: String,
    /// Field-level detail, if any.
    #[serde(default)]
    pub details: Vec<serde_json::Value>,
    /// MetaTrader numeric return code, for `TradeError`.
    #[serde(rename = "numericCode", default)]
    pub numeric_code: Option<i64>,
    /// MetaTrader symbolic return code, for `TradeError`.
    #[serde(rename = "stringCode", default)]
    pub string_code: Option<String>,
}

/// A `synchronization` frame, tagged by `type`.
///
/// Every variant carries at least `accountId`; most carry
/// `sequenceNumber` (absent variants pass straight through the
/// orderer per §4.1 rule 1).
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum SynchronizationPacket {
    /// The gateway's socket session authenticated successfully.
    #[serde(rename = "authenticated")]
    Authenticated {
        /// Account this authentication applies to.
        #[serde(rename = "accountId")]
        account_id: String,
    },
    /// The gateway's socket session dropped.
    #[serde(rename = "disconnected")]
    Disconnected {
        /// Account this disconnection applies to.
        #[serde(rename = "accountId")]
        account_id: String,
    },
    /// A fresh synchronization pass has begun; resets the orderer's
    /// expected sequence number (§4.1 rule 7).
    #[serde(rename = "synchronizationStarted")]
    SynchronizationStarted {
        /// Account being (re)synchronized.
        #[serde(rename = "accountId")]
        account_id: String,
        /// First sequence number of the new pass.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// Client-chosen correlation token, echoed back from `synchronize`.
        #[serde(rename = "synchronizationId", default)]
        synchronization_id: Option<String>,
    },
    /// Full account information snapshot.
    #[serde(rename = "accountInformation")]
    AccountInformation {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The snapshot itself.
        #[serde(rename = "accountInformation")]
        account_information: AccountInformation,
    },
    /// Full open-position list snapshot.
    #[serde(rename = "positions")]
    Positions {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The snapshot itself.
        positions: Vec<Position>,
    },
    /// Full pending-order list snapshot.
    #[serde(rename = "orders")]
    Orders {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The snapshot itself.
        orders: Vec<Order>,
    },
    /// A page of completed history orders.
    #[serde(rename = "historyOrders")]
    HistoryOrders {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The page of orders.
        #[serde(rename = "historyOrders")]
        history_orders: Vec<Order>,
    },
    /// A page of completed deals.
    #[serde(rename = "deals")]
    Deals {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The page of deals.
        deals: Vec<Deal>,
    },
    /// Incremental delta against the cached replica.
    #[serde(rename = "update")]
    Update {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// Replacement account information, if changed.
        #[serde(rename = "accountInformation", default)]
        account_information: Option<AccountInformation>,
        /// Positions that were created or changed.
        #[serde(rename = "updatedPositions", default)]
        updated_positions: Vec<Position>,
        /// Ids of positions that closed.
        #[serde(rename = "removedPositionIds", default)]
        removed_position_ids: Vec<String>,
        /// Orders that were created or changed.
        #[serde(rename = "updatedOrders", default)]
        updated_orders: Vec<Order>,
        /// Ids of orders that completed or were cancelled.
        #[serde(rename = "completedOrderIds", default)]
        completed_order_ids: Vec<String>,
        /// Newly observed history orders.
        #[serde(rename = "historyOrders", default)]
        history_orders: Vec<Order>,
        /// Newly observed deals.
        #[serde(default)]
        deals: Vec<Deal>,
    },
    /// Deal history replay for the current `synchronize` pass has
    /// finished.
    #[serde(rename = "dealSynchronizationFinished")]
    DealSynchronizationFinished {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// Correlation token from the triggering `synchronize` request.
        #[serde(rename = "synchronizationId")]
        synchronization_id: String,
    },
    /// Order history replay for the current `synchronize` pass has
    /// finished.
    #[serde(rename = "orderSynchronizationFinished")]
    OrderSynchronizationFinished {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// Correlation token from the triggering `synchronize` request.
        #[serde(rename = "synchronizationId")]
        synchronization_id: String,
    },
    /// Broker connectivity heartbeat.
    #[serde(rename = "status")]
    Status {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// Whether the remote terminal is connected to its broker.
        connected: bool,
    },
    /// A page of symbol specifications.
    #[serde(rename = "specifications")]
    Specifications {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly.
        #[serde(rename = "sequenceNumber")]
        sequence_number: Option<u64>,
        /// The specifications themselves.
        specifications: Vec<SymbolSpecification>,
    },
    /// A batch of price ticks. Sequence numbers are present but the
    /// orderer tolerates their absence (§3).
    #[serde(rename = "prices")]
    Prices {
        /// Owning account.
        #[serde(rename = "accountId")]
        account_id: String,
        /// Sequence number for reassembly, when present.
        #[serde(rename = "sequenceNumber", default)]
        sequence_number: Option<u64>,
        /// The ticks themselves.
        prices: Vec<Price>,
    },
}

impl SynchronizationPacket {
    /// The owning account for any packet variant.
    #[must_use]
    pub fn account_id(&self) -> &str {
        match self {
            Self::Authenticated { account_id }
            | Self::Disconnected { account_id }
            | Self::SynchronizationStarted { account_id, .. }
            | Self::AccountInformation { account_id, .. }
            | Self::Positions { account_id, .. }
            | Self::Orders { account_id, .. }
            | Self::HistoryOrders { account_id, .. }
            | Self::Deals { account_id, .. }
            | Self::Update { account_id, .. }
            | Self::DealSynchronizationFinished { account_id, .. }
            | Self::OrderSynchronizationFinished { account_id, .. }
            | Self::Status { account_id, .. }
            | Self::Specifications { account_id, .. }
            | Self::Prices { account_id, .. } => account_id,
        }
    }

    /// The packet's sequence number, if it carries one.
    #[must_use]
    pub const fn sequence_number(&self) -> Option<u64> {
        match self {
            Self::Authenticated { .. } | Self::Disconnected { .. } => None,
            Self::SynchronizationStarted {
                sequence_number, ..
            }
            | Self::AccountInformation {
                sequence_number, ..
            }
            | Self::Positions {
                sequence_number, ..
            }
            | Self::Orders {
                sequence_number, ..
            }
            | Self::HistoryOrders {
                sequence_number, ..
            }
            | Self::Deals {
                sequence_number, ..
            }
            | Self::Update {
                sequence_number, ..
            }
            | Self::DealSynchronizationFinished {
                sequence_number, ..
            }
            | Self::OrderSynchronizationFinished {
                sequence_number, ..
            }
            | Self::Status {
                sequence_number, ..
            }
            | Self::Specifications {
                sequence_number, ..
            }
            | Self::Prices {
                sequence_number, ..
            } => *sequence_number,
        }
    }

    /// `type` discriminant string, used for logging and the packet
    /// logger's compression policy dispatch.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::Disconnected { .. } => "disconnected",
            Self::SynchronizationStarted { .. } => "synchronizationStarted",
            Self::AccountInformation { .. } => "accountInformation",
            Self::Positions { .. } => "positions",
            Self::Orders { .. } => "orders",
            Self::HistoryOrders { .. } => "historyOrders",
            Self::Deals { .. } => "deals",
            Self::Update { .. } => "update",
            Self::DealSynchronizationFinished { .. } => "dealSynchronizationFinished",
            Self::OrderSynchronizationFinished { .. } => "orderSynchronizationFinished",
            Self::Status { .. } => "status",
            Self::Specifications { .. } => "specifications",
            Self::Prices { .. } => "prices",
        }
    }
}

/// A single record in the packet logger's per-account journal file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// Wall-clock time the packet was journaled.
    pub time: DateTime<Utc>,
    /// The packet's sequence number, if any.
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: Option<u64>,
    /// The serialized packet, or a compression terminator string.
    pub message: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synchronization_started_round_trips_account_and_sequence() {
        let json = serde_json::json!({
            "type": "synchronizationStarted",
            "accountId": "acc-1",
            "sequenceNumber": 10,
            "synchronizationId": "sync-1"
        });
        let packet: SynchronizationPacket = serde_json::from_value(json).unwrap();
        assert_eq!(packet.account_id(), "acc-1");
        assert_eq!(packet.sequence_number(), Some(10));
        assert_eq!(packet.type_name(), "synchronizationStarted");
    }

    #[test]
    fn status_packet_has_no_sequence_requirement() {
        let json = serde_json::json!({
            "type": "status",
            "accountId": "acc-1",
            "connected": true
        });
        let packet: SynchronizationPacket = serde_json::from_value(json).unwrap();
        assert!(matches!(packet, SynchronizationPacket::Status { connected: true, .. }));
    }

    #[test]
    fn inbound_frame_dispatches_response_vs_synchronization() {
        let response = serde_json::json!({"requestId": "r1", "response": {"ok": true}});
        let frame: InboundFrame = serde_json::from_value(response).unwrap();
        assert!(matches!(frame, InboundFrame::Response(_)));

        let sync = serde_json::json!({"type": "disconnected", "accountId": "acc-1"});
        let frame: InboundFrame = serde_json::from_value(sync).unwrap();
        assert!(matches!(frame, InboundFrame::Synchronization(_)));
    }
}
