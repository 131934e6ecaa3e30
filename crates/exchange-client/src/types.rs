use core_types::{OrderType, Side, Symbol};
use rust_decimal::Decimal;
use serde::Deserialize;

/// The outbound order as the executor hands it to the exchange collaborator.
#[derive(Debug, Clone)]
pub struct PlaceOrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    /// Quote-denominated quantity (USD notional).
    pub quote_qty: Decimal,
    /// Echoed by the exchange; the same id is never executed twice.
    pub client_order_id: String,
}

/// The exchange's definitive answer to a placement.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderOutcome {
    Filled { execution_price: Decimal },
    Rejected { reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlaceOrderResponse {
    pub order_id: String,
    pub outcome: OrderOutcome,
}

/// Wire shape of the order endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawOrderResponse {
    pub order_id: String,
    pub status: String,
    #[serde(default)]
    pub avg_price: Option<Decimal>,
    #[serde(default)]
    pub reject_reason: Option<String>,
}

/// Wire shape of the ticker endpoint response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RawTicker {
    pub mark_price: Decimal,
}

/// Klines arrive as positional arrays; only the close (index 4) is consumed.
#[derive(Debug, Deserialize)]
pub(crate) struct RawKline(
    pub i64,    // open time
    pub String, // open
    pub String, // high
    pub String, // low
    pub String, // close
    pub String, // volume
    pub i64,    // close time
);
