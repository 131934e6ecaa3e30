use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A trading symbol, e.g. "BTCUSDT".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The direction of an order or position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

/// The mode the gate is operating in.
///
/// `Paper` skips the drawdown halt (no real capital at risk), `Live` enforces
/// every check, and `Halt` rejects all traffic until an operator intervenes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeMode {
    Paper,
    Live,
    Halt,
}

/// The order type forwarded to the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

/// A proposed trade, produced once per signal and consumed once by the gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRequest {
    pub symbol: Symbol,
    pub side: Side,
    pub requested_notional: Decimal,
    /// Model confidence in the signal, in [0, 1].
    pub confidence: f64,
    /// Caller-supplied idempotency key; derived by the gate when absent.
    pub idempotency_key: Option<String>,
}

impl TradeRequest {
    /// Builds a request, rejecting out-of-range inputs up front.
    pub fn new(
        symbol: Symbol,
        side: Side,
        requested_notional: Decimal,
        confidence: f64,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(Error::ConfidenceOutOfRange(confidence));
        }
        if requested_notional <= Decimal::ZERO {
            return Err(Error::NonPositiveNotional(requested_notional));
        }
        Ok(Self {
            symbol,
            side,
            requested_notional,
            confidence,
            idempotency_key: None,
        })
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }
}

/// An accepted, volatility-sized order ready for submission.
///
/// Invariants: `sized_notional` never exceeds the per-symbol cap nor the
/// originally requested notional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizedOrder {
    pub symbol: Symbol,
    pub side: Side,
    pub sized_notional: Decimal,
    pub idempotency_key: String,
}

/// Why an order ended up rejected downstream of the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum RejectReason {
    /// The exchange answered with a definitive rejection.
    Exchange(String),
    /// The retry budget was exhausted against a failing downstream.
    DownstreamFailure(String),
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Exchange(_) => "exchange_rejected",
            RejectReason::DownstreamFailure(_) => "downstream_failure",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectReason::Exchange(msg) => write!(f, "exchange_rejected: {msg}"),
            RejectReason::DownstreamFailure(msg) => write!(f, "downstream_failure: {msg}"),
        }
    }
}

/// The lifecycle state of an [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Filled {
        exchange_order_id: String,
        qty: Decimal,
        execution_price: Decimal,
    },
    Rejected {
        reason: RejectReason,
    },
}

/// An order owned by the executor, one per unique idempotency key within the
/// retention window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub idempotency_key: String,
    pub symbol: Symbol,
    pub side: Side,
    pub notional: Decimal,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn pending(id: u64, sized: &SizedOrder, now: DateTime<Utc>) -> Self {
        Self {
            id,
            idempotency_key: sized.idempotency_key.clone(),
            symbol: sized.symbol.clone(),
            side: sized.side,
            notional: sized.sized_notional,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, OrderStatus::Pending)
    }
}

/// A realized execution, fed back into risk state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: Symbol,
    pub side: Side,
    pub qty: Decimal,
    pub price: Decimal,
    pub notional: Decimal,
    /// Realized P&L released by this fill; zero for pure entries.
    pub realized_pnl: Decimal,
}

/// A flat, persistence-friendly view of an [`Order`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: i64,
    pub idempotency_key: String,
    pub symbol: String,
    pub side: Side,
    pub notional: Decimal,
    pub status: String,
    pub exchange_order_id: Option<String>,
    pub execution_price: Option<Decimal>,
    pub reject_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderRecord {
    fn from(order: &Order) -> Self {
        let (status, exchange_order_id, execution_price, reject_reason) = match &order.status {
            OrderStatus::Pending => ("pending", None, None, None),
            OrderStatus::Filled {
                exchange_order_id,
                execution_price,
                ..
            } => (
                "filled",
                Some(exchange_order_id.clone()),
                Some(*execution_price),
                None,
            ),
            OrderStatus::Rejected { reason } => ("rejected", None, None, Some(reason.to_string())),
        };
        Self {
            id: order.id as i64,
            idempotency_key: order.idempotency_key.clone(),
            symbol: order.symbol.0.clone(),
            side: order.side,
            notional: order.notional,
            status: status.to_string(),
            exchange_order_id,
            execution_price,
            reject_reason,
            updated_at: order.updated_at,
        }
    }
}

/// An audit row recording a gate rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskViolation {
    pub code: String,
    pub symbol: String,
    pub detail: String,
    pub at: DateTime<Utc>,
}

/// The market context handed to the alpha model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub mid_price: Decimal,
    pub as_of: DateTime<Utc>,
}

/// The alpha model's output: a direction and how sure it is.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: Side,
    pub confidence: f64,
}
