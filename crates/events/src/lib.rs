// --- Typed gate events, broadcast to any interested subscriber ---

use chrono::{DateTime, Utc};
use core_types::Order;
use rust_decimal::Decimal;
use serde::Serialize;

/// A drawdown breach that locked the gate.
#[derive(Debug, Clone, Serialize)]
pub struct RiskBreachEvent {
    pub drawdown_pct: Decimal,
    pub limit_pct: Decimal,
    pub at: DateTime<Utc>,
}

/// A circuit breaker changed state for one operation class.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerTransition {
    pub operation: String,
    pub failure_count: u32,
    pub at: DateTime<Utc>,
}

/// The top-level event enum.
/// `tag` and `content` are used by serde for clean JSON representation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum GateEvent {
    RiskBreach(RiskBreachEvent),
    OrderFilled(Order),
    OrderRejected(Order),
    BreakerOpened(BreakerTransition),
    BreakerClosed(BreakerTransition),
}
