use core_types::Symbol;
use rust_decimal::Decimal;
use thiserror::Error;

/// An expected, non-fatal gate rejection. Never retried; surfaced to the
/// caller synchronously with a stable code.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Rejection {
    /// Fatal until an operator resets risk state; no further checks run.
    #[error("risk state locked: rolling drawdown {drawdown_pct} breached limit -{limit_pct}")]
    RiskLocked {
        drawdown_pct: Decimal,
        limit_pct: Decimal,
    },

    #[error("signal confidence {got:.3} is below the {min:.3} threshold")]
    LowConfidence { min: f64, got: f64 },

    #[error("requested notional {requested} exceeds the {cap_usd} USD cap for {symbol}")]
    CapExceeded {
        symbol: Symbol,
        cap_usd: Decimal,
        requested: Decimal,
    },
}

impl Rejection {
    /// Stable code for callers and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::RiskLocked { .. } => "risk_locked",
            Rejection::LowConfidence { .. } => "low_confidence",
            Rejection::CapExceeded { .. } => "exceeds_symbol_cap",
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("volatility source unavailable: {0}")]
    VolatilityUnavailable(String),
}

pub type Result<T> = std::result::Result<T, Error>;
