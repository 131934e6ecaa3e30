use std::collections::HashMap;

use chrono::{DateTime, Utc};
use core_types::{Fill, Side, Symbol};
use rust_decimal::Decimal;
use tokio::sync::RwLock;

struct StateInner {
    /// Signed fraction, <= 0 whenever equity sits below its peak.
    rolling_drawdown_pct: Decimal,
    symbol_caps: HashMap<Symbol, Decimal>,
    /// Net open exposure per symbol, signed (long positive).
    open_exposure: HashMap<Symbol, Decimal>,
    realized_pnl: Decimal,
    last_update: DateTime<Utc>,
}

/// The single source of truth for rolling drawdown and per-symbol exposure
/// caps.
///
/// One instance is shared across the process; every mutation funnels through
/// the methods below so the state stays single-writer behind its lock. The
/// gate only ever reads; writes come from the order-feedback path.
pub struct RiskState {
    default_cap: Decimal,
    inner: RwLock<StateInner>,
}

impl RiskState {
    pub fn new(default_cap: Decimal, symbol_caps: HashMap<Symbol, Decimal>) -> Self {
        Self {
            default_cap,
            inner: RwLock::new(StateInner {
                rolling_drawdown_pct: Decimal::ZERO,
                symbol_caps,
                open_exposure: HashMap::new(),
                realized_pnl: Decimal::ZERO,
                last_update: Utc::now(),
            }),
        }
    }

    /// Overwrites the rolling drawdown with a fresh figure from realized P&L.
    /// No validation beyond the numeric type; callers serialize updates by
    /// going through the single feedback path.
    pub async fn update_drawdown(&self, pnl_pct_since_peak: Decimal) {
        let mut inner = self.inner.write().await;
        inner.rolling_drawdown_pct = pnl_pct_since_peak;
        inner.last_update = Utc::now();
    }

    pub async fn update_symbol_cap(&self, symbol: Symbol, cap: Decimal) {
        let mut inner = self.inner.write().await;
        inner.symbol_caps.insert(symbol, cap);
        inner.last_update = Utc::now();
    }

    /// True iff the rolling drawdown has fallen to `-|max_drawdown_pct|` or
    /// beyond.
    pub async fn is_drawdown_breached(&self, max_drawdown_pct: Decimal) -> bool {
        self.inner.read().await.rolling_drawdown_pct <= -max_drawdown_pct.abs()
    }

    /// True iff `|notional|` fits under the symbol's cap (override or default).
    pub async fn within_cap(&self, symbol: &Symbol, notional: Decimal) -> bool {
        let inner = self.inner.read().await;
        let cap = inner
            .symbol_caps
            .get(symbol)
            .copied()
            .unwrap_or(self.default_cap);
        notional.abs() <= cap
    }

    pub async fn cap_for(&self, symbol: &Symbol) -> Decimal {
        self.inner
            .read()
            .await
            .symbol_caps
            .get(symbol)
            .copied()
            .unwrap_or(self.default_cap)
    }

    /// Applies a fill from the feedback path: tracks net exposure and
    /// accumulates realized P&L.
    pub async fn record_fill(&self, fill: &Fill) {
        let mut inner = self.inner.write().await;
        let signed = match fill.side {
            Side::Long => fill.notional,
            Side::Short => -fill.notional,
        };
        let exposure = inner
            .open_exposure
            .entry(fill.symbol.clone())
            .or_insert(Decimal::ZERO);
        *exposure += signed;
        inner.realized_pnl += fill.realized_pnl;
        inner.last_update = Utc::now();
    }

    pub async fn drawdown_pct(&self) -> Decimal {
        self.inner.read().await.rolling_drawdown_pct
    }

    pub async fn open_exposure(&self, symbol: &Symbol) -> Decimal {
        self.inner
            .read()
            .await
            .open_exposure
            .get(symbol)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub async fn realized_pnl(&self) -> Decimal {
        self.inner.read().await.realized_pnl
    }

    pub async fn last_update(&self) -> DateTime<Utc> {
        self.inner.read().await.last_update
    }

    /// Operator action: clears the drawdown so a locked gate can resume.
    /// Caps and exposure bookkeeping survive the reset.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.rolling_drawdown_pct = Decimal::ZERO;
        inner.last_update = Utc::now();
        tracing::warn!("risk state reset by operator");
    }
}
