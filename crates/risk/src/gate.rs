use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use core_types::{SizedOrder, Symbol, TradeMode, TradeRequest};
use events::{GateEvent, RiskBreachEvent};
use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::error::{Rejection, Result};
use crate::keys::derive_idempotency_key;
use crate::sizer::PositionSizer;
use crate::state::RiskState;

/// Thresholds the gate enforces; immutable after startup.
#[derive(Debug, Clone)]
pub struct GateSettings {
    pub max_drawdown_pct: Decimal,
    pub confidence_threshold: f64,
}

/// Supplies the realized-volatility estimate the sizer needs. Backed by the
/// market-data collaborator in production and stubbed in tests.
#[async_trait]
pub trait VolatilityProvider: Send + Sync {
    async fn realized_vol(&self, symbol: &Symbol) -> Result<f64>;
}

/// Orchestrates [`RiskState`], [`PositionSizer`], and idempotency-key
/// derivation into an accept/reject decision for one trade request.
///
/// `evaluate` only reads shared state; mutation happens exclusively on the
/// order-feedback path.
pub struct RiskGate {
    state: Arc<RiskState>,
    sizer: PositionSizer,
    settings: GateSettings,
    vol: Arc<dyn VolatilityProvider>,
    events: broadcast::Sender<GateEvent>,
    /// Announce a drawdown lock once per breach, not once per request.
    breach_announced: AtomicBool,
}

impl RiskGate {
    pub fn new(
        state: Arc<RiskState>,
        sizer: PositionSizer,
        settings: GateSettings,
        vol: Arc<dyn VolatilityProvider>,
        events: broadcast::Sender<GateEvent>,
    ) -> Self {
        Self {
            state,
            sizer,
            settings,
            vol,
            events,
            breach_announced: AtomicBool::new(false),
        }
    }

    /// Evaluates one request, short-circuiting on the first failed check:
    /// drawdown halt (live mode), confidence filter, per-symbol cap, then
    /// volatility-targeted sizing and key derivation.
    pub async fn evaluate(
        &self,
        request: &TradeRequest,
        mode: TradeMode,
    ) -> std::result::Result<SizedOrder, Rejection> {
        if mode == TradeMode::Halt {
            return Err(Rejection::RiskLocked {
                drawdown_pct: self.state.drawdown_pct().await,
                limit_pct: self.settings.max_drawdown_pct,
            });
        }

        if mode == TradeMode::Live {
            if self
                .state
                .is_drawdown_breached(self.settings.max_drawdown_pct)
                .await
            {
                let drawdown_pct = self.state.drawdown_pct().await;
                if !self.breach_announced.swap(true, Ordering::SeqCst) {
                    let _ = self.events.send(GateEvent::RiskBreach(RiskBreachEvent {
                        drawdown_pct,
                        limit_pct: self.settings.max_drawdown_pct,
                        at: Utc::now(),
                    }));
                }
                return Err(Rejection::RiskLocked {
                    drawdown_pct,
                    limit_pct: self.settings.max_drawdown_pct,
                });
            }
            self.breach_announced.store(false, Ordering::SeqCst);
        }

        if request.confidence < self.settings.confidence_threshold {
            return Err(Rejection::LowConfidence {
                min: self.settings.confidence_threshold,
                got: request.confidence,
            });
        }

        if !self
            .state
            .within_cap(&request.symbol, request.requested_notional)
            .await
        {
            return Err(Rejection::CapExceeded {
                symbol: request.symbol.clone(),
                cap_usd: self.state.cap_for(&request.symbol).await,
                requested: request.requested_notional,
            });
        }

        let realized_vol = match self.vol.realized_vol(&request.symbol).await {
            Ok(vol) => vol,
            Err(err) => {
                // The stub value is the target itself: sizing degrades to a
                // pass-through rather than blocking the trade.
                tracing::warn!(symbol = %request.symbol, error = %err, "volatility estimate unavailable, using target");
                self.sizer.target_vol()
            }
        };
        let sized_notional = self
            .sizer
            .size_by_vol_target(request.requested_notional, realized_vol);

        let idempotency_key = request
            .idempotency_key
            .clone()
            .unwrap_or_else(|| derive_idempotency_key(request));

        Ok(SizedOrder {
            symbol: request.symbol.clone(),
            side: request.side,
            sized_notional,
            idempotency_key,
        })
    }
}
