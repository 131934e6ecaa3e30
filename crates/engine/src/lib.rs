//! The portfolio pipeline: signal -> gate -> executor, with the realized-P&L
//! feedback path closing the loop into risk state.

pub mod equity;
pub mod signal;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use core_types::{Fill, MarketSnapshot, RiskViolation, Symbol, TradeMode, TradeRequest};
use exchange_client::{ExchangeApi, MarketData};
use execution::{OrderExecutor, Submission};
use resilience::BatchQueue;
use risk::{RiskGate, RiskState};
use rust_decimal::Decimal;
use tokio::sync::Mutex;

use crate::equity::EquityTracker;
use crate::signal::SignalModel;

/// Ties one alpha model, the risk gate, and the executor together for a set
/// of symbols.
///
/// The pipeline is the only writer of shared risk state: fills flow through
/// [`TradePipeline::apply_fill`], which records exposure and refreshes the
/// rolling drawdown from realized P&L. `RiskGate::evaluate` itself never
/// mutates anything, so the cap check and the eventual exposure update are
/// two separate steps (see the documented race in DESIGN.md).
pub struct TradePipeline<A: ExchangeApi> {
    mode: TradeMode,
    base_notional: Decimal,
    model: Box<dyn SignalModel>,
    gate: RiskGate,
    executor: OrderExecutor<A>,
    market_data: Arc<MarketData<A>>,
    state: Arc<RiskState>,
    equity: Mutex<EquityTracker>,
    audit: BatchQueue<RiskViolation>,
}

impl<A: ExchangeApi> TradePipeline<A> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        mode: TradeMode,
        base_notional: Decimal,
        initial_equity: Decimal,
        model: Box<dyn SignalModel>,
        gate: RiskGate,
        executor: OrderExecutor<A>,
        market_data: Arc<MarketData<A>>,
        state: Arc<RiskState>,
        audit: BatchQueue<RiskViolation>,
    ) -> Self {
        Self {
            mode,
            base_notional,
            model,
            gate,
            executor,
            market_data,
            state,
            equity: Mutex::new(EquityTracker::new(initial_equity)),
            audit,
        }
    }

    /// Runs one snapshot through the full pipeline.
    ///
    /// Returns the submission when an order reached the exchange, `None` when
    /// the gate vetoed the trade or the submission breaker was open.
    pub async fn on_snapshot(&self, snapshot: MarketSnapshot) -> Result<Option<Submission>> {
        let prediction = self.model.predict(&snapshot);
        tracing::debug!(
            model = self.model.name(),
            symbol = %snapshot.symbol,
            ?prediction,
            "model prediction"
        );

        let request = TradeRequest::new(
            snapshot.symbol.clone(),
            prediction.direction,
            self.base_notional,
            prediction.confidence,
        )?;

        let sized = match self.gate.evaluate(&request, self.mode).await {
            Ok(sized) => sized,
            Err(rejection) => {
                tracing::warn!(
                    symbol = %request.symbol,
                    code = rejection.code(),
                    %rejection,
                    "trade vetoed by the gate"
                );
                self.audit.add(RiskViolation {
                    code: rejection.code().to_string(),
                    symbol: request.symbol.0.clone(),
                    detail: rejection.to_string(),
                    at: Utc::now(),
                });
                return Ok(None);
            }
        };

        match self.executor.submit(sized).await {
            Ok(submission) => {
                if let Some(fill) = &submission.fill {
                    self.apply_fill(fill).await;
                }
                Ok(Some(submission))
            }
            Err(execution::Error::CircuitOpen { operation }) => {
                // Fail-fast veto of the submission, not an error: the caller
                // may re-queue once the breaker heals.
                tracing::warn!(symbol = %request.symbol, %operation, "submission skipped, circuit open");
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// The feedback path: the single code path that mutates shared risk state.
    async fn apply_fill(&self, fill: &Fill) {
        self.state.record_fill(fill).await;
        let drawdown = self.equity.lock().await.apply_realized_pnl(fill.realized_pnl);
        self.state.update_drawdown(drawdown).await;
        tracing::info!(
            symbol = %fill.symbol,
            realized_pnl = %fill.realized_pnl,
            drawdown = %drawdown,
            "fill applied to risk state"
        );
    }

    pub async fn equity(&self) -> Decimal {
        self.equity.lock().await.equity()
    }

    /// The main, long-running loop: polls a snapshot per symbol per tick and
    /// runs each through the pipeline.
    pub async fn run(&self, symbols: &[Symbol], poll_interval: Duration) -> Result<()> {
        tracing::info!(
            mode = ?self.mode,
            symbols = symbols.len(),
            "starting trade pipeline"
        );
        let mut ticker = tokio::time::interval(poll_interval);

        loop {
            ticker.tick().await;
            for symbol in symbols {
                let mid_price = match self.market_data.mark_price(symbol).await {
                    Ok(price) => price,
                    Err(err) => {
                        tracing::warn!(%symbol, error = %err, "snapshot unavailable, skipping tick");
                        continue;
                    }
                };
                let snapshot = MarketSnapshot {
                    symbol: symbol.clone(),
                    mid_price,
                    as_of: Utc::now(),
                };
                if let Err(err) = self.on_snapshot(snapshot).await {
                    tracing::error!(%symbol, error = %err, "pipeline iteration failed");
                }
            }
        }
    }
}
