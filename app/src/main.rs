use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use core_types::{OrderRecord, RiskViolation, Side, Symbol};
use engine::TradePipeline;
use engine::signal::ConstantModel;
use events::GateEvent;
use exchange_client::{HttpExchangeClient, MarketData};
use execution::OrderExecutor;
use resilience::{BatchQueue, BreakerConfig, CircuitBreaker, PoolConfig, RetryPolicy};
use risk::{GateSettings, PositionSizer, RiskGate, RiskState};
use tokio::sync::broadcast;

/// Terminal orders stay in the idempotency table this long.
const ORDER_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A risk gate between signal producers and the exchange.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the gate pipeline in the configured trading mode.
    Run,

    /// Loads and validates the configuration, then exits.
    CheckConfig,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => run_app().await?,
        Commands::CheckConfig => {
            let settings = app_config::load_settings()?;
            println!(
                "configuration OK: mode={:?}, {} symbol(s), drawdown limit {}",
                settings.app.trading_mode,
                settings.app.symbols.len(),
                settings.risk.max_drawdown_pct
            );
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str) {
    let level: tracing::Level = log_level.parse().unwrap_or(tracing::Level::INFO);
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn breaker_config(settings: &app_config::types::BreakerSettings) -> BreakerConfig {
    BreakerConfig {
        threshold: settings.threshold,
        timeout: Duration::from_secs(settings.timeout_secs),
    }
}

/// The primary logic for the `run` command: instantiate every component and
/// drive the pipeline until shutdown.
async fn run_app() -> Result<()> {
    // --- 1. Initialization ---
    let settings = app_config::load_settings()?;
    init_tracing(&settings.app.log_level);
    tracing::info!(mode = ?settings.app.trading_mode, "starting breakwater");

    let db = database::connect(&settings.database).await?;
    tracing::info!("database connection established and migrations are up-to-date");

    let (events_tx, _) = broadcast::channel::<GateEvent>(1024);
    spawn_event_logger(events_tx.subscribe());

    let api = Arc::new(HttpExchangeClient::new(&settings.exchange));

    let retry = RetryPolicy::new(
        settings.retry.attempts,
        Duration::from_millis(settings.retry.base_delay_ms),
    );

    // --- 2. Persistence sinks (batched, breaker + retry around each flush) ---
    let persistence_breaker = Arc::new(
        CircuitBreaker::new("persistence", breaker_config(&settings.breakers.persistence))
            .with_events(events_tx.clone()),
    );

    let order_sink = {
        let db = db.clone();
        let breaker = persistence_breaker.clone();
        let retry = retry.clone();
        BatchQueue::new(
            settings.batch.size,
            Duration::from_millis(settings.batch.flush_interval_ms),
            move |batch: Vec<OrderRecord>| {
                let db = db.clone();
                let breaker = breaker.clone();
                let retry = retry.clone();
                async move {
                    let result = breaker.call(|| retry.run(|| db.upsert_orders(&batch))).await;
                    if let Err(err) = result {
                        tracing::error!(error = %err, "order batch flush failed");
                    }
                }
            },
        )
    };

    let audit_sink = {
        let db = db.clone();
        let breaker = persistence_breaker.clone();
        let retry = retry.clone();
        BatchQueue::new(
            settings.batch.size,
            Duration::from_millis(settings.batch.flush_interval_ms),
            move |batch: Vec<RiskViolation>| {
                let db = db.clone();
                let breaker = breaker.clone();
                let retry = retry.clone();
                async move {
                    let result = breaker
                        .call(|| retry.run(|| db.insert_risk_violations(&batch)))
                        .await;
                    if let Err(err) = result {
                        tracing::error!(error = %err, "audit batch flush failed");
                    }
                }
            },
        )
    };

    // --- 3. Component Instantiation ---
    let market_data = Arc::new(MarketData::new(
        api.clone(),
        Arc::new(
            CircuitBreaker::new("market-data", breaker_config(&settings.breakers.market_data))
                .with_events(events_tx.clone()),
        ),
        Duration::from_secs(settings.cache.ttl_secs),
        settings.cache.capacity,
    ));

    let symbol_caps = settings
        .risk
        .symbol_caps
        .iter()
        .map(|(symbol, cap)| (Symbol(symbol.clone()), *cap))
        .collect();
    let state = Arc::new(RiskState::new(settings.risk.per_symbol_usd_cap, symbol_caps));

    let gate = RiskGate::new(
        state.clone(),
        PositionSizer::new(settings.risk.target_ann_vol, settings.risk.vol_epsilon),
        GateSettings {
            max_drawdown_pct: settings.risk.max_drawdown_pct,
            confidence_threshold: settings.risk.confidence_threshold,
        },
        market_data.clone(),
        events_tx.clone(),
    );

    let executor = OrderExecutor::new(
        api.clone(),
        CircuitBreaker::new(
            "order-submission",
            breaker_config(&settings.breakers.order_submission),
        )
        .with_events(events_tx.clone()),
        retry.clone(),
        PoolConfig {
            max: settings.pool.max_connections,
            acquire_timeout: Duration::from_millis(settings.pool.acquire_timeout_ms),
        },
        order_sink.clone(),
        events_tx.clone(),
        ORDER_RETENTION,
    );

    // Until a model service is wired in, a zero-confidence placeholder keeps
    // the gate rejecting every signal.
    tracing::warn!("no model service configured; using a zero-confidence placeholder model");
    let model = Box::new(ConstantModel::new(Side::Long, 0.0));

    let pipeline = TradePipeline::new(
        settings.app.trading_mode,
        settings.app.base_notional_usd,
        settings.app.initial_equity_usd,
        model,
        gate,
        executor,
        market_data,
        state,
        audit_sink.clone(),
    );

    let symbols: Vec<Symbol> = settings
        .app
        .symbols
        .iter()
        .map(|s| Symbol(s.clone()))
        .collect();
    let poll_interval = Duration::from_secs(settings.app.snapshot_interval_secs);

    // --- 4. Run until shutdown ---
    tokio::select! {
        result = pipeline.run(&symbols, poll_interval) => {
            tracing::error!(?result, "trade pipeline terminated unexpectedly");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }

    // Drain whatever the batch queues still hold before exiting.
    order_sink.flush().await;
    audit_sink.flush().await;

    Ok(())
}

fn spawn_event_logger(mut events: broadcast::Receiver<GateEvent>) {
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match &event {
                GateEvent::RiskBreach(breach) => {
                    tracing::warn!(
                        drawdown = %breach.drawdown_pct,
                        limit = %breach.limit_pct,
                        "RISK BREACH: gate locked until operator reset"
                    );
                }
                GateEvent::BreakerOpened(transition) => {
                    tracing::warn!(
                        operation = %transition.operation,
                        failures = transition.failure_count,
                        "circuit opened"
                    );
                }
                GateEvent::BreakerClosed(transition) => {
                    tracing::info!(operation = %transition.operation, "circuit closed");
                }
                GateEvent::OrderFilled(order) => {
                    tracing::info!(order_id = order.id, symbol = %order.symbol, "order filled");
                }
                GateEvent::OrderRejected(order) => {
                    tracing::warn!(order_id = order.id, symbol = %order.symbol, "order rejected");
                }
            }
        }
    });
}
