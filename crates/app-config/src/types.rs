use std::collections::HashMap;

use core_types::TradeMode;
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{Error, Result};

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    /// Settings for the exchange REST API.
    pub exchange: ExchangeSettings,
    /// Settings for the database connection.
    pub database: DatabaseSettings,
    pub risk: RiskSettings,
    pub breakers: BreakersSettings,
    pub pool: PoolSettings,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub batch: BatchSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
    /// The mode the gate starts in.
    pub trading_mode: TradeMode,
    /// The symbols the pipeline trades.
    pub symbols: Vec<String>,
    /// The notional each signal requests before sizing.
    pub base_notional_usd: Decimal,
    /// Starting equity for the drawdown feedback loop.
    pub initial_equity_usd: Decimal,
    /// How often the pipeline polls for a fresh snapshot.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ExchangeSettings {
    /// The API key for the exchange.
    pub api_key: String,
    /// The secret key for the exchange.
    pub secret_key: String,
    /// The REST API base URL for the exchange.
    pub rest_base_url: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct DatabaseSettings {
    /// The connection URL for the PostgreSQL database.
    pub url: String,
}

/// Risk-gate thresholds, immutable after startup.
#[derive(Deserialize, Debug, Clone)]
pub struct RiskSettings {
    /// Halt live trading once the rolling drawdown falls to -max_drawdown_pct.
    pub max_drawdown_pct: Decimal,
    /// Signals below this confidence are rejected.
    pub confidence_threshold: f64,
    /// Default per-symbol notional cap in USD.
    pub per_symbol_usd_cap: Decimal,
    /// Per-symbol cap overrides, keyed by symbol string.
    #[serde(default)]
    pub symbol_caps: HashMap<String, Decimal>,
    /// Annualized volatility the sizer targets.
    pub target_ann_vol: f64,
    /// Floor applied to realized volatility before dividing.
    #[serde(default = "default_vol_epsilon")]
    pub vol_epsilon: f64,
}

/// One circuit breaker configuration per protected operation class.
#[derive(Deserialize, Debug, Clone)]
pub struct BreakersSettings {
    pub order_submission: BreakerSettings,
    pub market_data: BreakerSettings,
    pub persistence: BreakerSettings,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BreakerSettings {
    /// Consecutive failures before the breaker opens.
    pub threshold: u32,
    /// Cooldown before a trial call is allowed through.
    pub timeout_secs: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct PoolSettings {
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct CacheSettings {
    pub ttl_secs: u64,
    pub capacity: usize,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RetrySettings {
    /// Total tries, including the first attempt.
    pub attempts: u32,
    pub base_delay_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
pub struct BatchSettings {
    pub size: usize,
    pub flush_interval_ms: u64,
}

fn default_vol_epsilon() -> f64 {
    1e-6
}

fn default_snapshot_interval() -> u64 {
    60
}

impl Settings {
    /// Validates every field once, at startup. Startup aborts on the first
    /// invalid value instead of deferring to the point of use.
    pub fn validate(&self) -> Result<()> {
        if self.app.symbols.is_empty() {
            return Err(invalid("app.symbols", "at least one symbol is required"));
        }
        if self.app.base_notional_usd <= Decimal::ZERO {
            return Err(invalid("app.base_notional_usd", "must be positive"));
        }
        if self.app.initial_equity_usd <= Decimal::ZERO {
            return Err(invalid("app.initial_equity_usd", "must be positive"));
        }
        if self.risk.max_drawdown_pct <= Decimal::ZERO || self.risk.max_drawdown_pct > Decimal::ONE
        {
            return Err(invalid("risk.max_drawdown_pct", "must be within (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.risk.confidence_threshold) {
            return Err(invalid("risk.confidence_threshold", "must be within [0, 1]"));
        }
        if self.risk.per_symbol_usd_cap <= Decimal::ZERO {
            return Err(invalid("risk.per_symbol_usd_cap", "must be positive"));
        }
        if let Some((symbol, cap)) = self
            .risk
            .symbol_caps
            .iter()
            .find(|(_, cap)| **cap <= Decimal::ZERO)
        {
            return Err(invalid(
                "risk.symbol_caps",
                format!("cap for {symbol} must be positive, got {cap}"),
            ));
        }
        if self.risk.target_ann_vol <= 0.0 {
            return Err(invalid("risk.target_ann_vol", "must be positive"));
        }
        if self.risk.vol_epsilon <= 0.0 {
            return Err(invalid("risk.vol_epsilon", "must be positive"));
        }
        for (field, breaker) in [
            ("breakers.order_submission", &self.breakers.order_submission),
            ("breakers.market_data", &self.breakers.market_data),
            ("breakers.persistence", &self.breakers.persistence),
        ] {
            if breaker.threshold == 0 {
                return Err(invalid(field, "threshold must be at least 1"));
            }
            if breaker.timeout_secs == 0 {
                return Err(invalid(field, "timeout_secs must be at least 1"));
            }
        }
        if self.pool.max_connections == 0 {
            return Err(invalid("pool.max_connections", "must be at least 1"));
        }
        if self.cache.capacity == 0 {
            return Err(invalid("cache.capacity", "must be at least 1"));
        }
        if self.retry.attempts == 0 {
            return Err(invalid("retry.attempts", "must be at least 1"));
        }
        if self.batch.size == 0 {
            return Err(invalid("batch.size", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> Error {
    Error::InvalidValue {
        field,
        reason: reason.into(),
    }
}
