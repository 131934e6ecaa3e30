use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use core_types::Symbol;
use num_traits::ToPrimitive;
use resilience::{BreakerError, Cache, CircuitBreaker};
use risk::VolatilityProvider;
use rust_decimal::Decimal;

use crate::error::{Error, Result};
use crate::ExchangeApi;

/// Hourly bars annualized: 24 * 365 periods per year.
const PERIODS_PER_YEAR: f64 = 8760.0;
const VOL_WINDOW: u16 = 168;

/// Market-data reads shielded by a TTL cache and their own circuit breaker,
/// so a flapping data endpoint neither hammers the exchange nor blocks order
/// submission.
pub struct MarketData<A: ExchangeApi> {
    api: Arc<A>,
    breaker: Arc<CircuitBreaker>,
    vol_cache: Cache<Symbol, f64>,
}

impl<A: ExchangeApi> MarketData<A> {
    pub fn new(api: Arc<A>, breaker: Arc<CircuitBreaker>, ttl: Duration, capacity: usize) -> Self {
        Self {
            api,
            breaker,
            vol_cache: Cache::new(ttl, capacity),
        }
    }

    /// The latest mark price, fetched through the breaker. Prices move too
    /// fast to cache.
    pub async fn mark_price(&self, symbol: &Symbol) -> Result<Decimal> {
        self.breaker
            .call(|| self.api.mark_price(symbol))
            .await
            .map_err(flatten)
    }

    /// Annualized realized volatility over the recent close history, cached
    /// per symbol for the configured TTL.
    pub async fn realized_vol(&self, symbol: &Symbol) -> Result<f64> {
        self.vol_cache
            .get_or_compute(symbol.clone(), || async {
                let closes = self
                    .breaker
                    .call(|| self.api.recent_closes(symbol, VOL_WINDOW))
                    .await
                    .map_err(flatten)?;
                annualized_vol(&closes)
                    .ok_or_else(|| Error::InsufficientHistory(symbol.0.clone()))
            })
            .await
    }

    pub fn invalidate(&self, symbol: &Symbol) {
        self.vol_cache.invalidate(symbol);
    }
}

fn flatten(err: BreakerError<Error>) -> Error {
    match err {
        BreakerError::Open { operation } => Error::CircuitOpen(operation),
        BreakerError::Inner(inner) => inner,
    }
}

/// Annualized standard deviation of log returns; `None` below two closes.
fn annualized_vol(closes: &[Decimal]) -> Option<f64> {
    if closes.len() < 2 {
        return None;
    }
    let prices: Vec<f64> = closes.iter().filter_map(|c| c.to_f64()).collect();
    let returns: Vec<f64> = prices
        .windows(2)
        .filter(|w| w[0] > 0.0 && w[1] > 0.0)
        .map(|w| (w[1] / w[0]).ln())
        .collect();
    if returns.is_empty() {
        return None;
    }
    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / returns.len() as f64;
    Some(variance.sqrt() * PERIODS_PER_YEAR.sqrt())
}

#[async_trait]
impl<A: ExchangeApi> VolatilityProvider for MarketData<A> {
    async fn realized_vol(&self, symbol: &Symbol) -> risk::Result<f64> {
        MarketData::realized_vol(self, symbol)
            .await
            .map_err(|err| risk::Error::VolatilityUnavailable(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PlaceOrderRequest, PlaceOrderResponse};
    use resilience::BreakerConfig;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FakeApi {
        closes: Vec<Decimal>,
        calls: AtomicU32,
        fail: bool,
    }

    impl FakeApi {
        fn with_closes(closes: Vec<Decimal>) -> Self {
            Self {
                closes,
                calls: AtomicU32::new(0),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                closes: Vec::new(),
                calls: AtomicU32::new(0),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl ExchangeApi for FakeApi {
        async fn place_order(&self, _request: &PlaceOrderRequest) -> Result<PlaceOrderResponse> {
            unimplemented!("market-data tests never place orders")
        }

        async fn mark_price(&self, _symbol: &Symbol) -> Result<Decimal> {
            if self.fail {
                return Err(Error::ApiError {
                    code: -1,
                    msg: "down".into(),
                });
            }
            Ok(dec!(50000))
        }

        async fn recent_closes(&self, _symbol: &Symbol, _limit: u16) -> Result<Vec<Decimal>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(Error::ApiError {
                    code: -1,
                    msg: "down".into(),
                });
            }
            Ok(self.closes.clone())
        }
    }

    fn market_data(api: FakeApi, threshold: u32) -> MarketData<FakeApi> {
        let breaker = Arc::new(CircuitBreaker::new(
            "market-data",
            BreakerConfig {
                threshold,
                timeout: Duration::from_secs(30),
            },
        ));
        MarketData::new(Arc::new(api), breaker, Duration::from_secs(60), 16)
    }

    fn symbol() -> Symbol {
        Symbol("BTCUSDT".into())
    }

    #[test]
    fn constant_prices_have_zero_volatility() {
        let closes = vec![dec!(100); 10];
        assert_eq!(annualized_vol(&closes), Some(0.0));
    }

    #[test]
    fn volatility_needs_at_least_two_closes() {
        assert!(annualized_vol(&[dec!(100)]).is_none());
        assert!(annualized_vol(&[]).is_none());
    }

    #[test]
    fn moving_prices_have_positive_volatility() {
        let closes = vec![dec!(100), dec!(101), dec!(99), dec!(102), dec!(98)];
        let vol = annualized_vol(&closes).unwrap();
        assert!(vol > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn realized_vol_is_cached_per_symbol() {
        let md = market_data(
            FakeApi::with_closes(vec![dec!(100), dec!(101), dec!(102)]),
            3,
        );

        let first = md.realized_vol(&symbol()).await.unwrap();
        let second = md.realized_vol(&symbol()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(md.api.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_opens_after_repeated_market_data_failures() {
        let md = market_data(FakeApi::failing(), 2);

        assert!(md.realized_vol(&symbol()).await.is_err());
        assert!(md.realized_vol(&symbol()).await.is_err());

        // The third call fails fast; the upstream is not touched again.
        let err = md.realized_vol(&symbol()).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
        assert_eq!(md.api.calls.load(Ordering::SeqCst), 2);
    }
}
