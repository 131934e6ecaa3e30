//! The outbound exchange collaborator: a signed REST client plus the
//! market-data layer (cache + circuit breaker) the sizer reads through.

use app_config::types::ExchangeSettings;
use async_trait::async_trait;
use chrono::Utc;
use core_types::{Side, Symbol};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde_json::Value;
use sha2::Sha256;

// Create a type alias for the HMAC-SHA256 implementation.
type HmacSha256 = Hmac<Sha256>;

pub mod error;
pub mod market_data;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use market_data::MarketData;
pub use types::{OrderOutcome, PlaceOrderRequest, PlaceOrderResponse};

use types::{RawKline, RawOrderResponse, RawTicker};

/// The exchange surface the executor and market-data layer depend on.
/// Production uses [`HttpExchangeClient`]; tests substitute a mock.
#[async_trait]
pub trait ExchangeApi: Send + Sync + 'static {
    /// Places an order. The exchange treats `client_order_id` as an
    /// idempotency key: replaying the same id returns the original result
    /// instead of executing twice.
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlaceOrderResponse>;

    async fn mark_price(&self, symbol: &Symbol) -> Result<Decimal>;

    /// Recent close prices, oldest first.
    async fn recent_closes(&self, symbol: &Symbol, limit: u16) -> Result<Vec<Decimal>>;
}

/// A REST client for the exchange, signing every mutating request with
/// HMAC-SHA256.
#[derive(Debug, Clone)]
pub struct HttpExchangeClient {
    http_client: reqwest::Client,
    api_key: String,
    secret_key: String,
    base_url: String,
}

impl HttpExchangeClient {
    pub fn new(settings: &ExchangeSettings) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            api_key: settings.api_key.clone(),
            secret_key: settings.secret_key.clone(),
            base_url: settings.rest_base_url.clone(),
        }
    }

    /// Generates an HMAC-SHA256 signature for a given query string.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        let result = mac.finalize();
        hex::encode(result.into_bytes())
    }

    /// Appends the timestamp and signature to a query string.
    fn create_signed_query(&self, params: &mut String) {
        let timestamp = Utc::now().timestamp_millis();
        if !params.is_empty() {
            params.push('&');
        }
        params.push_str(&format!("timestamp={}", timestamp));
        let signature = self.sign(params);
        params.push_str(&format!("&signature={}", signature));
    }

    /// Rejections arrive as `{"code": ..., "msg": ...}` objects; surface them
    /// as a structured error before deserializing the expected shape.
    fn check_api_error(value: &Value) -> Result<()> {
        if let Some(code) = value.get("code").and_then(Value::as_i64) {
            if code != 0 {
                let msg = value
                    .get("msg")
                    .and_then(Value::as_str)
                    .unwrap_or("Unknown error")
                    .to_string();
                return Err(Error::ApiError { code, msg });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ExchangeApi for HttpExchangeClient {
    async fn place_order(&self, request: &PlaceOrderRequest) -> Result<PlaceOrderResponse> {
        let side_str = match request.side {
            Side::Long => "BUY",
            Side::Short => "SELL",
        };
        let type_str = match request.order_type {
            core_types::OrderType::Market => "MARKET",
            core_types::OrderType::Limit => "LIMIT",
        };

        let mut params = format!(
            "symbol={}&side={}&type={}&quoteQty={:.2}&clientOrderId={}",
            request.symbol.0, side_str, type_str, request.quote_qty, request.client_order_id
        );
        self.create_signed_query(&mut params);

        let url = format!("{}/api/v1/order", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .header("X-API-KEY", &self.api_key)
            .body(params)
            .send()
            .await
            .map_err(Error::RequestFailed)?;

        let text = response.text().await.map_err(Error::RequestFailed)?;
        let value: Value = serde_json::from_str(&text).map_err(Error::DeserializationFailed)?;
        Self::check_api_error(&value)?;

        let raw: RawOrderResponse =
            serde_json::from_value(value).map_err(Error::DeserializationFailed)?;

        let outcome = match raw.status.as_str() {
            "FILLED" => OrderOutcome::Filled {
                execution_price: raw.avg_price.unwrap_or_default(),
            },
            _ => OrderOutcome::Rejected {
                reason: raw
                    .reject_reason
                    .unwrap_or_else(|| format!("exchange status {}", raw.status)),
            },
        };

        Ok(PlaceOrderResponse {
            order_id: raw.order_id,
            outcome,
        })
    }

    async fn mark_price(&self, symbol: &Symbol) -> Result<Decimal> {
        let url = format!("{}/api/v1/ticker?symbol={}", self.base_url, symbol.0);

        let text = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Error::RequestFailed)?
            .text()
            .await
            .map_err(Error::RequestFailed)?;

        let value: Value = serde_json::from_str(&text).map_err(Error::DeserializationFailed)?;
        Self::check_api_error(&value)?;

        let ticker: RawTicker = serde_json::from_value(value).map_err(Error::DeserializationFailed)?;
        Ok(ticker.mark_price)
    }

    async fn recent_closes(&self, symbol: &Symbol, limit: u16) -> Result<Vec<Decimal>> {
        let url = format!(
            "{}/api/v1/klines?symbol={}&interval=1h&limit={}",
            self.base_url, symbol.0, limit
        );

        let text = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(Error::RequestFailed)?
            .text()
            .await
            .map_err(Error::RequestFailed)?;

        let raw_klines: Vec<RawKline> = serde_json::from_str(&text).map_err(|e| {
            // A failure to parse the array may be an exchange error object.
            if let Ok(value) = serde_json::from_str::<Value>(&text) {
                if let Err(api_err) = Self::check_api_error(&value) {
                    return api_err;
                }
            }
            Error::DeserializationFailed(e)
        })?;

        Ok(raw_klines
            .into_iter()
            .map(|raw| raw.4.parse().unwrap_or_default())
            .collect())
    }
}
