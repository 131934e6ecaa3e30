use core_types::{Side, TradeRequest};
use sha2::{Digest, Sha256};

/// Derives a stable idempotency key from the canonicalized request.
///
/// Two logically identical requests always hash to the same key, so a retried
/// submission dedups instead of double-executing. The notional is normalized
/// first so `1000` and `1000.00` canonicalize identically.
pub fn derive_idempotency_key(request: &TradeRequest) -> String {
    let side = match request.side {
        Side::Long => "long",
        Side::Short => "short",
    };
    let canonical = format!(
        "{}|{}|{}|{:.6}",
        request.symbol.0,
        side,
        request.requested_notional.normalize(),
        request.confidence,
    );
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::Symbol;
    use rust_decimal_macros::dec;

    fn request(symbol: &str, notional: rust_decimal::Decimal, confidence: f64) -> TradeRequest {
        TradeRequest::new(Symbol(symbol.to_string()), Side::Long, notional, confidence).unwrap()
    }

    #[test]
    fn identical_requests_derive_identical_keys() {
        let a = request("BTCUSDT", dec!(1000), 0.8);
        let b = request("BTCUSDT", dec!(1000), 0.8);
        assert_eq!(derive_idempotency_key(&a), derive_idempotency_key(&b));
    }

    #[test]
    fn trailing_zeros_do_not_change_the_key() {
        let a = request("BTCUSDT", dec!(1000), 0.8);
        let b = request("BTCUSDT", dec!(1000.00), 0.8);
        assert_eq!(derive_idempotency_key(&a), derive_idempotency_key(&b));
    }

    #[test]
    fn any_field_change_produces_a_different_key() {
        let base = request("BTCUSDT", dec!(1000), 0.8);
        let key = derive_idempotency_key(&base);

        assert_ne!(key, derive_idempotency_key(&request("ETHUSDT", dec!(1000), 0.8)));
        assert_ne!(key, derive_idempotency_key(&request("BTCUSDT", dec!(1001), 0.8)));
        assert_ne!(key, derive_idempotency_key(&request("BTCUSDT", dec!(1000), 0.7)));

        let mut short = base;
        short.side = Side::Short;
        assert_ne!(key, derive_idempotency_key(&short));
    }
}
