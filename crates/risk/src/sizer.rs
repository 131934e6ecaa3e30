use num_traits::FromPrimitive;
use rust_decimal::Decimal;

/// Converts a requested notional into a volatility-targeted notional.
///
/// The scale is `min(1, target_vol / max(epsilon, realized_vol))`: exposure
/// shrinks proportionally to how far current volatility exceeds the target
/// and is never amplified below 1.0. `epsilon` guards against a realized
/// volatility reported as zero.
#[derive(Debug, Clone)]
pub struct PositionSizer {
    target_vol: f64,
    epsilon: f64,
}

impl PositionSizer {
    pub fn new(target_vol: f64, epsilon: f64) -> Self {
        Self {
            target_vol,
            epsilon,
        }
    }

    pub fn target_vol(&self) -> f64 {
        self.target_vol
    }

    pub fn size_by_vol_target(&self, notional: Decimal, realized_vol: f64) -> Decimal {
        let scale = (self.target_vol / realized_vol.max(self.epsilon)).min(1.0);
        // A finite scale in (0, 1] always converts; anything degenerate
        // (NaN target, for instance) falls back to the unscaled notional.
        let scale = Decimal::from_f64(scale).unwrap_or(Decimal::ONE);
        notional * scale
    }
}
