use rust_decimal::Decimal;

/// Rolling equity and peak tracking for the drawdown feedback loop.
#[derive(Debug)]
pub struct EquityTracker {
    equity: Decimal,
    peak: Decimal,
}

impl EquityTracker {
    pub fn new(initial_equity: Decimal) -> Self {
        Self {
            equity: initial_equity,
            peak: initial_equity,
        }
    }

    /// Applies realized P&L and returns the rolling drawdown as a signed
    /// fraction (zero at the peak, negative below it).
    pub fn apply_realized_pnl(&mut self, pnl: Decimal) -> Decimal {
        self.equity += pnl;
        if self.equity > self.peak {
            self.peak = self.equity;
        }
        if self.peak <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (self.equity - self.peak) / self.peak
    }

    pub fn equity(&self) -> Decimal {
        self.equity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn drawdown_is_zero_at_a_fresh_peak() {
        let mut tracker = EquityTracker::new(dec!(1000));
        assert_eq!(tracker.apply_realized_pnl(dec!(50)), Decimal::ZERO);
        assert_eq!(tracker.equity(), dec!(1050));
    }

    #[test]
    fn losses_below_the_peak_produce_a_negative_fraction() {
        let mut tracker = EquityTracker::new(dec!(1000));
        tracker.apply_realized_pnl(dec!(100)); // peak 1100
        let drawdown = tracker.apply_realized_pnl(dec!(-220));
        assert_eq!(drawdown, dec!(-0.2));
    }

    #[test]
    fn recovery_moves_the_drawdown_back_toward_zero() {
        let mut tracker = EquityTracker::new(dec!(1000));
        tracker.apply_realized_pnl(dec!(-200));
        let drawdown = tracker.apply_realized_pnl(dec!(200));
        assert_eq!(drawdown, Decimal::ZERO);
    }
}
