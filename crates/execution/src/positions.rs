use std::collections::HashMap;

use core_types::{Side, Symbol};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
struct NetPosition {
    /// Signed base quantity; positive when net long.
    qty: Decimal,
    avg_price: Decimal,
}

/// Net position per symbol, updated from fills.
///
/// Increasing a position blends the average entry price; reducing one
/// releases realized P&L against that average. A fill that crosses through
/// flat closes the old position and opens the remainder at the fill price.
#[derive(Debug, Default)]
pub struct PositionBook {
    positions: HashMap<Symbol, NetPosition>,
}

impl PositionBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a fill and returns the realized P&L it releases.
    pub fn apply_fill(
        &mut self,
        symbol: &Symbol,
        side: Side,
        qty: Decimal,
        price: Decimal,
    ) -> Decimal {
        let signed_qty = match side {
            Side::Long => qty,
            Side::Short => -qty,
        };

        let position = self.positions.entry(symbol.clone()).or_insert(NetPosition {
            qty: Decimal::ZERO,
            avg_price: Decimal::ZERO,
        });

        let realized = if position.qty.is_zero() || position.qty.signum() == signed_qty.signum() {
            // Same direction: blend the average entry price.
            let total = position.qty + signed_qty;
            position.avg_price = (position.qty.abs() * position.avg_price + qty * price)
                / total.abs();
            position.qty = total;
            Decimal::ZERO
        } else {
            let closing_qty = qty.min(position.qty.abs());
            let direction = position.qty.signum();
            let realized = (price - position.avg_price) * closing_qty * direction;

            let remainder = signed_qty + position.qty;
            if remainder.signum() == position.qty.signum() {
                // Partial close; the average entry survives.
                position.qty = remainder;
            } else {
                // Flat, or flipped through zero at the fill price.
                position.qty = remainder;
                position.avg_price = if remainder.is_zero() { Decimal::ZERO } else { price };
            }
            realized
        };

        if position.qty.is_zero() {
            self.positions.remove(symbol);
        }
        realized
    }

    /// Signed net quantity for a symbol; zero when flat.
    pub fn net_qty(&self, symbol: &Symbol) -> Decimal {
        self.positions
            .get(symbol)
            .map(|p| p.qty)
            .unwrap_or(Decimal::ZERO)
    }

    pub fn open_symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> Symbol {
        Symbol("BTCUSDT".into())
    }

    #[test]
    fn entry_fill_realizes_nothing() {
        let mut book = PositionBook::new();
        let pnl = book.apply_fill(&btc(), Side::Long, dec!(0.02), dec!(50000));
        assert_eq!(pnl, Decimal::ZERO);
        assert_eq!(book.net_qty(&btc()), dec!(0.02));
    }

    #[test]
    fn adding_blends_the_average_entry() {
        let mut book = PositionBook::new();
        book.apply_fill(&btc(), Side::Long, dec!(1), dec!(100));
        book.apply_fill(&btc(), Side::Long, dec!(1), dec!(200));

        // Average entry is now 150; closing at 150 releases nothing.
        let pnl = book.apply_fill(&btc(), Side::Short, dec!(2), dec!(150));
        assert_eq!(pnl, Decimal::ZERO);
        assert_eq!(book.net_qty(&btc()), Decimal::ZERO);
    }

    #[test]
    fn closing_a_long_at_a_higher_price_realizes_profit() {
        let mut book = PositionBook::new();
        book.apply_fill(&btc(), Side::Long, dec!(2), dec!(100));
        let pnl = book.apply_fill(&btc(), Side::Short, dec!(2), dec!(110));
        assert_eq!(pnl, dec!(20));
        assert_eq!(book.net_qty(&btc()), Decimal::ZERO);
    }

    #[test]
    fn partial_close_keeps_the_remaining_position() {
        let mut book = PositionBook::new();
        book.apply_fill(&btc(), Side::Short, dec!(3), dec!(100));
        let pnl = book.apply_fill(&btc(), Side::Long, dec!(1), dec!(90));
        // Short from 100 bought back at 90.
        assert_eq!(pnl, dec!(10));
        assert_eq!(book.net_qty(&btc()), dec!(-2));
    }

    #[test]
    fn flipping_through_flat_reopens_at_the_fill_price() {
        let mut book = PositionBook::new();
        book.apply_fill(&btc(), Side::Long, dec!(1), dec!(100));
        let pnl = book.apply_fill(&btc(), Side::Short, dec!(3), dec!(120));
        assert_eq!(pnl, dec!(20));
        assert_eq!(book.net_qty(&btc()), dec!(-2));

        // The new short's entry is the flip price.
        let pnl = book.apply_fill(&btc(), Side::Long, dec!(2), dec!(110));
        assert_eq!(pnl, dec!(20));
        assert_eq!(book.net_qty(&btc()), Decimal::ZERO);
    }
}
