//! Average true range over a closed-candle window (SPEC_FULL §4.6, §4.7):
//! the volatility input every sizing constraint and the entry-time exit
//! geometry are scaled against.

use rust_decimal::Decimal;

use crate::domain::Candle;

/// Wilder-style simple average of true range over `candles`, oldest first.
/// Returns `None` when fewer than two candles are available — a single
/// candle has no prior close to measure a gap against.
pub fn average_true_range(candles: &[Candle], period: usize) -> Option<Decimal> {
    if candles.len() < 2 || period == 0 {
        return None;
    }

    let window = &candles[candles.len().saturating_sub(period + 1)..];
    let mut sum = Decimal::ZERO;
    let mut count = 0u32;
    for pair in window.windows(2) {
        let (prev, current) = (&pair[0], &pair[1]);
        let high_low = current.high.raw() - current.low.raw();
        let high_prev_close = (current.high.raw() - prev.close.raw()).abs();
        let low_prev_close = (current.low.raw() - prev.close.raw()).abs();
        let true_range = high_low.max(high_prev_close).max(low_prev_close);
        sum += true_range;
        count += 1;
    }

    if count == 0 {
        None
    } else {
        Some(sum / Decimal::from(count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::CandleState;
    use crate::money::Price;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(high: Decimal, low: Decimal, close: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 9, 15, 0).unwrap();
        Candle {
            symbol: "SBIN".into(),
            timeframe_minutes: 1,
            bucket_start: t,
            open: Price::new(close).unwrap(),
            high: Price::new(high).unwrap(),
            low: Price::new(low).unwrap(),
            close: Price::new(close).unwrap(),
            volume: dec!(0),
            state: CandleState::Closed,
        }
    }

    #[test]
    fn single_candle_has_no_atr() {
        let candles = vec![candle(dec!(505.00), dec!(500.00), dec!(502.00))];
        assert!(average_true_range(&candles, 14).is_none());
    }

    #[test]
    fn averages_true_range_across_the_window() {
        let candles = vec![
            candle(dec!(500.00), dec!(495.00), dec!(498.00)),
            candle(dec!(503.00), dec!(497.00), dec!(500.00)),
            candle(dec!(506.00), dec!(499.00), dec!(503.00)),
        ];
        // TR(1) = max(503-497, |503-498|, |497-498|) = 6
        // TR(2) = max(506-499, |506-500|, |499-500|) = 7
        let atr = average_true_range(&candles, 14).unwrap();
        assert_eq!(atr, dec!(6.5));
    }
}
