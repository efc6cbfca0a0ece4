//! Candle type (SPEC_FULL §3). Timeframe is stored as plain minutes per the
//! spec rather than a closed enum, since the aggregator derives new
//! timeframes (1/25/125/1440) purely from arithmetic on an existing one.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::money::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandleState {
    Partial,
    Closed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Candle {
    pub symbol: String,
    pub timeframe_minutes: u32,
    pub bucket_start: DateTime<Utc>,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Decimal,
    pub state: CandleState,
}

impl Candle {
    pub fn open_new(symbol: &str, timeframe_minutes: u32, bucket_start: DateTime<Utc>, price: Price, qty: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe_minutes,
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: qty,
            state: CandleState::Partial,
        }
    }

    pub fn update(&mut self, price: Price, qty: Decimal) {
        if price > self.high {
            self.high = price;
        }
        if price < self.low {
            self.low = price;
        }
        self.close = price;
        self.volume += qty;
    }

    pub fn closed(mut self) -> Self {
        self.state = CandleState::Closed;
        self
    }

    /// Donchian-style range used by the confluence evaluator.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }

    /// Aggregates `constituents` (in chronological order, all of the same
    /// lower timeframe) into one higher-timeframe candle per SPEC_FULL §4.4 /
    /// P2: open = first.open, close = last.close, high = max, low = min,
    /// volume = sum.
    pub fn aggregate(constituents: &[Candle], timeframe_minutes: u32) -> Option<Candle> {
        let first = constituents.first()?;
        let last = constituents.last()?;
        let high = constituents.iter().map(|c| c.high).max()?;
        let low = constituents.iter().map(|c| c.low).min()?;
        let volume = constituents.iter().map(|c| c.volume).sum();
        Some(Candle {
            symbol: first.symbol.clone(),
            timeframe_minutes,
            bucket_start: first.bucket_start,
            open: first.open,
            high,
            low,
            close: last.close,
            volume,
            state: CandleState::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TF_25M;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn p(v: Decimal) -> Price {
        Price::new(v).unwrap()
    }

    #[test]
    fn aggregate_matches_p2_invariant() {
        let base = Utc.with_ymd_and_hms(2026, 8, 1, 9, 15, 0).unwrap();
        let mut candles = Vec::new();
        for i in 0..5 {
            let start = base + chrono::Duration::minutes(i);
            let mut c = Candle::open_new("SBIN", 1, start, p(dec!(100.00) + Decimal::from(i)), dec!(10));
            c.update(p(dec!(99.50)), dec!(5));
            candles.push(c.closed());
        }
        let agg = Candle::aggregate(&candles, TF_25M).unwrap();
        assert_eq!(agg.open, candles[0].open);
        assert_eq!(agg.close, candles[4].close);
        assert_eq!(agg.high, candles.iter().map(|c| c.high).max().unwrap());
        assert_eq!(agg.low, candles.iter().map(|c| c.low).min().unwrap());
        assert_eq!(agg.volume, candles.iter().map(|c| c.volume).sum::<Decimal>());
    }

    #[test]
    fn aggregate_of_empty_is_none() {
        assert!(Candle::aggregate(&[], 25).is_none());
    }
}
