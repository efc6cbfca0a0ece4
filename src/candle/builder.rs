//! 1-minute candle builder (SPEC_FULL §4.3, C3).
//!
//! Exactly one partial candle lives per symbol at any time. A tick past the
//! current bucket closes it; a 2s finalizer closes partials left stranded by
//! a silent minute (no tick arrived to trigger the boundary check).

use dashmap::DashMap;

use crate::clock::{SessionCalendar, TF_1M};
use crate::domain::{Candle, Tick};

pub struct CandleBuilder {
    calendar: SessionCalendar,
    partials: DashMap<String, Candle>,
}

impl CandleBuilder {
    pub fn new(calendar: SessionCalendar) -> Self {
        Self { calendar, partials: DashMap::new() }
    }

    /// Feeds one tick. Returns the just-closed 1m candle if this tick
    /// crossed a bucket boundary.
    pub fn on_tick(&self, tick: &Tick) -> Option<Candle> {
        let ts = tick.exchange_timestamp.unwrap_or(tick.received_at);
        let bucket_start = self.calendar.bucket_start(ts, TF_1M);

        match self.partials.get(&tick.symbol).map(|p| p.bucket_start) {
            None => {
                let fresh = Candle::open_new(&tick.symbol, TF_1M, bucket_start, tick.last_price, tick.last_qty);
                self.partials.insert(tick.symbol.clone(), fresh);
                None
            }
            Some(existing_bucket) if bucket_start > existing_bucket => {
                let closed = self.partials.remove(&tick.symbol).map(|(_, c)| c.closed());
                let fresh = Candle::open_new(&tick.symbol, TF_1M, bucket_start, tick.last_price, tick.last_qty);
                self.partials.insert(tick.symbol.clone(), fresh);
                closed
            }
            Some(_) => {
                if let Some(mut partial) = self.partials.get_mut(&tick.symbol) {
                    partial.update(tick.last_price, tick.last_qty);
                }
                None
            }
        }
    }

    /// Called every 2s (SPEC_FULL §4.3). Closes and removes any partial
    /// whose bucket is more than one minute stale so a silent minute still
    /// produces a closed candle.
    pub fn finalize_stale(&self, now: chrono::DateTime<chrono::Utc>) -> Vec<Candle> {
        let current_bucket = self.calendar.bucket_start(now, TF_1M);
        let stale_symbols: Vec<String> = self
            .partials
            .iter()
            .filter(|entry| entry.value().bucket_start < current_bucket)
            .map(|entry| entry.key().clone())
            .collect();

        stale_symbols
            .into_iter()
            .filter_map(|symbol| self.partials.remove(&symbol).map(|(_, c)| c.closed()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::CandleState;
    use crate::money::Price;
    use chrono::TimeZone;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn tick(symbol: &str, at: chrono::DateTime<Utc>, price: rust_decimal::Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            exchange_timestamp: Some(at),
            received_at: at,
            last_price: Price::new(price).unwrap(),
            last_qty: dec!(10),
            volume: dec!(10),
        }
    }

    #[test]
    fn crossing_a_minute_boundary_closes_the_prior_candle() {
        let builder = CandleBuilder::new(SessionCalendar::default_equities());
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 9, 31, 10).unwrap();
        assert!(builder.on_tick(&tick("SBIN", t0, dec!(500.00))).is_none());

        let t1 = t0 + Duration::seconds(5);
        assert!(builder.on_tick(&tick("SBIN", t1, dec!(500.10))).is_none());

        let t2 = t0 + Duration::minutes(1);
        let closed = builder.on_tick(&tick("SBIN", t2, dec!(501.00))).expect("boundary crossed");
        assert_eq!(closed.state, CandleState::Closed);
        assert_eq!(closed.open, Price::new(dec!(500.00)).unwrap());
        assert_eq!(closed.close, Price::new(dec!(500.10)).unwrap());
    }

    #[test]
    fn finalizer_closes_stale_silent_minute() {
        let builder = CandleBuilder::new(SessionCalendar::default_equities());
        let t0 = Utc.with_ymd_and_hms(2026, 8, 1, 9, 31, 0).unwrap();
        builder.on_tick(&tick("SBIN", t0, dec!(500.00)));

        let later = t0 + Duration::minutes(2);
        let closed = builder.finalize_stale(later);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].symbol, "SBIN");
    }
}
