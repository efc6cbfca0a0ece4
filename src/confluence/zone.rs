//! Donchian-style buy-zone classification (SPEC_FULL §4.5, GLOSSARY).

use rust_decimal::Decimal;

use crate::domain::Candle;
use crate::money::Price;

/// The bottom 35% of a timeframe's Donchian range.
#[derive(Debug, Clone, Copy)]
pub struct BuyZone {
    pub low: Price,
    pub high: Price,
    pub zone_ceiling: Price,
}

const ZONE_FRACTION: Decimal = Decimal::from_parts(35, 0, 0, false, 2); // 0.35

impl BuyZone {
    /// `None` if `candles` is empty — there is no range to classify against.
    pub fn from_candles(candles: &[Candle]) -> Option<Self> {
        let low = candles.iter().map(|c| c.low).min()?;
        let high = candles.iter().map(|c| c.high).max()?;
        let zone_ceiling_raw = low.raw() + ZONE_FRACTION * (high.raw() - low.raw());
        let zone_ceiling = Price::new(zone_ceiling_raw).unwrap_or(low);
        Some(Self { low, high, zone_ceiling })
    }

    pub fn contains(&self, price: Price) -> bool {
        price.raw() >= self.low.raw() && price.raw() <= self.zone_ceiling.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 9, 15, 0).unwrap();
        Candle {
            symbol: "SBIN".into(),
            timeframe_minutes: 125,
            bucket_start: t,
            open: Price::new(high).unwrap(),
            high: Price::new(high).unwrap(),
            low: Price::new(low).unwrap(),
            close: Price::new(high).unwrap(),
            volume: dec!(0),
            state: crate::domain::candle::CandleState::Closed,
        }
    }

    #[test]
    fn price_at_low_is_in_zone() {
        let zone = BuyZone::from_candles(&[candle(dec!(500.00), dec!(514.29))]).unwrap();
        assert!(zone.contains(Price::new(dec!(500.00)).unwrap()));
    }

    #[test]
    fn price_above_zone_ceiling_is_excluded() {
        let zone = BuyZone::from_candles(&[candle(dec!(500.00), dec!(600.00))]).unwrap();
        // ceiling = 500 + 0.35*100 = 535.00
        assert!(!zone.contains(Price::new(dec!(536.00)).unwrap()));
        assert!(zone.contains(Price::new(dec!(534.00)).unwrap()));
    }

    #[test]
    fn empty_candles_is_none() {
        assert!(BuyZone::from_candles(&[]).is_none());
    }
}
