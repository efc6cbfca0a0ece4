//! Multi-timeframe confluence scoring and signal emission (SPEC_FULL §4.5,
//! C5). Invoked whenever a closed LTF (1m) candle arrives.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use super::zone::BuyZone;
use crate::clock::SessionCalendar;
use crate::config::{Config, EvaluatorWindows};
use crate::domain::signal::{ConfluenceType, SignalStatus, Strength};
use crate::domain::{Candle, Signal};
use crate::money::Price;

const MOVEMENT_GATE_PCT: Decimal = Decimal::from_parts(3, 0, 0, false, 3); // 0.003
const MOVEMENT_GATE_SECONDS: i64 = 60;

/// The three timeframe windows the evaluator needs for one symbol.
pub struct TimeframeWindows<'a> {
    pub htf: &'a [Candle],
    pub itf: &'a [Candle],
    pub ltf: &'a [Candle],
}

struct LastAnalyzed {
    price: Price,
    at: DateTime<Utc>,
}

pub struct ConfluenceEvaluator {
    calendar: SessionCalendar,
    windows: EvaluatorWindows,
    p_win_constant: Decimal,
    assumed_payoff_ratio: Decimal,
    last_analyzed: DashMap<String, LastAnalyzed>,
}

impl ConfluenceEvaluator {
    pub fn new(calendar: SessionCalendar, config: &Config) -> Self {
        Self {
            calendar,
            windows: config.evaluator_window_sizes.clone(),
            p_win_constant: Decimal::try_from(config.signal.p_win_constant).unwrap_or(Decimal::new(65, 2)),
            assumed_payoff_ratio: Decimal::try_from(config.signal.assumed_payoff_ratio).unwrap_or(Decimal::new(15, 1)),
            last_analyzed: DashMap::new(),
        }
    }

    pub fn window_sizes(&self) -> &EvaluatorWindows {
        &self.windows
    }

    /// Evaluates one symbol against its three timeframe windows. Returns
    /// `None` when no signal-worthy condition exists: market closed/quiet,
    /// the movement gate throttles re-analysis, or the composite strength is
    /// WEAK (the emitter only suppresses WEAK; §4.5 step 5 defers the
    /// profile-specific `minConfluence` gate to stage 2).
    pub fn evaluate(&self, symbol: &str, current_price: Price, windows: TimeframeWindows<'_>, now: DateTime<Utc>) -> Option<Signal> {
        if !self.calendar.is_market_open(now) || self.calendar.is_in_pre_close_quiet(now) {
            return None;
        }

        if !self.movement_gate_open(symbol, current_price, now) {
            return None;
        }

        let htf_zone = BuyZone::from_candles(windows.htf);
        let itf_zone = BuyZone::from_candles(windows.itf);
        let ltf_zone = BuyZone::from_candles(windows.ltf);

        let htf_in = htf_zone.map(|z| z.contains(current_price)).unwrap_or(false);
        let itf_in = itf_zone.map(|z| z.contains(current_price)).unwrap_or(false);
        let ltf_in = ltf_zone.map(|z| z.contains(current_price)).unwrap_or(false);

        let zone_count = [htf_in, itf_in, ltf_in].iter().filter(|&&x| x).count() as u8;
        let confluence_type = ConfluenceType::from_zone_count(zone_count)?;

        let composite_score = weight(htf_in) * Decimal::new(50, 2)
            + weight(itf_in) * Decimal::new(30, 2)
            + weight(ltf_in) * Decimal::new(20, 2);
        let strength = Strength::classify(composite_score);
        if strength == Strength::Weak {
            return None;
        }

        self.record_analysis(symbol, current_price, now);

        let geometry_zone = htf_zone.or(itf_zone).or(ltf_zone)?;
        let entry_zone = ltf_zone.or(itf_zone).or(htf_zone)?;

        let kelly_raw = self.p_win_constant - (Decimal::ONE - self.p_win_constant) / self.assumed_payoff_ratio;
        let kelly = kelly_raw.max(Decimal::ZERO);

        Some(Signal {
            signal_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            generated_at: now,
            confluence_type,
            composite_score,
            strength,
            effective_floor: geometry_zone.low,
            effective_ceiling: geometry_zone.zone_ceiling,
            entry_low: entry_zone.low,
            entry_high: entry_zone.zone_ceiling,
            ref_price: current_price,
            p_win: self.p_win_constant,
            kelly,
            status: SignalStatus::Published,
            last_checked_at: now,
        })
    }

    fn movement_gate_open(&self, symbol: &str, current_price: Price, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_analyzed.get(symbol) else { return true };
        let elapsed = now.signed_duration_since(last.at).num_seconds();
        if elapsed >= MOVEMENT_GATE_SECONDS {
            return true;
        }
        let last_price = last.price.raw();
        if last_price.is_zero() {
            return true;
        }
        let move_pct = (current_price.raw() - last_price).abs() / last_price;
        move_pct >= MOVEMENT_GATE_PCT
    }

    fn record_analysis(&self, symbol: &str, price: Price, at: DateTime<Utc>) {
        self.last_analyzed.insert(symbol.to_string(), LastAnalyzed { price, at });
    }
}

fn weight(in_zone: bool) -> Decimal {
    if in_zone { Decimal::ONE } else { Decimal::ZERO }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candle::CandleState;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(low: Decimal, high: Decimal) -> Candle {
        let t = Utc.with_ymd_and_hms(2026, 8, 1, 9, 15, 0).unwrap();
        Candle {
            symbol: "SBIN".into(),
            timeframe_minutes: 1,
            bucket_start: t,
            open: Price::new(high).unwrap(),
            high: Price::new(high).unwrap(),
            low: Price::new(low).unwrap(),
            close: Price::new(high).unwrap(),
            volume: dec!(0),
            state: CandleState::Closed,
        }
    }

    fn evaluator() -> ConfluenceEvaluator {
        ConfluenceEvaluator::new(SessionCalendar::default_equities(), &Config::default())
    }

    #[test]
    fn all_three_in_zone_is_triple_very_strong() {
        let eval = evaluator();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 45, 0).unwrap();
        let c = vec![candle(dec!(500.00), dec!(514.29))];
        let windows = TimeframeWindows { htf: &c, itf: &c, ltf: &c };

        let signal = eval.evaluate("SBIN", Price::new(dec!(500.00)).unwrap(), windows, now).unwrap();
        assert_eq!(signal.confluence_type, ConfluenceType::Triple);
        assert_eq!(signal.strength, Strength::VeryStrong);
        assert_eq!(signal.composite_score, dec!(1.00));
    }

    #[test]
    fn no_zone_hit_is_weak_and_suppressed() {
        let eval = evaluator();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 45, 0).unwrap();
        let c = vec![candle(dec!(500.00), dec!(600.00))];
        let windows = TimeframeWindows { htf: &c, itf: &c, ltf: &c };

        let signal = eval.evaluate("SBIN", Price::new(dec!(590.00)).unwrap(), windows, now);
        assert!(signal.is_none());
    }

    #[test]
    fn pre_close_quiet_window_suppresses_emission() {
        let eval = evaluator();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 15, 29, 45).unwrap();
        let c = vec![candle(dec!(500.00), dec!(514.29))];
        let windows = TimeframeWindows { htf: &c, itf: &c, ltf: &c };

        assert!(eval.evaluate("SBIN", Price::new(dec!(500.00)).unwrap(), windows, now).is_none());
    }

    #[test]
    fn movement_gate_throttles_repeat_analysis() {
        let eval = evaluator();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 45, 0).unwrap();
        let c = vec![candle(dec!(500.00), dec!(514.29))];
        let windows = TimeframeWindows { htf: &c, itf: &c, ltf: &c };

        assert!(eval.evaluate("SBIN", Price::new(dec!(500.00)).unwrap(), windows, now).is_some());

        let soon_after = now + chrono::Duration::seconds(5);
        let windows2 = TimeframeWindows { htf: &c, itf: &c, ltf: &c };
        assert!(eval.evaluate("SBIN", Price::new(dec!(500.00)).unwrap(), windows2, soon_after).is_none());
    }
}
