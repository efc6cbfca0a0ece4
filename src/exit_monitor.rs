//! Tick-driven target/stop/trailing-stop/brick-reversal/time exit
//! evaluation on OPEN trades (SPEC_FULL §4.10, C10).
//!
//! Holds its own in-memory copy of every OPEN trade, keyed by symbol with
//! per-symbol lock granularity so one busy symbol never blocks another's
//! tick path. The trade store remains the system of record; this map is a
//! read-mostly cache seeded at startup and kept in step by the executor's
//! OPEN/CLOSED transitions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::domain::trade::ExitTrigger;
use crate::domain::{Trade, TradeStatus};
use crate::money::Price;

const TRAILING_RETRACEMENT_PCT: rust_decimal::Decimal = rust_decimal::Decimal::from_parts(4, 0, 0, false, 1); // 0.4
const BRICK_REVERSAL_PCT: rust_decimal::Decimal = rust_decimal::Decimal::from_parts(4, 0, 0, false, 1); // 0.4
const EXIT_COOLDOWN_SECONDS: i64 = 30;

/// Max-hold horizon applied to positions seeded at startup and to positions
/// the reconciler starts tracking on fill confirmation, pending a per-profile
/// `max_hold_duration` lookup (SPEC_FULL §9).
pub const DEFAULT_MAX_HOLD_HOURS: i64 = 6;

#[derive(Debug, Clone)]
pub struct OpenPosition {
    pub trade_id: Uuid,
    pub user_broker_id: Uuid,
    pub symbol: String,
    pub entry_price: Price,
    pub entry_at: DateTime<Utc>,
    pub exit_target_price: Price,
    pub exit_stop_price: Price,
    pub trailing_highest_price: Option<Price>,
    pub trailing_stop_price: Option<Price>,
    pub max_hold: chrono::Duration,
}

impl OpenPosition {
    pub fn from_trade(trade: &Trade, max_hold: chrono::Duration) -> Option<Self> {
        let entry_price = trade.entry_price?;
        Some(Self {
            trade_id: trade.trade_id,
            user_broker_id: trade.user_broker_id,
            symbol: trade.symbol.clone(),
            entry_price,
            entry_at: trade.created_at,
            exit_target_price: trade.exit_target_price,
            exit_stop_price: trade.exit_stop_price,
            trailing_highest_price: trade.trailing_highest_price,
            trailing_stop_price: trade.trailing_stop_price,
            max_hold,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExitSignal {
    pub trade_id: Uuid,
    pub user_broker_id: Uuid,
    pub reason: ExitTrigger,
}

pub struct ExitMonitor {
    by_symbol: DashMap<String, Vec<OpenPosition>>,
    last_emitted: DashMap<(Uuid, &'static str), DateTime<Utc>>,
}

impl ExitMonitor {
    pub fn new() -> Self {
        Self { by_symbol: DashMap::new(), last_emitted: DashMap::new() }
    }

    /// Seeds the map from every OPEN trade, grouped by symbol (SPEC_FULL
    /// §4.10: "On start, loads all OPEN trades").
    pub fn load(&self, trades: &[Trade], max_hold: chrono::Duration) {
        let mut grouped: HashMap<String, Vec<OpenPosition>> = HashMap::new();
        for trade in trades {
            if trade.status != TradeStatus::Open {
                continue;
            }
            if let Some(position) = OpenPosition::from_trade(trade, max_hold) {
                grouped.entry(position.symbol.clone()).or_default().push(position);
            }
        }
        for (symbol, positions) in grouped {
            self.by_symbol.insert(symbol, positions);
        }
    }

    pub fn track(&self, position: OpenPosition) {
        self.by_symbol.entry(position.symbol.clone()).or_default().push(position);
    }

    pub fn untrack(&self, symbol: &str, trade_id: Uuid) {
        if let Some(mut positions) = self.by_symbol.get_mut(symbol) {
            positions.retain(|p| p.trade_id != trade_id);
        }
    }

    /// Evaluates every OPEN trade on `symbol` against `price`, in order,
    /// returning the exit signals this tick should emit. A trade can emit at
    /// most one signal per call — the first check that fires wins, matching
    /// the spec's ordered-check list.
    pub fn on_tick(&self, symbol: &str, price: Price, now: DateTime<Utc>) -> Vec<ExitSignal> {
        let Some(mut positions) = self.by_symbol.get_mut(symbol) else { return Vec::new() };
        let mut signals = Vec::new();

        for position in positions.iter_mut() {
            if let Some(reason) = self.evaluate_one(position, price, now) {
                if self.cooldown_open(position.trade_id, reason, now) {
                    signals.push(ExitSignal { trade_id: position.trade_id, user_broker_id: position.user_broker_id, reason });
                }
            }
        }
        signals
    }

    fn evaluate_one(&self, position: &mut OpenPosition, price: Price, now: DateTime<Utc>) -> Option<ExitTrigger> {
        if price >= position.exit_target_price {
            return Some(ExitTrigger::TargetHit);
        }
        if price <= position.exit_stop_price {
            return Some(ExitTrigger::StopLoss);
        }

        let highest = position.trailing_highest_price.unwrap_or(position.entry_price);
        if price > highest {
            let new_highest = price;
            let retracement = (new_highest.raw() - position.entry_price.raw()) * TRAILING_RETRACEMENT_PCT;
            let new_stop = Price::new(new_highest.raw() - retracement).unwrap_or(new_highest);
            position.trailing_highest_price = Some(new_highest);
            position.trailing_stop_price = Some(new_stop);
        } else if let Some(trailing_stop) = position.trailing_stop_price {
            if price <= trailing_stop {
                return Some(ExitTrigger::TrailingStop);
            }
        }

        let highest = position.trailing_highest_price.unwrap_or(position.entry_price);
        let favorable = highest.raw() - position.entry_price.raw();
        let adverse = highest.raw() - price.raw();
        if favorable > rust_decimal::Decimal::ZERO && adverse >= favorable * BRICK_REVERSAL_PCT {
            return Some(ExitTrigger::BrickReversal);
        }

        if now.signed_duration_since(position.entry_at) > position.max_hold {
            return Some(ExitTrigger::TimeExit);
        }

        None
    }

    fn cooldown_open(&self, trade_id: Uuid, reason: ExitTrigger, now: DateTime<Utc>) -> bool {
        let key = (trade_id, reason_str(reason));
        if let Some(last) = self.last_emitted.get(&key) {
            if now.signed_duration_since(*last).num_seconds() < EXIT_COOLDOWN_SECONDS {
                return false;
            }
        }
        self.last_emitted.insert(key, now);
        true
    }
}

impl Default for ExitMonitor {
    fn default() -> Self {
        Self::new()
    }
}

fn reason_str(reason: ExitTrigger) -> &'static str {
    match reason {
        ExitTrigger::TargetHit => "TARGET_HIT",
        ExitTrigger::StopLoss => "STOP_LOSS",
        ExitTrigger::TrailingStop => "TRAILING_STOP",
        ExitTrigger::BrickReversal => "BRICK_REVERSAL",
        ExitTrigger::TimeExit => "TIME_EXIT",
        ExitTrigger::Manual => "MANUAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn position(entry: Price, target: Price, stop: Price, entry_at: DateTime<Utc>) -> OpenPosition {
        OpenPosition {
            trade_id: Uuid::new_v4(),
            user_broker_id: Uuid::new_v4(),
            symbol: "SBIN".into(),
            entry_price: entry,
            entry_at,
            exit_target_price: target,
            exit_stop_price: stop,
            trailing_highest_price: None,
            trailing_stop_price: None,
            max_hold: chrono::Duration::hours(6),
        }
    }

    #[test]
    fn target_hit_fires_once() {
        let monitor = ExitMonitor::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        monitor.track(position(Price::new(dec!(500.00)).unwrap(), Price::new(dec!(510.00)).unwrap(), Price::new(dec!(490.00)).unwrap(), now));

        let signals = monitor.on_tick("SBIN", Price::new(dec!(511.00)).unwrap(), now);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].reason, ExitTrigger::TargetHit);

        let again = monitor.on_tick("SBIN", Price::new(dec!(511.00)).unwrap(), now + chrono::Duration::seconds(5));
        assert!(again.is_empty(), "cooldown should suppress the immediate repeat");
    }

    #[test]
    fn stop_loss_fires_below_stop_price() {
        let monitor = ExitMonitor::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        monitor.track(position(Price::new(dec!(500.00)).unwrap(), Price::new(dec!(510.00)).unwrap(), Price::new(dec!(490.00)).unwrap(), now));

        let signals = monitor.on_tick("SBIN", Price::new(dec!(489.00)).unwrap(), now);
        assert_eq!(signals[0].reason, ExitTrigger::StopLoss);
    }

    #[test]
    fn trailing_stop_follows_the_high_then_fires_on_retracement() {
        let monitor = ExitMonitor::new();
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        monitor.track(position(Price::new(dec!(500.00)).unwrap(), Price::new(dec!(600.00)).unwrap(), Price::new(dec!(400.00)).unwrap(), now));

        // Rallies to 540: favorable move 40, trailing stop = 540 - 0.4*40 = 524.
        let first = monitor.on_tick("SBIN", Price::new(dec!(540.00)).unwrap(), now);
        assert!(first.is_empty());

        let second = monitor.on_tick("SBIN", Price::new(dec!(523.00)).unwrap(), now + chrono::Duration::seconds(1));
        assert_eq!(second[0].reason, ExitTrigger::TrailingStop);
    }

    #[test]
    fn time_exit_fires_past_max_hold() {
        let monitor = ExitMonitor::new();
        let entry_at = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        monitor.track(position(Price::new(dec!(500.00)).unwrap(), Price::new(dec!(600.00)).unwrap(), Price::new(dec!(400.00)).unwrap(), entry_at));

        let now = entry_at + chrono::Duration::hours(7);
        let signals = monitor.on_tick("SBIN", Price::new(dec!(505.00)).unwrap(), now);
        assert_eq!(signals[0].reason, ExitTrigger::TimeExit);
    }
}
