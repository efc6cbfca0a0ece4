//! 1m → 25m → 125m aggregation (SPEC_FULL §4.4, C4, P2).
//!
//! Each tier is a true tumbling bucket anchored at market open via
//! [`SessionCalendar::bucket_start`], mirroring the boundary-crossing check
//! `candle/builder.rs` uses one level down (tick → 1m partial). A bucket
//! closes the moment a constituent with a *later* bucket_start arrives; the
//! closed candle aggregates everything collected for the bucket that just
//! ended, provided at least five constituents were collected. Fewer than
//! five (warm-up, restart) emits nothing and logs at debug — callers must
//! tolerate a symbol producing no HTF/ITF candle for a while.

use std::collections::VecDeque;
use std::sync::Mutex;

use dashmap::DashMap;
use tracing::debug;

use chrono::{DateTime, Utc};

use crate::clock::{SessionCalendar, TF_125M, TF_25M};
use crate::domain::Candle;

const CONSTITUENTS_PER_BUCKET: usize = 5;
const ROLLING_WINDOW: usize = 64;

struct SymbolWindows {
    one_min: VecDeque<Candle>,
    twenty_five_min: VecDeque<Candle>,
    hundred_twenty_five_min: VecDeque<Candle>,
    current_25m_bucket: Option<DateTime<Utc>>,
    pending_1m: Vec<Candle>,
    current_125m_bucket: Option<DateTime<Utc>>,
    pending_25m: Vec<Candle>,
}

impl Default for SymbolWindows {
    fn default() -> Self {
        Self {
            one_min: VecDeque::new(),
            twenty_five_min: VecDeque::new(),
            hundred_twenty_five_min: VecDeque::new(),
            current_25m_bucket: None,
            pending_1m: Vec::new(),
            current_125m_bucket: None,
            pending_25m: Vec::new(),
        }
    }
}

pub struct CandleAggregator {
    calendar: SessionCalendar,
    windows: DashMap<String, Mutex<SymbolWindows>>,
}

/// Candles produced by feeding one closed 1m candle through the aggregator.
#[derive(Debug, Default)]
pub struct AggregationResult {
    pub closed_25m: Option<Candle>,
    pub closed_125m: Option<Candle>,
}

/// Pushes `item` into `pending` once its bucket matches `current`, closing
/// and aggregating the previous bucket's constituents the moment a later
/// bucket_start arrives. Returns the closed candle, if the completed bucket
/// had enough constituents.
fn roll_up(current_bucket: &mut Option<DateTime<Utc>>, pending: &mut Vec<Candle>, bucket_start: DateTime<Utc>, item: Candle, output_timeframe: u32) -> Option<Candle> {
    let mut closed = None;
    if let Some(current) = *current_bucket {
        if bucket_start > current {
            if pending.len() >= CONSTITUENTS_PER_BUCKET {
                closed = Candle::aggregate(pending, output_timeframe);
            } else {
                debug!(constituents = pending.len(), timeframe_minutes = output_timeframe, "insufficient constituents at bucket boundary, skipping emission");
            }
            pending.clear();
        }
    }
    *current_bucket = Some(bucket_start);
    pending.push(item);
    closed
}

impl CandleAggregator {
    pub fn new(calendar: SessionCalendar) -> Self {
        Self { calendar, windows: DashMap::new() }
    }

    pub fn on_1m_closed(&self, candle: Candle) -> AggregationResult {
        let entry = self.windows.entry(candle.symbol.clone()).or_default();
        let mut windows_guard = entry.lock().expect("aggregator mutex poisoned");
        let windows = &mut *windows_guard;

        windows.one_min.push_back(candle.clone());
        if windows.one_min.len() > ROLLING_WINDOW {
            windows.one_min.pop_front();
        }

        let mut result = AggregationResult::default();

        let bucket_25m = self.calendar.bucket_start(candle.bucket_start, TF_25M);
        if let Some(closed_25m) = roll_up(&mut windows.current_25m_bucket, &mut windows.pending_1m, bucket_25m, candle, TF_25M) {
            windows.twenty_five_min.push_back(closed_25m.clone());
            if windows.twenty_five_min.len() > ROLLING_WINDOW {
                windows.twenty_five_min.pop_front();
            }

            let bucket_125m = self.calendar.bucket_start(closed_25m.bucket_start, TF_125M);
            if let Some(closed_125m) = roll_up(&mut windows.current_125m_bucket, &mut windows.pending_25m, bucket_125m, closed_25m.clone(), TF_125M) {
                windows.hundred_twenty_five_min.push_back(closed_125m.clone());
                if windows.hundred_twenty_five_min.len() > ROLLING_WINDOW {
                    windows.hundred_twenty_five_min.pop_front();
                }
                result.closed_125m = Some(closed_125m);
            }

            result.closed_25m = Some(closed_25m);
        }

        result
    }

    /// Most recent `n` candles at `timeframe_minutes` for a symbol, oldest
    /// first — the window the evaluator fetches per SPEC_FULL §4.5 step 1.
    pub fn recent(&self, symbol: &str, timeframe_minutes: u32, n: usize) -> Vec<Candle> {
        let Some(entry) = self.windows.get(symbol) else { return Vec::new() };
        let windows = entry.lock().expect("aggregator mutex poisoned");
        let source = if timeframe_minutes == TF_25M {
            &windows.twenty_five_min
        } else if timeframe_minutes == TF_125M {
            &windows.hundred_twenty_five_min
        } else {
            &windows.one_min
        };
        source.iter().rev().take(n).rev().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Price;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn candle_at(minute: i64) -> Candle {
        let start = Utc.with_ymd_and_hms(2026, 8, 1, 9, 15, 0).unwrap() + chrono::Duration::minutes(minute);
        let mut c = Candle::open_new("SBIN", 1, start, Price::new(dec!(500.00)).unwrap(), dec!(10));
        c.update(Price::new(dec!(500.50)).unwrap(), dec!(5));
        c.closed()
    }

    #[test]
    fn mid_bucket_candles_emit_nothing() {
        let agg = CandleAggregator::new(SessionCalendar::default_equities());
        for i in 0..25 {
            let result = agg.on_1m_closed(candle_at(i));
            assert!(result.closed_25m.is_none(), "bucket [09:15,09:40) has not rolled over yet at minute {i}");
        }
    }

    #[test]
    fn a_25m_bucket_emits_only_once_the_next_bucket_starts() {
        let agg = CandleAggregator::new(SessionCalendar::default_equities());
        let mut last = AggregationResult::default();
        for i in 0..26 {
            last = agg.on_1m_closed(candle_at(i));
        }
        assert!(last.closed_25m.is_some());
        assert!(last.closed_125m.is_none());
    }

    #[test]
    fn too_few_constituents_at_rollover_emits_nothing() {
        let agg = CandleAggregator::new(SessionCalendar::default_equities());
        agg.on_1m_closed(candle_at(0));
        agg.on_1m_closed(candle_at(1));
        // Jumps straight into the next 25m bucket with only two constituents
        // collected for the one that just closed.
        let result = agg.on_1m_closed(candle_at(25));
        assert!(result.closed_25m.is_none());
    }

    #[test]
    fn five_rolled_up_25m_candles_emit_a_125m_candle() {
        let agg = CandleAggregator::new(SessionCalendar::default_equities());
        let mut last = AggregationResult::default();
        for i in 0..=150 {
            last = agg.on_1m_closed(candle_at(i));
        }
        assert!(last.closed_125m.is_some());
    }

    #[test]
    fn recent_serves_each_timeframe_from_its_own_window() {
        let agg = CandleAggregator::new(SessionCalendar::default_equities());
        for i in 0..=150 {
            agg.on_1m_closed(candle_at(i));
        }
        assert!(!agg.recent("SBIN", TF_25M, 10).is_empty());
        assert!(!agg.recent("SBIN", TF_125M, 10).is_empty());
    }
}
