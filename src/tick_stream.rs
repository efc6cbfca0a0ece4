//! Tick ingestion, dedup, and non-blocking fan-out (SPEC_FULL §4.2, C2, P1).
//!
//! The two-window dedup set and the bounded, drop-on-full fan-out channels
//! are the crate's single most important invariant: nothing here may ever
//! block the thread that is feeding it ticks from the data broker.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rustc_hash::FxHashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use crate::domain::Tick;

type DedupKey = (String, DateTime<Utc>, Decimal, Decimal);

const WINDOW_SWAP_SECONDS: i64 = 30;
const SUBSCRIBER_CAPACITY: usize = 1024;

/// One of the four fixed fan-out destinations named in SPEC_FULL §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscriber {
    CandleBuilder,
    ExitMonitor,
    PriceCache,
    BroadcastEmitter,
}

pub const ALL_SUBSCRIBERS: [Subscriber; 4] = [
    Subscriber::CandleBuilder,
    Subscriber::ExitMonitor,
    Subscriber::PriceCache,
    Subscriber::BroadcastEmitter,
];

struct DedupWindows {
    current: FxHashSet<DedupKey>,
    previous: FxHashSet<DedupKey>,
    window_started_at_millis: AtomicI64,
}

pub struct TickStream {
    windows: Mutex<DedupWindows>,
    senders: Vec<(Subscriber, mpsc::Sender<Tick>)>,
}

pub struct TickStreamHandles {
    pub stream: Arc<TickStream>,
    pub receivers: Vec<(Subscriber, mpsc::Receiver<Tick>)>,
}

impl TickStream {
    pub fn build(now: DateTime<Utc>) -> TickStreamHandles {
        let mut senders = Vec::with_capacity(ALL_SUBSCRIBERS.len());
        let mut receivers = Vec::with_capacity(ALL_SUBSCRIBERS.len());
        for sub in ALL_SUBSCRIBERS {
            let (tx, rx) = mpsc::channel(SUBSCRIBER_CAPACITY);
            senders.push((sub, tx));
            receivers.push((sub, rx));
        }

        let stream = Arc::new(TickStream {
            windows: Mutex::new(DedupWindows {
                current: FxHashSet::default(),
                previous: FxHashSet::default(),
                window_started_at_millis: AtomicI64::new(now.timestamp_millis()),
            }),
            senders,
        });

        TickStreamHandles { stream, receivers }
    }

    /// Accepts one tick from the data broker. Returns `true` if it was
    /// accepted (novel) and fanned out, `false` if it was a duplicate.
    /// Never awaits, never blocks: fan-out uses `try_send` only.
    pub fn ingest(&self, tick: Tick, now: DateTime<Utc>) -> bool {
        if tick.used_fallback_timestamp() {
            crate::metrics::ticks_missing_exchange_ts();
        }

        let key = tick.dedup_key();
        let accepted = {
            let mut windows = self.windows.lock().expect("tick dedup mutex poisoned");

            let started_at = windows.window_started_at_millis.load(Ordering::Relaxed);
            let elapsed = now.timestamp_millis() - started_at;
            if elapsed >= WINDOW_SWAP_SECONDS * 1000 {
                windows.previous = std::mem::take(&mut windows.current);
                windows.window_started_at_millis.store(now.timestamp_millis(), Ordering::Relaxed);
            }

            if windows.current.contains(&key) || windows.previous.contains(&key) {
                false
            } else {
                windows.current.insert(key);
                true
            }
        };

        if !accepted {
            crate::metrics::ticks_duplicate();
            return false;
        }

        crate::metrics::ticks_processed(1);
        for (_sub, tx) in &self.senders {
            // Drop-on-full: a slow subscriber loses this tick rather than
            // stalling the broker thread.
            if tx.try_send(tick.clone()).is_err() {
                crate::metrics::events_dropped("tick_fanout");
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::Price;
    use chrono::Duration as ChronoDuration;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn tick_at(symbol: &str, ts: DateTime<Utc>, price: Decimal) -> Tick {
        Tick {
            symbol: symbol.to_string(),
            exchange_timestamp: Some(ts),
            received_at: ts,
            last_price: Price::new(price).unwrap(),
            last_qty: dec!(10),
            volume: dec!(10),
        }
    }

    #[test]
    fn duplicate_tick_is_dropped() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        let handles = TickStream::build(now);
        let tick = tick_at("SBIN", now, dec!(500.00));

        assert!(handles.stream.ingest(tick.clone(), now));
        assert!(!handles.stream.ingest(tick, now));
    }

    #[test]
    fn distinct_ticks_both_accepted() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        let handles = TickStream::build(now);
        let t1 = tick_at("SBIN", now, dec!(500.00));
        let t2 = tick_at("SBIN", now + ChronoDuration::seconds(1), dec!(500.05));

        assert!(handles.stream.ingest(t1, now));
        assert!(handles.stream.ingest(t2, now));
    }

    #[test]
    fn window_swap_still_catches_duplicate_in_previous_window() {
        let now = Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap();
        let handles = TickStream::build(now);
        let tick = tick_at("SBIN", now, dec!(500.00));
        assert!(handles.stream.ingest(tick.clone(), now));

        let later = now + ChronoDuration::seconds(WINDOW_SWAP_SECONDS + 1);
        // Same tick replayed just after a window swap must still be caught
        // (it lives in the now-previous window) — this is P1.
        assert!(!handles.stream.ingest(tick, later));
    }
}
