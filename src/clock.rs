//! Deterministic time source and market-hours / bucket-boundary arithmetic.
//!
//! Production wires [`SystemClock`]; tests wire [`FixedClock`] so that
//! candle-boundary and cooldown logic can be exercised without sleeping.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

/// Single injected time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock tests can move forward explicitly. Stores millis-since-epoch so
/// it can be `Sync` without a mutex.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            millis: AtomicI64::new(at.timestamp_millis()),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.millis.store(at.timestamp_millis(), Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).expect("valid millis")
    }
}

/// Timeframes the candle pipeline understands, in minutes.
pub const TF_1M: u32 = 1;
pub const TF_25M: u32 = 25;
pub const TF_125M: u32 = 125;
pub const TF_DAILY: u32 = 1440;

/// Market-hours and timeframe-bucket arithmetic for one exchange session.
///
/// `open`/`close` are wall-clock times (exchange-local, but the core treats
/// everything as UTC — tz conversion is an adapter concern). 25m and 125m
/// buckets are anchored to `open`, not to midnight, per SPEC_FULL §4.1.
#[derive(Debug, Clone, Copy)]
pub struct SessionCalendar {
    pub open: NaiveTime,
    pub close: NaiveTime,
    pub pre_close_quiet: Duration,
}

impl SessionCalendar {
    pub fn new(open: NaiveTime, close: NaiveTime, pre_close_quiet: Duration) -> Self {
        Self { open, close, pre_close_quiet }
    }

    /// India-equities-shaped default: 09:15–15:30, 60s pre-close quiet window.
    pub fn default_equities() -> Self {
        Self::new(
            NaiveTime::from_hms_opt(9, 15, 0).unwrap(),
            NaiveTime::from_hms_opt(15, 30, 0).unwrap(),
            Duration::seconds(60),
        )
    }

    pub fn is_market_open(&self, t: DateTime<Utc>) -> bool {
        let tod = t.time();
        tod >= self.open && tod < self.close
    }

    pub fn is_in_pre_close_quiet(&self, t: DateTime<Utc>) -> bool {
        let tod = t.time();
        let quiet_start = self.close - self.pre_close_quiet;
        tod >= quiet_start && tod < self.close
    }

    /// Floors `t` to the start of its `tf`-minute bucket, anchored at market open.
    pub fn bucket_start(&self, t: DateTime<Utc>, tf_minutes: u32) -> DateTime<Utc> {
        if tf_minutes == TF_DAILY {
            return t.date_naive().and_time(self.open).and_utc();
        }
        let day_open = t.date_naive().and_time(self.open).and_utc();
        let elapsed = t.signed_duration_since(day_open);
        if elapsed < Duration::zero() {
            return day_open;
        }
        let minutes_elapsed = elapsed.num_minutes();
        let bucket_index = minutes_elapsed / tf_minutes as i64;
        day_open + Duration::minutes(bucket_index * tf_minutes as i64)
    }

    /// Minute-of-session index (0-based) for `bucket_start`, used to decide
    /// whether a higher-timeframe bucket boundary has been crossed.
    pub fn minutes_since_open(&self, bucket_start: DateTime<Utc>) -> i64 {
        let day_open = bucket_start.date_naive().and_time(self.open).and_utc();
        bucket_start.signed_duration_since(day_open).num_minutes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 1, h, m, s).unwrap()
    }

    #[test]
    fn buckets_anchor_to_open() {
        let cal = SessionCalendar::default_equities();
        // open 09:15, so first 25m bucket is [09:15, 09:40)
        assert_eq!(cal.bucket_start(dt(9, 30, 0), TF_25M), dt(9, 15, 0));
        assert_eq!(cal.bucket_start(dt(9, 40, 0), TF_25M), dt(9, 40, 0));
    }

    #[test]
    fn one_minute_buckets_floor_to_minute() {
        let cal = SessionCalendar::default_equities();
        assert_eq!(cal.bucket_start(dt(9, 31, 45), TF_1M), dt(9, 31, 0));
    }

    #[test]
    fn pre_close_quiet_window() {
        let cal = SessionCalendar::default_equities();
        assert!(cal.is_in_pre_close_quiet(dt(15, 29, 30)));
        assert!(!cal.is_in_pre_close_quiet(dt(15, 28, 0)));
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(dt(9, 15, 0));
        clock.advance(Duration::seconds(30));
        assert_eq!(clock.now(), dt(9, 15, 30));
    }
}
