//! Instrument names for the `metrics` facade (SPEC_FULL §4.15, C15).
//!
//! This crate registers and updates these instruments but wires no exporter;
//! Prometheus exposition is the out-of-scope external surface named in §1.
//! All labels here are bounded-cardinality (broker code, timeframe, reject
//! reason, topic name) — never a user id, trade id, or symbol.

use ::metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use std::time::Duration;

static DESCRIBED: OnceCell<()> = OnceCell::new();

/// Registers instrument descriptions with whatever exporter the binary
/// installs. Idempotent and cheap to call from every entrypoint (including
/// tests) — `OnceCell` makes the one-time registration itself a no-op on
/// repeat calls rather than something callers need to remember to guard.
pub fn describe() {
    DESCRIBED.get_or_init(|| {
        describe_counter!("ticks.processed", "Accepted ticks fanned out to subscribers");
        describe_counter!("ticks.duplicate", "Ticks dropped by the dedup window");
        describe_counter!("candles.closed", "Closed candles persisted, by timeframe");
        describe_counter!("candles.persist.fail", "Closed candles that failed to persist");
        describe_counter!("signals.generated", "New confluence signals raised, by type");
        describe_counter!("orders.placed", "Entry and exit orders submitted to a broker");
        describe_counter!("orders.rejected", "Orders rejected, by reason");
        describe_counter!("orders.filled", "Entry orders confirmed filled by the reconciler");
        describe_counter!("reconcile.timeouts", "PENDING trades timed out by the reconciler");
        describe_counter!("reconcile.rateLimited", "Reconciliation cycles that started with no free broker permit");
        describe_histogram!("tick.processing.latency", "Seconds from tick receipt to fan-out completion");
        describe_histogram!("order.placement.latency", "Seconds spent waiting on a broker's place_order response");
        describe_histogram!("reconcile.cycle.duration", "Seconds spent in one reconciliation pass");
        describe_gauge!("open.trades", "Current count of OPEN trades across all accounts");
        describe_gauge!("pending.trades", "Current count of PENDING trades across all accounts");
        describe_gauge!("rate.utilization", "Fraction of the reconciler's concurrency permits in use, by broker");
        describe_gauge!("broker.health", "1 if the broker's last authenticate() call succeeded, else 0");
    });
}

pub fn ticks_processed(symbol_count_hint: u64) {
    counter!("ticks.processed").increment(symbol_count_hint);
}

pub fn ticks_duplicate() {
    counter!("ticks.duplicate").increment(1);
}

pub fn ticks_missing_exchange_ts() {
    counter!("ticks.missingExchangeTs").increment(1);
}

pub fn candles_closed(timeframe_minutes: u32) {
    counter!("candles.closed", "tf" => timeframe_minutes.to_string()).increment(1);
}

pub fn candles_persist_fail() {
    counter!("candles.persist.fail").increment(1);
}

pub fn signals_generated(confluence_type: &str) {
    counter!("signals.generated", "type" => confluence_type.to_string()).increment(1);
}

pub fn orders_placed(broker_code: &str) {
    counter!("orders.placed", "broker" => broker_code.to_string()).increment(1);
}

pub fn orders_filled() {
    counter!("orders.filled").increment(1);
}

pub fn orders_rejected(reason: &'static str) {
    counter!("orders.rejected", "reason" => reason).increment(1);
}

pub fn reconcile_checked() {
    counter!("reconcile.checked").increment(1);
}

pub fn reconcile_updated() {
    counter!("reconcile.updated").increment(1);
}

pub fn reconcile_timeouts() {
    counter!("reconcile.timeouts").increment(1);
}

pub fn reconcile_rate_limited() {
    counter!("reconcile.rateLimited").increment(1);
}

pub fn events_dropped(topic: &'static str) {
    counter!("events.dropped", "topic" => topic).increment(1);
}

pub fn degrade(reason: &'static str) {
    counter!("degrade", "reason" => reason).increment(1);
}

pub fn tick_processing_latency(d: Duration) {
    histogram!("tick.processing.latency").record(d.as_secs_f64());
}

pub fn order_placement_latency(d: Duration) {
    histogram!("order.placement.latency").record(d.as_secs_f64());
}

pub fn reconcile_cycle_duration(d: Duration) {
    histogram!("reconcile.cycle.duration").record(d.as_secs_f64());
}

pub fn broker_health(broker_code: &str, healthy: bool) {
    gauge!("broker.health", "broker" => broker_code.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

pub fn open_trades(count: f64) {
    gauge!("open.trades").set(count);
}

pub fn pending_trades(count: f64) {
    gauge!("pending.trades").set(count);
}

pub fn rate_utilization(broker_code: &str, ratio: f64) {
    gauge!("rate.utilization", "broker" => broker_code.to_string()).set(ratio);
}
