//! Broker reconciliation loop (SPEC_FULL §4.9, C9).
//!
//! Runs on a fixed interval and drives two independent sweeps: entry orders
//! (PENDING trades, confirmed FILLED or timed out) and exit orders (PLACED
//! exit intents, confirmed FILLED or FAILED). A confirmed entry fill is the
//! only place a trade moves FILLED -> OPEN and starts being tracked by the
//! exit monitor; a confirmed exit fill is the only place a trade moves
//! OPEN -> CLOSED and stops being tracked. Concurrency across brokers is
//! capped by a semaphore so one slow/rate-limited broker cannot starve the
//! others.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;

use crate::broker::{OrderBroker, OrderState};
use crate::clock::Clock;
use crate::config::ReconcileConfig;
use crate::domain::{ExitIntent, Trade, TradeStatus};
use crate::exit_monitor::{ExitMonitor, OpenPosition, DEFAULT_MAX_HOLD_HOURS};
use crate::trade_store::TradeStore;

pub struct Reconciler {
    trades: TradeStore,
    brokers: HashMap<String, Arc<dyn OrderBroker>>,
    clock: Arc<dyn Clock>,
    config: ReconcileConfig,
    semaphore: Arc<Semaphore>,
    exit_monitor: Arc<ExitMonitor>,
}

impl Reconciler {
    pub fn new(trades: TradeStore, brokers: HashMap<String, Arc<dyn OrderBroker>>, clock: Arc<dyn Clock>, config: ReconcileConfig, exit_monitor: Arc<ExitMonitor>) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Self { trades, brokers, clock, config, semaphore, exit_monitor }
    }

    /// Runs forever on `config.interval()`, ticking immediately on start.
    /// Intended to be spawned as its own task; a caller that wants a clean
    /// shutdown should wrap this in `tokio::select!` against a cancellation
    /// signal.
    pub async fn run_forever(&self) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.run_once().await;
        }
    }

    /// One reconciliation pass over both entry and exit order queues.
    /// Returns the entry-side count reconciled for observability in tests.
    pub async fn run_once(&self) -> usize {
        let started = std::time::Instant::now();
        let now = self.clock.now();

        if self.semaphore.available_permits() == 0 {
            crate::metrics::reconcile_rate_limited();
        }

        let checked = self.reconcile_entries(now).await;
        self.reconcile_exits(now).await;
        self.report_gauges().await;

        crate::metrics::reconcile_checked();
        crate::metrics::reconcile_cycle_duration(started.elapsed());
        checked
    }

    async fn reconcile_entries(&self, now: DateTime<Utc>) -> usize {
        let timeout_cutoff = now - self.config.pending_timeout();

        let pending = match self.trades.pending_older_than(now).await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "reconciler failed to load pending trades");
                return 0;
            }
        };

        let mut checked = 0usize;
        let mut tasks = Vec::with_capacity(pending.len());
        for trade in pending {
            if trade.last_broker_update_at <= timeout_cutoff {
                self.time_out(&trade).await;
                continue;
            }
            checked += 1;
            let Some(broker) = self.broker_for(&trade) else { continue };
            let permit = Arc::clone(&self.semaphore);
            let trades = self.trades.clone();
            let exit_monitor = Arc::clone(&self.exit_monitor);
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                reconcile_one(trades, broker, exit_monitor, trade, now).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        checked
    }

    async fn reconcile_exits(&self, now: DateTime<Utc>) {
        let placed = match self.trades.placed_exit_intents().await {
            Ok(rows) => rows,
            Err(err) => {
                tracing::error!(error = %err, "reconciler failed to load placed exit intents");
                return;
            }
        };

        let mut tasks = Vec::with_capacity(placed.len());
        for exit_intent in placed {
            let Some(broker) = self.broker_for_exit(&exit_intent) else { continue };
            let permit = Arc::clone(&self.semaphore);
            let trades = self.trades.clone();
            let exit_monitor = Arc::clone(&self.exit_monitor);
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await;
                reconcile_exit_one(trades, broker, exit_monitor, exit_intent, now).await;
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
    }

    async fn report_gauges(&self) {
        if let Ok(open) = self.trades.count_by_status(TradeStatus::Open).await {
            crate::metrics::open_trades(open as f64);
        }
        if let Ok(pending) = self.trades.count_by_status(TradeStatus::Pending).await {
            crate::metrics::pending_trades(pending as f64);
        }

        let utilization = 1.0 - (self.semaphore.available_permits() as f64 / self.config.max_concurrent.max(1) as f64);
        for code in self.brokers.keys() {
            crate::metrics::rate_utilization(code, utilization);
        }

        for (code, broker) in &self.brokers {
            let healthy = broker.authenticate().await.is_ok();
            crate::metrics::broker_health(code, healthy);
        }
    }

    async fn time_out(&self, trade: &Trade) {
        let now = self.clock.now();
        if let Err(err) = self.trades.mark_terminal_unfilled(trade.trade_id, TradeStatus::Timeout, now).await {
            tracing::error!(error = %err, trade_id = %trade.trade_id, "failed to mark trade TIMEOUT");
            return;
        }
        crate::metrics::reconcile_timeouts();
    }

    fn broker_for(&self, trade: &Trade) -> Option<Arc<dyn OrderBroker>> {
        self.brokers.values().next().cloned().or_else(|| {
            tracing::warn!(trade_id = %trade.trade_id, "no order broker registered for reconciliation");
            None
        })
    }

    fn broker_for_exit(&self, exit_intent: &ExitIntent) -> Option<Arc<dyn OrderBroker>> {
        self.brokers.values().next().cloned().or_else(|| {
            tracing::warn!(exit_intent_id = %exit_intent.exit_intent_id, "no order broker registered for exit reconciliation");
            None
        })
    }
}

async fn reconcile_one(trades: TradeStore, broker: Arc<dyn OrderBroker>, exit_monitor: Arc<ExitMonitor>, trade: Trade, now: DateTime<Utc>) {
    let Some(broker_order_id) = trade.broker_order_id.clone() else { return };
    let status = match broker.get_order_status(&broker_order_id, trade.client_order_id).await {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(error = %err, trade_id = %trade.trade_id, "order status poll failed");
            return;
        }
    };

    match status.state {
        OrderState::Complete => {
            let Some(avg_price) = status.avg_fill_price else { return };
            if let Err(err) = trades.mark_filled(trade.trade_id, status.filled_qty, avg_price, now).await {
                tracing::error!(error = %err, trade_id = %trade.trade_id, "failed to mark FILLED from reconciler");
                return;
            }
            crate::metrics::reconcile_updated();
            crate::metrics::orders_filled();

            if let Err(err) = trades.mark_open(trade.trade_id, now).await {
                tracing::error!(error = %err, trade_id = %trade.trade_id, "failed to mark OPEN after fill confirmation");
                return;
            }

            match trades.by_id(trade.trade_id).await {
                Ok(Some(opened)) => {
                    if let Some(position) = OpenPosition::from_trade(&opened, chrono::Duration::hours(DEFAULT_MAX_HOLD_HOURS)) {
                        exit_monitor.track(position);
                    }
                }
                Ok(None) => {}
                Err(err) => tracing::error!(error = %err, trade_id = %trade.trade_id, "failed to reload trade after fill confirmation"),
            }
        }
        OrderState::Rejected => {
            let reason = status.reject_reason.unwrap_or_else(|| "broker reports REJECTED".to_string());
            if trades.mark_rejected(trade.trade_id, &reason, now).await.is_ok() {
                crate::metrics::reconcile_updated();
            }
        }
        OrderState::Cancelled => {
            if trades.mark_terminal_unfilled(trade.trade_id, TradeStatus::Cancelled, now).await.is_ok() {
                crate::metrics::reconcile_updated();
            }
        }
        OrderState::Open | OrderState::Pending | OrderState::TriggerPending | OrderState::Unknown => {
            // Still in flight; nothing to update this pass.
        }
    }
}

async fn reconcile_exit_one(trades: TradeStore, broker: Arc<dyn OrderBroker>, exit_monitor: Arc<ExitMonitor>, exit_intent: ExitIntent, now: DateTime<Utc>) {
    let Some(broker_order_id) = exit_intent.broker_order_id.clone() else { return };
    let status = match broker.get_order_status(&broker_order_id, exit_intent.exit_intent_id).await {
        Ok(status) => status,
        Err(err) => {
            tracing::warn!(error = %err, exit_intent_id = %exit_intent.exit_intent_id, "exit order status poll failed");
            return;
        }
    };

    let trade = match trades.by_id(exit_intent.trade_id).await {
        Ok(Some(trade)) => trade,
        Ok(None) => return,
        Err(err) => {
            tracing::error!(error = %err, trade_id = %exit_intent.trade_id, "failed to load trade for exit reconciliation");
            return;
        }
    };

    match status.state {
        OrderState::Complete => {
            let (Some(exit_price), Some(entry_price)) = (status.avg_fill_price, trade.entry_price) else { return };
            let realized_pnl = Trade::compute_realized_pnl(entry_price, exit_price, status.filled_qty);
            if let Err(err) = trades.mark_closed(trade.trade_id, exit_price, exit_intent.exit_reason, realized_pnl, now).await {
                tracing::error!(error = %err, trade_id = %trade.trade_id, "failed to mark CLOSED from reconciler");
                return;
            }
            if let Err(err) = trades.mark_exit_filled(exit_intent.exit_intent_id).await {
                tracing::error!(error = %err, exit_intent_id = %exit_intent.exit_intent_id, "failed to mark exit intent FILLED");
            }
            exit_monitor.untrack(&trade.symbol, trade.trade_id);
            crate::metrics::reconcile_updated();
        }
        OrderState::Rejected | OrderState::Cancelled => {
            if trades.mark_exit_failed(exit_intent.exit_intent_id).await.is_ok() {
                crate::metrics::reconcile_updated();
            }
        }
        OrderState::Open | OrderState::Pending | OrderState::TriggerPending | OrderState::Unknown => {
            // Still in flight; nothing to update this pass.
        }
    }
}
