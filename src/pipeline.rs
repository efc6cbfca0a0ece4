//! End-to-end tick-to-order orchestration: wires the tick stream's
//! `CandleBuilder` subscriber through candle aggregation, confluence
//! evaluation, validation fan-out, and order placement, and the
//! `ExitMonitor` subscriber through to exit order placement (SPEC_FULL §2).
//!
//! Everything here is composition — the actual decision logic lives in the
//! modules it calls. Kept as its own module so `bin/main.rs` stays a thin
//! startup/shutdown shell.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::candle::{average_true_range, CandleAggregator, CandleBuilder, CandleStore};
use crate::clock::{SessionCalendar, TF_125M, TF_1M, TF_25M};
use crate::confluence::{ConfluenceEvaluator, SignalStore, TimeframeWindows};
use crate::config::{Config, EvaluatorWindows};
use crate::domain::intent::IntentStatus;
use crate::domain::{Tick, TradeType};
use crate::error::TradingError;
use crate::execution::executor::ExitGeometry;
use crate::execution::Executor;
use crate::exit_monitor::ExitMonitor;
use crate::trade_store::TradeStore;
use crate::validation::IntentFanOut;

const ATR_PERIOD: usize = 14;

pub struct Pipeline {
    calendar: SessionCalendar,
    windows: EvaluatorWindows,
    default_broker_code: String,
    payoff_ratio: Decimal,
    candle_builder: CandleBuilder,
    aggregator: Arc<CandleAggregator>,
    candle_store: CandleStore,
    evaluator: ConfluenceEvaluator,
    signal_store: SignalStore,
    fan_out: IntentFanOut,
    executor: Executor,
    exit_monitor: Arc<ExitMonitor>,
    trades: TradeStore,
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        default_broker_code: String,
        calendar: SessionCalendar,
        aggregator: Arc<CandleAggregator>,
        candle_store: CandleStore,
        signal_store: SignalStore,
        fan_out: IntentFanOut,
        executor: Executor,
        exit_monitor: Arc<ExitMonitor>,
        trades: TradeStore,
    ) -> Self {
        Self {
            evaluator: ConfluenceEvaluator::new(calendar.clone(), config),
            windows: config.evaluator_window_sizes.clone(),
            payoff_ratio: Decimal::try_from(config.signal.assumed_payoff_ratio).unwrap_or(Decimal::new(15, 1)),
            default_broker_code,
            candle_builder: CandleBuilder::new(calendar.clone()),
            calendar,
            aggregator,
            candle_store,
            signal_store,
            fan_out,
            executor,
            exit_monitor,
            trades,
        }
    }

    /// Feeds one tick through candle building and exit evaluation. This is
    /// the single entry point the tick stream's `CandleBuilder` and
    /// `ExitMonitor` subscriber tasks both end up calling.
    pub async fn on_tick(&self, tick: &Tick, now: DateTime<Utc>) -> Result<(), TradingError> {
        if let Some(closed) = self.candle_builder.on_tick(tick) {
            self.on_1m_closed(closed, now).await?;
        }

        for exit_signal in self.exit_monitor.on_tick(&tick.symbol, tick.last_price, now) {
            if let Err(err) = self.handle_exit_signal(exit_signal, now).await {
                tracing::warn!(trade_id = %exit_signal.trade_id, %err, "exit placement failed, reconciler will retry next cycle");
            }
        }

        Ok(())
    }

    /// Runs the 2s stale-partial finalizer (SPEC_FULL §4.3).
    pub async fn finalize_stale_candles(&self, now: DateTime<Utc>) -> Result<(), TradingError> {
        for closed in self.candle_builder.finalize_stale(now) {
            self.on_1m_closed(closed, now).await?;
        }
        Ok(())
    }

    async fn on_1m_closed(&self, candle: crate::domain::Candle, now: DateTime<Utc>) -> Result<(), TradingError> {
        self.persist_closed_candle(&candle, TF_1M).await?;

        let aggregated = self.aggregator.on_1m_closed(candle.clone());
        if let Some(c25) = &aggregated.closed_25m {
            self.persist_closed_candle(c25, TF_25M).await?;
        }
        if let Some(c125) = &aggregated.closed_125m {
            self.persist_closed_candle(c125, TF_125M).await?;
        }

        if !self.calendar.is_market_open(now) {
            return Ok(());
        }

        let ltf = self.aggregator.recent(&candle.symbol, TF_1M, self.windows.ltf_candles);
        let itf = self.aggregator.recent(&candle.symbol, TF_25M, self.windows.itf_candles);
        let htf = self.aggregator.recent(&candle.symbol, TF_125M, self.windows.htf_candles);

        let Some(signal) = self.evaluator.evaluate(&candle.symbol, candle.close, TimeframeWindows { htf: &htf, itf: &itf, ltf: &ltf }, now) else {
            return Ok(());
        };

        let (signal, newly_inserted) = self.signal_store.insert_or_touch(&signal).await?;
        if newly_inserted {
            crate::metrics::signals_generated(signal.confluence_type.as_str());
        }
        let intents = self.fan_out.run(&signal, now).await?;

        let atr = average_true_range(&ltf, ATR_PERIOD).or_else(|| average_true_range(&htf, ATR_PERIOD));
        let Some(atr) = atr else {
            return Ok(());
        };

        for intent in intents.into_iter().filter(|i| i.status == IntentStatus::Approved) {
            let trade_type = match self.trades.open_for_symbol(intent.user_broker_id, &candle.symbol).await? {
                Some(_) => TradeType::Rebuy,
                None => TradeType::NewBuy,
            };
            let exit_geometry = ExitGeometry::from_atr(intent.limit_price, atr, self.payoff_ratio);
            self.executor.place_entry(&intent, &candle.symbol, &self.default_broker_code, exit_geometry, trade_type, now).await?;
        }

        Ok(())
    }

    async fn handle_exit_signal(&self, exit_signal: crate::exit_monitor::ExitSignal, now: DateTime<Utc>) -> Result<(), TradingError> {
        let Some(trade) = self.trades.by_id(exit_signal.trade_id).await? else { return Ok(()) };

        if let Some(existing) = self.trades.latest_exit_intent(trade.trade_id).await? {
            if existing.status.blocks_new_exit() {
                return Ok(());
            }
        }

        let episode_id = Uuid::new_v4();
        let exit_intent = self
            .trades
            .create_exit_intent(trade.trade_id, exit_signal.user_broker_id, exit_signal.reason, episode_id, now)
            .await?;

        let qty = crate::money::Qty::new(trade.filled_qty);
        self.executor.place_exit(&exit_intent, &trade, &self.default_broker_code, qty).await?;
        Ok(())
    }

    async fn persist_closed_candle(&self, candle: &crate::domain::Candle, timeframe_minutes: u32) -> Result<(), TradingError> {
        match self.candle_store.upsert_closed(candle).await {
            Ok(()) => {
                crate::metrics::candles_closed(timeframe_minutes);
                Ok(())
            }
            Err(err) => {
                crate::metrics::candles_persist_fail();
                Err(err.into())
            }
        }
    }
}
