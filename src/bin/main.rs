//! Process entrypoint: loads config, runs the startup gate, wires every
//! component, and drives the background loops until a shutdown signal
//! arrives (SPEC_FULL §4.12, §4.16).

use std::collections::HashMap;
use std::sync::Arc;

use confluence_trader::broker::simulated::SimulatedBroker;
use confluence_trader::broker::OrderBroker;
use confluence_trader::candle::{CandleAggregator, CandleStore};
use confluence_trader::clock::{Clock, SessionCalendar, SystemClock};
use confluence_trader::config::Config;
use confluence_trader::confluence::SignalStore;
use confluence_trader::db::Database;
use confluence_trader::event_bus::EventBus;
use confluence_trader::execution::Executor;
use confluence_trader::exit_monitor::{ExitMonitor, DEFAULT_MAX_HOLD_HOURS};
use confluence_trader::pipeline::Pipeline;
use confluence_trader::reconciler::Reconciler;
use confluence_trader::startup_gate;
use confluence_trader::tick_stream::{Subscriber, TickStream};
use confluence_trader::trade_store::TradeStore;
use confluence_trader::validation::IntentFanOut;
use confluence_trader::validation_data_source::PgValidationDataSource;

const CONFIG_PATH: &str = "config/confluence-trader.toml";
const EVENT_BUS_CAPACITY: usize = 4096;
const DEFAULT_BROKER_CODE: &str = "SIMULATED";
const STALE_CANDLE_FINALIZE_INTERVAL_SECONDS: u64 = 2;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load(CONFIG_PATH)?;
    let _log_guard = confluence_trader::logging::init_logging(&config);
    confluence_trader::metrics::describe();

    tracing::info!(mode = ?config.mode, git_hash = env!("GIT_HASH"), "starting confluence-trader");
    startup_gate::enforce_or_exit(&config);

    let db = Database::connect(&config.database_url).await?;
    db.migrate().await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let calendar = SessionCalendar::default_equities();
    let _event_bus = EventBus::new(EVENT_BUS_CAPACITY);

    let trade_store = TradeStore::new(db.clone());
    let exit_monitor = Arc::new(ExitMonitor::new());
    let open_trades = trade_store.all_open().await?;
    exit_monitor.load(&open_trades, chrono::Duration::hours(DEFAULT_MAX_HOLD_HOURS));
    tracing::info!(open_trade_count = open_trades.len(), "exit monitor seeded");

    let mut order_brokers: HashMap<String, Arc<dyn OrderBroker>> = HashMap::new();
    order_brokers.insert(DEFAULT_BROKER_CODE.to_string(), Arc::new(SimulatedBroker::new(Arc::clone(&clock))));

    let reconciler = Arc::new(Reconciler::new(
        trade_store.clone(),
        order_brokers.clone(),
        Arc::clone(&clock),
        config.reconcile.clone(),
        Arc::clone(&exit_monitor),
    ));
    let reconciler_handle = {
        let reconciler = Arc::clone(&reconciler);
        tokio::spawn(async move { reconciler.run_forever().await })
    };

    let aggregator = Arc::new(CandleAggregator::new(calendar));
    let candle_store = CandleStore::new(db.clone());
    let signal_store = SignalStore::new(db.clone());
    let data_source = Arc::new(PgValidationDataSource::new(db.clone(), trade_store.clone(), Arc::clone(&aggregator), &config));
    let fan_out = IntentFanOut::new(data_source);
    let executor = Executor::new(trade_store.clone(), order_brokers);

    let pipeline = Arc::new(Pipeline::new(
        &config,
        DEFAULT_BROKER_CODE.to_string(),
        calendar,
        Arc::clone(&aggregator),
        candle_store,
        signal_store,
        fan_out,
        executor,
        Arc::clone(&exit_monitor),
        trade_store.clone(),
    ));

    let tick_handles = TickStream::build(clock.now());
    let mut tick_receivers: HashMap<Subscriber, tokio::sync::mpsc::Receiver<confluence_trader::domain::Tick>> =
        tick_handles.receivers.into_iter().collect();
    let mut candle_builder_ticks = tick_receivers.remove(&Subscriber::CandleBuilder).expect("CandleBuilder subscriber always registered");

    let tick_task = {
        let pipeline = Arc::clone(&pipeline);
        let clock = Arc::clone(&clock);
        tokio::spawn(async move {
            while let Some(tick) = candle_builder_ticks.recv().await {
                if let Err(err) = pipeline.on_tick(&tick, clock.now()).await {
                    tracing::warn!(symbol = %tick.symbol, %err, "tick processing failed");
                }
            }
        })
    };

    let finalize_task = {
        let pipeline = Arc::clone(&pipeline);
        let clock = Arc::clone(&clock);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(STALE_CANDLE_FINALIZE_INTERVAL_SECONDS));
            loop {
                ticker.tick().await;
                if let Err(err) = pipeline.finalize_stale_candles(clock.now()).await {
                    tracing::warn!(%err, "stale candle finalization failed");
                }
            }
        })
    };

    // Kept alive for the process lifetime: the data broker's subscribe
    // callback calls `_tick_stream.ingest(...)` on this handle once a real
    // market-data adapter is wired in. Dropping it would close every
    // subscriber channel immediately.
    let _tick_stream = tick_handles.stream;

    wait_for_shutdown().await;
    tracing::info!("shutdown signal received, draining background tasks");
    reconciler_handle.abort();
    tick_task.abort();
    finalize_task.abort();

    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
