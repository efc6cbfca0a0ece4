//! Process configuration (SPEC_FULL §4.16).
//!
//! A single immutable [`Config`] is built once at startup by layering
//! environment-variable overrides on top of a TOML file, matching the
//! env-over-file convention this codebase already uses for hot-reloadable
//! settings. No process-wide mutable config state exists anywhere else in
//! the crate; components take an `Arc<Config>` (or the fields they need) at
//! construction.

use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::BrokerEnv;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Mode {
    Production,
    Beta,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    pub env: BrokerEnvConfig,
    pub credentials_ref: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BrokerEnvConfig {
    Production,
    Uat,
    Sandbox,
}

impl From<BrokerEnvConfig> for BrokerEnv {
    fn from(v: BrokerEnvConfig) -> Self {
        match v {
            BrokerEnvConfig::Production => BrokerEnv::Production,
            BrokerEnvConfig::Uat => BrokerEnv::Uat,
            BrokerEnvConfig::Sandbox => BrokerEnv::Sandbox,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub interval_seconds: u64,
    pub pending_timeout_minutes: u64,
    pub max_concurrent: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 30,
            pending_timeout_minutes: 10,
            max_concurrent: 5,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }

    pub fn pending_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.pending_timeout_minutes as i64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SignalConfig {
    /// SPEC_FULL §9 item 1: pWin is a hardcoded constant pending an
    /// empirical win-rate estimator. Exposed here so it is at least
    /// swappable without a code change.
    pub p_win_constant: f64,
    pub assumed_payoff_ratio: f64,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            p_win_constant: 0.65,
            assumed_payoff_ratio: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// SPEC_FULL §9 item 3: the source clamps kelly at 1.5x without
    /// documenting why; kept as a named, overridable default here.
    pub max_kelly_multiplier: f64,
    /// Capital and log-loss-to-date figures live on the broker's margin
    /// API in a full deployment; this crate ships no such adapter, so the
    /// validator's sizing snapshot is built from these fixed per-process
    /// defaults until a live balance feed exists.
    pub default_total_capital: f64,
    pub default_available_cash: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_kelly_multiplier: 1.5,
            default_total_capital: 500_000.0,
            default_available_cash: 500_000.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: String,
    pub log_file: String,
    /// `never` | `hourly` | `daily`.
    pub rotation: String,
    pub log_level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            log_file: "confluence-trader.log".to_string(),
            rotation: "daily".to_string(),
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandleConfig {
    /// SPEC_FULL §9 item 5: staleness threshold before the evaluator falls
    /// back to the previous day's DAILY close as LTP during a broker
    /// disconnect. Not spec-mandated; chosen as a conservative default.
    pub daily_fallback_staleness_minutes: i64,
}

impl Default for CandleConfig {
    fn default() -> Self {
        Self { daily_fallback_staleness_minutes: 15 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub order_execution_enabled: bool,
    pub persist_tick_events: bool,
    pub async_event_writer_enabled: bool,
    pub reconcile: ReconcileConfig,
    pub evaluator_window_sizes: EvaluatorWindows,
    pub risk_profile_default: String,
    pub database_url: String,
    pub brokers: HashMap<String, BrokerConfig>,
    pub signal: SignalConfig,
    pub risk: RiskConfig,
    pub candle: CandleConfig,
    pub logging: LoggingConfig,
}

impl Config {
    /// JSON in production, pretty in development (SPEC_FULL §4.18).
    pub fn use_json_logging(&self) -> bool {
        matches!(self.mode, Mode::Production)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EvaluatorWindows {
    pub ltf_candles: usize,
    pub itf_candles: usize,
    pub htf_candles: usize,
}

impl Default for EvaluatorWindows {
    fn default() -> Self {
        Self { ltf_candles: 20, itf_candles: 20, htf_candles: 20 }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Beta
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::default(),
            order_execution_enabled: false,
            persist_tick_events: false,
            async_event_writer_enabled: false,
            reconcile: ReconcileConfig::default(),
            evaluator_window_sizes: EvaluatorWindows::default(),
            risk_profile_default: "balanced".to_string(),
            database_url: String::new(),
            brokers: HashMap::new(),
            signal: SignalConfig::default(),
            risk: RiskConfig::default(),
            candle: CandleConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Config {
    /// Loads `path` as TOML, then applies `APP__SECTION__KEY`-style
    /// environment overrides (double underscore separates nesting).
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut cfg: Config = if std::path::Path::new(path).exists() {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::InvalidValue { key: path.to_string(), reason: e.to_string() })?;
            toml::from_str(&raw)
                .map_err(|e| ConfigError::InvalidValue { key: path.to_string(), reason: e.to_string() })?
        } else {
            Config::default()
        };

        if let Ok(url) = std::env::var("APP__DATABASE_URL") {
            cfg.database_url = url;
        }
        if let Ok(mode) = std::env::var("APP__MODE") {
            cfg.mode = match mode.as_str() {
                "PRODUCTION" => Mode::Production,
                _ => Mode::Beta,
            };
        }
        if let Ok(v) = std::env::var("APP__ORDER_EXECUTION_ENABLED") {
            cfg.order_execution_enabled = v == "true";
        }

        Ok(cfg)
    }
}
