//! Core data model (SPEC_FULL §3): ticks, candles, signals, intents, trades,
//! exit intents, and the multi-tenant account types that tie them together.

pub mod candle;
pub mod exit_intent;
pub mod intent;
pub mod signal;
pub mod trade;

pub use candle::{Candle, CandleState};
pub use exit_intent::{ExitIntent, ExitIntentStatus, ExitReason};
pub use intent::{IntentStatus, TradeIntent};
pub use signal::{ConfluenceType, Signal, SignalStatus, Strength};
pub use trade::{Trade, TradeStatus, TradeType};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::money::Price;

/// A single print from the data broker. Immutable, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    pub exchange_timestamp: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
    pub last_price: Price,
    pub last_qty: Decimal,
    pub volume: Decimal,
}

impl Tick {
    /// Dedup key per SPEC_FULL §4.2: falls back to `received_at` when the
    /// exchange did not stamp the print, and the caller is expected to bump
    /// `ticks.missingExchangeTs` when that happens.
    pub fn dedup_key(&self) -> (String, DateTime<Utc>, Decimal, Decimal) {
        let ts = self.exchange_timestamp.unwrap_or(self.received_at);
        (self.symbol.clone(), ts, self.last_price.raw(), self.last_qty)
    }

    pub fn used_fallback_timestamp(&self) -> bool {
        self.exchange_timestamp.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerRole {
    Data,
    Exec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerEnv {
    Production,
    Uat,
    Sandbox,
}

/// A user's brokerage account. A user has at most one enabled `Data` role
/// account system-wide, and many `Exec` accounts.
#[derive(Debug, Clone)]
pub struct UserBroker {
    pub user_broker_id: Uuid,
    pub user_id: Uuid,
    pub broker_code: String,
    pub role: BrokerRole,
    pub env: BrokerEnv,
    pub risk_profile_id: Uuid,
    pub credentials_ref: String,
    pub enabled: bool,
    pub watchlist: Vec<String>,
    pub portfolio_paused: bool,
}

/// Named risk-limit bundle, never embedded in a [`Signal`].
#[derive(Debug, Clone)]
pub struct RiskProfile {
    pub risk_profile_id: Uuid,
    pub name: String,
    pub min_confluence: ConfluenceType,
    pub min_p_win: Decimal,
    pub min_kelly: Decimal,
    pub max_symbol_capital_pct: Decimal,
    pub max_portfolio_exposure_pct: Decimal,
    pub max_portfolio_log_loss: Decimal,
    pub max_symbol_log_loss: Decimal,
    pub max_position_log_loss: Decimal,
    pub max_pyramid_level: u32,
    pub rebuy_spacing_atr: Decimal,
    pub velocity_multiplier: Decimal,
    pub cooldown_duration: chrono::Duration,
    pub max_hold_duration: chrono::Duration,
    pub max_daily_loss_pct: Decimal,
    pub max_weekly_loss_pct: Decimal,
    pub min_trade_value: Decimal,
    pub max_trade_value: Decimal,
    pub max_kelly_multiplier: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Active,
    Expired,
    Revoked,
}

/// Broker token row. Append-version on refresh; never updated in place
/// (SPEC_FULL §3).
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: Uuid,
    pub user_broker_id: Uuid,
    pub access_token: String,
    pub valid_till: DateTime<Utc>,
    pub status: SessionStatus,
    pub version: i64,
}
