//! Postgres-backed [`ValidationDataSource`] (SPEC_FULL §4.6, C6): the
//! concrete port the fan-out calls against `user_brokers`, `risk_profiles`,
//! and `entry_cooldowns` in production.
//!
//! Capital and log-loss-to-date figures live on a broker's margin API in a
//! full deployment; this crate ships no such adapter (SPEC_FULL names the
//! broker integration itself as a downstream concern), so the sizing
//! snapshot's capital fields come from [`crate::config::RiskConfig`]'s fixed
//! defaults until a live balance feed is wired in.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::candle::{average_true_range, CandleAggregator};
use crate::clock::{TF_125M, TF_1M};
use crate::config::Config;
use crate::db::Database;
use crate::domain::signal::ConfluenceType;
use crate::domain::{BrokerEnv, BrokerRole, RiskProfile, UserBroker};
use crate::error::{PersistenceError, TradingError};
use crate::trade_store::TradeStore;
use crate::validation::{ValidationContext, ValidationDataSource};

const ATR_PERIOD: usize = 14;

pub struct PgValidationDataSource {
    db: Database,
    trades: TradeStore,
    candles: Arc<CandleAggregator>,
    default_total_capital: Decimal,
    default_available_cash: Decimal,
}

impl PgValidationDataSource {
    pub fn new(db: Database, trades: TradeStore, candles: Arc<CandleAggregator>, config: &Config) -> Self {
        Self {
            db,
            trades,
            candles,
            default_total_capital: Decimal::try_from(config.risk.default_total_capital).unwrap_or(Decimal::new(500_000, 0)),
            default_available_cash: Decimal::try_from(config.risk.default_available_cash).unwrap_or(Decimal::new(500_000, 0)),
        }
    }
}

#[async_trait::async_trait]
impl ValidationDataSource for PgValidationDataSource {
    async fn exec_brokers_for_symbol(&self, symbol: &str) -> Result<Vec<UserBroker>, TradingError> {
        let rows = sqlx::query(
            "SELECT * FROM user_brokers WHERE role = 'EXEC' AND enabled = TRUE AND portfolio_paused = FALSE \
             AND $1 = ANY(watchlist)",
        )
        .bind(symbol)
        .fetch_all(self.db.pool())
        .await
        .map_err(PersistenceError::from)?;
        Ok(rows.into_iter().map(row_to_user_broker).collect())
    }

    async fn risk_profile(&self, risk_profile_id: Uuid) -> Result<RiskProfile, TradingError> {
        let row = sqlx::query("SELECT * FROM risk_profiles WHERE risk_profile_id = $1")
            .bind(risk_profile_id)
            .fetch_one(self.db.pool())
            .await
            .map_err(PersistenceError::from)?;
        Ok(row_to_risk_profile(row))
    }

    async fn build_context(&self, user_broker: &UserBroker, symbol: &str, now: DateTime<Utc>) -> Result<ValidationContext, TradingError> {
        let profile = self.risk_profile(user_broker.risk_profile_id).await?;

        let open_trade = self.trades.open_for_symbol(user_broker.user_broker_id, symbol).await.map_err(PersistenceError::from)?;
        let current_exposure = self.trades.open_exposure(user_broker.user_broker_id).await.map_err(PersistenceError::from)?;

        let day_start = now.date_naive().and_hms_opt(0, 0, 0).expect("midnight is always valid").and_utc();
        let week_start = day_start - chrono::Duration::days(now.weekday().num_days_from_monday() as i64);
        let daily_loss_pct = self
            .trades
            .realized_loss_pct_since(user_broker.user_broker_id, day_start, self.default_total_capital)
            .await
            .map_err(PersistenceError::from)?;
        let weekly_loss_pct = self
            .trades
            .realized_loss_pct_since(user_broker.user_broker_id, week_start, self.default_total_capital)
            .await
            .map_err(PersistenceError::from)?;

        let last_trade_at = self.last_trade_at(user_broker.user_broker_id, symbol).await?;

        let ltf = self.candles.recent(symbol, TF_1M, ATR_PERIOD + 1);
        let atr = average_true_range(&ltf, ATR_PERIOD).or_else(|| {
            let htf = self.candles.recent(symbol, TF_125M, ATR_PERIOD + 1);
            average_true_range(&htf, ATR_PERIOD)
        });

        Ok(ValidationContext {
            profile,
            user_broker: user_broker.clone(),
            sizing_snapshot: crate::sizing::SizingSnapshot {
                available_cash: self.default_available_cash,
                total_capital: self.default_total_capital,
                portfolio_log_loss: Decimal::ZERO,
                symbol_log_loss: Decimal::ZERO,
                atr,
            },
            current_exposure,
            daily_loss_pct,
            weekly_loss_pct,
            last_trade_at,
            open_trade,
        })
    }

    async fn record_cooldown(&self, user_broker_id: Uuid, symbol: &str, at: DateTime<Utc>) -> Result<(), TradingError> {
        sqlx::query(
            "INSERT INTO entry_cooldowns (user_broker_id, symbol, last_trade_at) VALUES ($1, $2, $3) \
             ON CONFLICT (user_broker_id, symbol) DO UPDATE SET last_trade_at = excluded.last_trade_at",
        )
        .bind(user_broker_id)
        .bind(symbol)
        .bind(at)
        .execute(self.db.pool())
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }

    async fn persist_intent(&self, intent: &crate::domain::TradeIntent) -> Result<(), TradingError> {
        sqlx::query(
            "INSERT INTO trade_intents (intent_id, signal_id, user_broker_id, approved_qty, limit_price, \
             product_type, status, reject_reason, created_at) VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9) \
             ON CONFLICT (signal_id, user_broker_id) DO NOTHING",
        )
        .bind(intent.intent_id)
        .bind(intent.signal_id)
        .bind(intent.user_broker_id)
        .bind(intent.approved_qty.raw())
        .bind(intent.limit_price.raw())
        .bind("MIS")
        .bind(intent_status_str(intent.status))
        .bind(&intent.reject_reason)
        .bind(intent.created_at)
        .execute(self.db.pool())
        .await
        .map_err(PersistenceError::from)?;
        Ok(())
    }
}

impl PgValidationDataSource {
    async fn last_trade_at(&self, user_broker_id: Uuid, symbol: &str) -> Result<Option<DateTime<Utc>>, TradingError> {
        let row = sqlx::query("SELECT last_trade_at FROM entry_cooldowns WHERE user_broker_id = $1 AND symbol = $2")
            .bind(user_broker_id)
            .bind(symbol)
            .fetch_optional(self.db.pool())
            .await
            .map_err(PersistenceError::from)?;
        Ok(row.map(|r| r.get("last_trade_at")))
    }
}

fn intent_status_str(status: crate::domain::IntentStatus) -> &'static str {
    match status {
        crate::domain::IntentStatus::PendingValidation => "PENDING_VALIDATION",
        crate::domain::IntentStatus::Approved => "APPROVED",
        crate::domain::IntentStatus::Rejected => "REJECTED",
    }
}

fn row_to_user_broker(row: sqlx::postgres::PgRow) -> UserBroker {
    UserBroker {
        user_broker_id: row.get("user_broker_id"),
        user_id: row.get("user_id"),
        broker_code: row.get("broker_code"),
        role: match row.get::<String, _>("role").as_str() {
            "DATA" => BrokerRole::Data,
            _ => BrokerRole::Exec,
        },
        env: match row.get::<String, _>("env").as_str() {
            "PRODUCTION" => BrokerEnv::Production,
            "UAT" => BrokerEnv::Uat,
            _ => BrokerEnv::Sandbox,
        },
        risk_profile_id: row.get("risk_profile_id"),
        credentials_ref: row.get("credentials_ref"),
        enabled: row.get("enabled"),
        watchlist: row.get("watchlist"),
        portfolio_paused: row.get("portfolio_paused"),
    }
}

fn row_to_risk_profile(row: sqlx::postgres::PgRow) -> RiskProfile {
    let confluence_id: i16 = row.get("min_confluence");
    RiskProfile {
        risk_profile_id: row.get("risk_profile_id"),
        name: row.get("name"),
        min_confluence: ConfluenceType::from_zone_count(confluence_id as u8).unwrap_or(ConfluenceType::Single),
        min_p_win: row.get("min_p_win"),
        min_kelly: row.get("min_kelly"),
        max_symbol_capital_pct: row.get("max_symbol_capital_pct"),
        max_portfolio_exposure_pct: row.get("max_portfolio_exposure_pct"),
        max_portfolio_log_loss: row.get("max_portfolio_log_loss"),
        max_symbol_log_loss: row.get("max_symbol_log_loss"),
        max_position_log_loss: row.get("max_position_log_loss"),
        max_pyramid_level: row.get::<i32, _>("max_pyramid_level") as u32,
        rebuy_spacing_atr: row.get("rebuy_spacing_atr"),
        velocity_multiplier: row.get("velocity_multiplier"),
        cooldown_duration: chrono::Duration::seconds(row.get("cooldown_seconds")),
        max_hold_duration: chrono::Duration::seconds(row.get("max_hold_seconds")),
        max_daily_loss_pct: row.get("max_daily_loss_pct"),
        max_weekly_loss_pct: row.get("max_weekly_loss_pct"),
        min_trade_value: row.get("min_trade_value"),
        max_trade_value: row.get("max_trade_value"),
        max_kelly_multiplier: row.get("max_kelly_multiplier"),
    }
}
