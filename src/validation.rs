//! Per-user-broker 12-point validation and trade-intent fan-out (SPEC_FULL
//! §4.6, C6).
//!
//! [`validate`] is the pure decision function: given a snapshot of
//! everything it needs, it returns an approval or a named rejection reason,
//! never touching I/O. [`IntentFanOut`] is the orchestration layer that
//! gathers that snapshot per user-broker, behind a 5s timeout, and persists
//! the resulting intent.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::trade::TradeType;
use crate::domain::{RiskProfile, Signal, Trade, TradeIntent, UserBroker};
use crate::error::TradingError;
use crate::money::{Price, Qty};
use crate::sizing::{self, SizingResult, SizingSnapshot};

const FAN_OUT_TASK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub profile: RiskProfile,
    pub user_broker: UserBroker,
    pub sizing_snapshot: SizingSnapshot,
    pub current_exposure: Decimal,
    pub daily_loss_pct: Decimal,
    pub weekly_loss_pct: Decimal,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub open_trade: Option<Trade>,
}

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub approved: bool,
    pub reasons: Vec<&'static str>,
    pub qty: Option<Qty>,
    pub trade_type: TradeType,
}

impl ValidationResult {
    fn rejected(reason: &'static str, trade_type: TradeType) -> Self {
        Self { approved: false, reasons: vec![reason], qty: None, trade_type }
    }
}

/// The 12-point check from SPEC_FULL §4.6, run in order, short-circuiting on
/// the first failure.
pub fn validate(signal: &Signal, limit_price: Price, ctx: &ValidationContext, now: DateTime<Utc>) -> ValidationResult {
    let trade_type = if ctx.open_trade.is_some() { TradeType::Rebuy } else { TradeType::NewBuy };

    if !ctx.user_broker.enabled {
        return ValidationResult::rejected("BROKER_DISABLED", trade_type);
    }
    if ctx.user_broker.portfolio_paused {
        return ValidationResult::rejected("PORTFOLIO_PAUSED", trade_type);
    }
    if !ctx.user_broker.watchlist.iter().any(|s| s == &signal.symbol) {
        return ValidationResult::rejected("SYMBOL_NOT_WATCHED", trade_type);
    }
    if signal.confluence_type < ctx.profile.min_confluence {
        return ValidationResult::rejected("CONFLUENCE_TOO_LOW", trade_type);
    }
    if signal.p_win < ctx.profile.min_p_win {
        return ValidationResult::rejected("P_WIN_TOO_LOW", trade_type);
    }
    if signal.kelly < ctx.profile.min_kelly {
        return ValidationResult::rejected("KELLY_TOO_LOW", trade_type);
    }

    if trade_type == TradeType::Rebuy {
        let rejection = check_pyramid_gates(
            &ctx.profile,
            ctx.open_trade.as_ref().unwrap(),
            limit_price,
            ctx.sizing_snapshot.atr,
        );
        if let Some(rejection) = rejection {
            return ValidationResult::rejected(rejection, trade_type);
        }
    }

    let sizing = sizing::size(&ctx.profile, signal, &ctx.sizing_snapshot, limit_price);
    let qty = match sizing {
        SizingResult::Rejected { .. } => return ValidationResult::rejected("DATA_UNAVAILABLE", trade_type),
        SizingResult::Approved { qty, .. } => qty,
    };

    if !qty.is_positive() {
        return ValidationResult::rejected("QTY_BELOW_MINIMUM", trade_type);
    }

    let value = limit_price * qty;
    if value < ctx.profile.min_trade_value {
        return ValidationResult::rejected("VALUE_BELOW_MINIMUM", trade_type);
    }
    if value > ctx.profile.max_trade_value {
        return ValidationResult::rejected("VALUE_ABOVE_MAXIMUM", trade_type);
    }
    if ctx.current_exposure + value > ctx.profile.max_portfolio_exposure_pct * ctx.sizing_snapshot.total_capital {
        return ValidationResult::rejected("PORTFOLIO_EXPOSURE_EXCEEDED", trade_type);
    }
    if ctx.daily_loss_pct > ctx.profile.max_daily_loss_pct {
        return ValidationResult::rejected("DAILY_LOSS_LIMIT", trade_type);
    }
    if ctx.weekly_loss_pct > ctx.profile.max_weekly_loss_pct {
        return ValidationResult::rejected("WEEKLY_LOSS_LIMIT", trade_type);
    }

    if let Some(last_trade_at) = ctx.last_trade_at {
        let cooldown_elapsed = now.signed_duration_since(last_trade_at);
        if cooldown_elapsed < ctx.profile.cooldown_duration {
            return ValidationResult::rejected("COOLDOWN_ACTIVE", trade_type);
        }
    }

    ValidationResult { approved: true, reasons: Vec::new(), qty: Some(qty), trade_type }
}

/// Pyramid gates for a REBUY: level cap and minimum ATR-spacing from the
/// last entry (SPEC_FULL §4.6). `rebuy_spacing_atr` is a multiple of ATR, so
/// the minimum price distance scales with current volatility.
fn check_pyramid_gates(profile: &RiskProfile, open_trade: &Trade, limit_price: Price, atr: Option<Decimal>) -> Option<&'static str> {
    let Some(entry_price) = open_trade.entry_price else { return Some("DATA_UNAVAILABLE") };
    let Some(atr) = atr else { return Some("DATA_UNAVAILABLE") };
    let distance = (limit_price - entry_price).abs();
    let min_spacing = profile.rebuy_spacing_atr * atr;
    if distance < min_spacing {
        return Some("REBUY_SPACING_TOO_CLOSE");
    }
    None
}

/// External data the fan-out needs per user-broker; implemented against the
/// database in production, against fixtures in tests.
#[async_trait]
pub trait ValidationDataSource: Send + Sync {
    async fn exec_brokers_for_symbol(&self, symbol: &str) -> Result<Vec<UserBroker>, TradingError>;
    async fn risk_profile(&self, risk_profile_id: Uuid) -> Result<RiskProfile, TradingError>;
    async fn build_context(&self, user_broker: &UserBroker, symbol: &str, now: DateTime<Utc>) -> Result<ValidationContext, TradingError>;
    async fn record_cooldown(&self, user_broker_id: Uuid, symbol: &str, at: DateTime<Utc>) -> Result<(), TradingError>;
    async fn persist_intent(&self, intent: &TradeIntent) -> Result<(), TradingError>;
}

pub struct IntentFanOut {
    data_source: Arc<dyn ValidationDataSource>,
}

impl IntentFanOut {
    pub fn new(data_source: Arc<dyn ValidationDataSource>) -> Self {
        Self { data_source }
    }

    /// Runs validation for every EXEC user-broker watching `signal.symbol`,
    /// each under its own 5s timeout, and returns the resulting intents
    /// (approved and rejected alike — rejected ones are still persisted with
    /// a reason, per §4.6).
    pub async fn run(&self, signal: &Signal, now: DateTime<Utc>) -> Result<Vec<TradeIntent>, TradingError> {
        let brokers = self.data_source.exec_brokers_for_symbol(&signal.symbol).await?;

        let tasks = brokers.into_iter().map(|broker| {
            let data_source = Arc::clone(&self.data_source);
            let signal = signal.clone();
            tokio::spawn(async move { tokio::time::timeout(FAN_OUT_TASK_TIMEOUT, validate_one(data_source, broker, signal, now)).await })
        });

        let results = futures::future::join_all(tasks).await;
        let mut intents = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(Ok(Ok(intent))) => intents.push(intent),
                Ok(Ok(Err(_))) | Ok(Err(_)) | Err(_) => {
                    crate::metrics::degrade("validation_task_failed");
                }
            }
        }

        Ok(intents)
    }
}

async fn validate_one(
    data_source: Arc<dyn ValidationDataSource>,
    broker: UserBroker,
    signal: Signal,
    now: DateTime<Utc>,
) -> Result<TradeIntent, TradingError> {
    let ctx = data_source.build_context(&broker, &signal.symbol, now).await?;
    let limit_price = signal.ref_price;
    let result = validate(&signal, limit_price, &ctx, now);

    let intent = TradeIntent {
        intent_id: Uuid::new_v4(),
        signal_id: signal.signal_id,
        user_broker_id: broker.user_broker_id,
        approved_qty: result.qty.unwrap_or(Qty::new(Decimal::ZERO)),
        limit_price,
        product_type: crate::domain::intent::ProductType::Mis,
        status: if result.approved {
            crate::domain::intent::IntentStatus::Approved
        } else {
            crate::domain::intent::IntentStatus::Rejected
        },
        reject_reason: result.reasons.first().map(|r| r.to_string()),
        created_at: now,
    };

    data_source.persist_intent(&intent).await?;
    if result.approved {
        data_source.record_cooldown(broker.user_broker_id, &signal.symbol, now).await?;
    }

    Ok(intent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{ConfluenceType, SignalStatus, Strength};
    use crate::domain::trade::TradeStatus;
    use crate::domain::{BrokerEnv, BrokerRole};
    use rust_decimal_macros::dec;

    fn profile() -> RiskProfile {
        RiskProfile {
            risk_profile_id: Uuid::new_v4(),
            name: "balanced".into(),
            min_confluence: ConfluenceType::Single,
            min_p_win: dec!(0.5),
            min_kelly: dec!(0.0),
            max_symbol_capital_pct: dec!(0.05),
            max_portfolio_exposure_pct: dec!(0.5),
            max_portfolio_log_loss: dec!(1.0),
            max_symbol_log_loss: dec!(1.0),
            max_position_log_loss: dec!(1.0),
            max_pyramid_level: 3,
            rebuy_spacing_atr: dec!(2.0),
            velocity_multiplier: dec!(100),
            cooldown_duration: chrono::Duration::minutes(5),
            max_hold_duration: chrono::Duration::hours(6),
            max_daily_loss_pct: dec!(0.05),
            max_weekly_loss_pct: dec!(0.15),
            min_trade_value: dec!(1000),
            max_trade_value: dec!(1_000_000),
            max_kelly_multiplier: dec!(1.5),
        }
    }

    fn user_broker() -> UserBroker {
        UserBroker {
            user_broker_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            broker_code: "ZERODHA".into(),
            role: BrokerRole::Exec,
            env: BrokerEnv::Sandbox,
            risk_profile_id: Uuid::new_v4(),
            credentials_ref: "ref".into(),
            enabled: true,
            watchlist: vec!["SBIN".to_string()],
            portfolio_paused: false,
        }
    }

    fn signal() -> Signal {
        Signal {
            signal_id: Uuid::new_v4(),
            symbol: "SBIN".into(),
            generated_at: Utc::now(),
            confluence_type: ConfluenceType::Triple,
            composite_score: dec!(1.0),
            strength: Strength::VeryStrong,
            effective_floor: Price::new(dec!(500.00)).unwrap(),
            effective_ceiling: Price::new(dec!(505.00)).unwrap(),
            entry_low: Price::new(dec!(500.00)).unwrap(),
            entry_high: Price::new(dec!(505.00)).unwrap(),
            ref_price: Price::new(dec!(502.00)).unwrap(),
            p_win: dec!(0.65),
            kelly: dec!(0.3),
            status: SignalStatus::Published,
            last_checked_at: Utc::now(),
        }
    }

    fn ctx() -> ValidationContext {
        ValidationContext {
            profile: profile(),
            user_broker: user_broker(),
            sizing_snapshot: SizingSnapshot {
                available_cash: dec!(500_000),
                total_capital: dec!(500_000),
                portfolio_log_loss: dec!(0.0),
                symbol_log_loss: dec!(0.0),
                atr: Some(dec!(5.0)),
            },
            current_exposure: dec!(0),
            daily_loss_pct: dec!(0.0),
            weekly_loss_pct: dec!(0.0),
            last_trade_at: None,
            open_trade: None,
        }
    }

    #[test]
    fn approves_a_clean_newbuy() {
        let now = Utc::now();
        let result = validate(&signal(), Price::new(dec!(502.00)).unwrap(), &ctx(), now);
        assert!(result.approved);
        assert_eq!(result.trade_type, TradeType::NewBuy);
        assert!(result.qty.unwrap().is_positive());
    }

    #[test]
    fn rejects_when_symbol_not_watched() {
        let mut context = ctx();
        context.user_broker.watchlist = vec!["INFY".to_string()];
        let result = validate(&signal(), Price::new(dec!(502.00)).unwrap(), &context, Utc::now());
        assert!(!result.approved);
        assert_eq!(result.reasons, vec!["SYMBOL_NOT_WATCHED"]);
    }

    #[test]
    fn rejects_when_in_cooldown() {
        let mut context = ctx();
        context.last_trade_at = Some(Utc::now() - chrono::Duration::seconds(10));
        let result = validate(&signal(), Price::new(dec!(502.00)).unwrap(), &context, Utc::now());
        assert_eq!(result.reasons, vec!["COOLDOWN_ACTIVE"]);
    }

    #[test]
    fn classifies_rebuy_when_open_trade_exists() {
        let mut context = ctx();
        let now = Utc::now();
        context.open_trade = Some(Trade {
            trade_id: Uuid::new_v4(),
            intent_id: Uuid::new_v4(),
            client_order_id: Uuid::new_v4(),
            broker_order_id: Some("B1".into()),
            user_broker_id: context.user_broker.user_broker_id,
            symbol: "SBIN".into(),
            entry_qty: dec!(10),
            entry_price: Some(Price::new(dec!(480.00)).unwrap()),
            filled_qty: dec!(10),
            avg_fill_price: Some(Price::new(dec!(480.00)).unwrap()),
            exit_price: None,
            status: TradeStatus::Open,
            trade_type: TradeType::NewBuy,
            exit_target_price: Price::new(dec!(510.00)).unwrap(),
            exit_stop_price: Price::new(dec!(490.00)).unwrap(),
            trailing_highest_price: None,
            trailing_stop_price: None,
            exit_trigger: None,
            realized_pnl: None,
            reject_reason: None,
            created_at: now,
            updated_at: now,
            last_broker_update_at: now,
            version: 1,
        });
        let result = validate(&signal(), Price::new(dec!(502.00)).unwrap(), &context, now);
        assert_eq!(result.trade_type, TradeType::Rebuy);
        assert!(result.approved);
    }
}
