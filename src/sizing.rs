//! Position sizing: the minimum of seven independent constraints (SPEC_FULL
//! §4.6, P4, E5). A pure function of its inputs — no I/O, no side effects —
//! so it is trivially unit-testable and safe to call from the validator's
//! per-user-broker fan-out task.

use rust_decimal::{Decimal, MathematicalOps};

use crate::domain::signal::Strength;
use crate::domain::{RiskProfile, Signal};
use crate::error::DataUnavailableError;
use crate::money::{Price, Qty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingConstraint {
    LogSafe,
    Kelly,
    Cash,
    SymbolCapital,
    PortfolioBudget,
    SymbolBudget,
    Velocity,
}

impl BindingConstraint {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingConstraint::LogSafe => "LOG_SAFE",
            BindingConstraint::Kelly => "KELLY",
            BindingConstraint::Cash => "CASH",
            BindingConstraint::SymbolCapital => "SYMBOL_CAPITAL",
            BindingConstraint::PortfolioBudget => "PORTFOLIO_BUDGET",
            BindingConstraint::SymbolBudget => "SYMBOL_BUDGET",
            BindingConstraint::Velocity => "VELOCITY",
        }
    }
}

/// The account/portfolio snapshot the sizer needs, captured once per
/// validation pass so all seven constraints see the same numbers.
#[derive(Debug, Clone)]
pub struct SizingSnapshot {
    pub available_cash: Decimal,
    pub total_capital: Decimal,
    pub portfolio_log_loss: Decimal,
    pub symbol_log_loss: Decimal,
    /// Average true range for the symbol, in price units. `None` when it
    /// cannot be computed (insufficient candle history) — several
    /// constraints fail safe to `Rejected` when this is missing.
    pub atr: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SizingResult {
    Approved { qty: Qty, binding: BindingConstraint },
    Rejected { reason: DataUnavailableError },
}

/// Computes all seven constraints and returns the minimum, naming the
/// binding one (SPEC_FULL §4.6, P4). `None` qty from any ATR-dependent
/// constraint short-circuits the whole sizer per the fail-safe rule: if any
/// input is unavailable, reject rather than size on partial information.
pub fn size(profile: &RiskProfile, signal: &Signal, snapshot: &SizingSnapshot, limit_price: Price) -> SizingResult {
    let Some(atr) = snapshot.atr else {
        return SizingResult::Rejected {
            reason: DataUnavailableError::MissingInput("ATR unavailable for sizing".to_string()),
        };
    };
    if limit_price.raw() <= Decimal::ZERO || atr <= Decimal::ZERO {
        return SizingResult::Rejected {
            reason: DataUnavailableError::MissingInput("non-positive limit price or ATR".to_string()),
        };
    }

    let candidates = [
        (BindingConstraint::LogSafe, log_safe_qty(profile, snapshot, atr)),
        (BindingConstraint::Kelly, kelly_qty(profile, signal, snapshot, limit_price)),
        (BindingConstraint::Cash, cash_qty(snapshot, limit_price)),
        (BindingConstraint::SymbolCapital, symbol_capital_qty(profile, snapshot, limit_price)),
        (BindingConstraint::PortfolioBudget, portfolio_budget_qty(profile, snapshot, atr)),
        (BindingConstraint::SymbolBudget, symbol_budget_qty(profile, snapshot, atr)),
        (BindingConstraint::Velocity, velocity_qty(profile, snapshot, atr, limit_price)),
    ];

    let (binding, min_qty) = candidates
        .into_iter()
        .min_by(|a, b| a.1.cmp(&b.1))
        .expect("candidates is non-empty");

    SizingResult::Approved { qty: Qty::new(min_qty.max(Decimal::ZERO)), binding }
}

fn floor_qty(raw: Decimal) -> Decimal {
    raw.max(Decimal::ZERO).floor()
}

/// C1: qty such that `-ln(1 - maxPositionLogLoss)` covers the worst-case
/// single-trade loss given an ATR-derived stop distance.
fn log_safe_qty(profile: &RiskProfile, snapshot: &SizingSnapshot, atr: Decimal) -> Decimal {
    let max_loss_fraction = Decimal::ONE - (-profile.max_position_log_loss).exp();
    let max_loss_amount = max_loss_fraction * snapshot.total_capital;
    floor_qty(max_loss_amount / atr)
}

/// C2: `floor(kellyFraction × availableCapital / limitPrice)` with
/// `kellyFraction = clamp(strength.multiplier × rawKelly, 0, maxKelly)`.
fn kelly_qty(profile: &RiskProfile, signal: &Signal, snapshot: &SizingSnapshot, limit_price: Price) -> Decimal {
    let raw_fraction = Strength::multiplier(&signal.strength) * signal.kelly;
    let clamped = raw_fraction.clamp(Decimal::ZERO, profile.max_kelly_multiplier);
    floor_qty(clamped * snapshot.total_capital / limit_price.raw())
}

/// C3: `floor(availableCash / limitPrice)`.
fn cash_qty(snapshot: &SizingSnapshot, limit_price: Price) -> Decimal {
    floor_qty(snapshot.available_cash / limit_price.raw())
}

/// C4: `floor(maxSymbolCapitalPct × totalCapital / limitPrice)`.
fn symbol_capital_qty(profile: &RiskProfile, snapshot: &SizingSnapshot, limit_price: Price) -> Decimal {
    floor_qty(profile.max_symbol_capital_pct * snapshot.total_capital / limit_price.raw())
}

/// C5: qty fitting within `maxPortfolioLogLoss` headroom given the current
/// portfolio log-loss.
fn portfolio_budget_qty(profile: &RiskProfile, snapshot: &SizingSnapshot, atr: Decimal) -> Decimal {
    let headroom = (profile.max_portfolio_log_loss - snapshot.portfolio_log_loss).max(Decimal::ZERO);
    let headroom_fraction = Decimal::ONE - (-headroom).exp();
    floor_qty(headroom_fraction * snapshot.total_capital / atr)
}

/// C6: qty fitting within `maxSymbolLogLoss` for this symbol.
fn symbol_budget_qty(profile: &RiskProfile, snapshot: &SizingSnapshot, atr: Decimal) -> Decimal {
    let headroom = (profile.max_symbol_log_loss - snapshot.symbol_log_loss).max(Decimal::ZERO);
    let headroom_fraction = Decimal::ONE - (-headroom).exp();
    floor_qty(headroom_fraction * snapshot.total_capital / atr)
}

/// C7: qty scaled by `velocityMultiplier × (ATR/price)` throttle.
fn velocity_qty(profile: &RiskProfile, snapshot: &SizingSnapshot, atr: Decimal, limit_price: Price) -> Decimal {
    let throttle_fraction = profile.velocity_multiplier * (atr / limit_price.raw());
    floor_qty(throttle_fraction * snapshot.total_capital / limit_price.raw())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::signal::{ConfluenceType, SignalStatus};
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn profile() -> RiskProfile {
        RiskProfile {
            risk_profile_id: Uuid::new_v4(),
            name: "balanced".into(),
            min_confluence: ConfluenceType::Single,
            min_p_win: dec!(0.5),
            min_kelly: dec!(0.0),
            max_symbol_capital_pct: dec!(0.02),
            max_portfolio_exposure_pct: dec!(0.5),
            max_portfolio_log_loss: dec!(1.0),
            max_symbol_log_loss: dec!(1.0),
            max_position_log_loss: dec!(1.0),
            max_pyramid_level: 3,
            rebuy_spacing_atr: dec!(1.0),
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

    /// SPEC_FULL E5: symbol-capital is the binding constraint.
    #[test]
    fn e5_sizing_binding_constraint_is_symbol_capital() {
        let snapshot = SizingSnapshot {
            available_cash: dec!(50_000),
            total_capital: dec!(500_000),
            portfolio_log_loss: dec!(0.0),
            symbol_log_loss: dec!(0.0),
            atr: Some(dec!(5.0)),
        };
        let result = size(&profile(), &signal(), &snapshot, Price::new(dec!(500.00)).unwrap());
        match result {
            SizingResult::Approved { qty, binding } => {
                assert_eq!(qty.to_i64(), 20);
                assert_eq!(binding, BindingConstraint::SymbolCapital);
            }
            SizingResult::Rejected { .. } => panic!("expected approval"),
        }
    }

    #[test]
    fn missing_atr_is_data_unavailable() {
        let snapshot = SizingSnapshot {
            available_cash: dec!(50_000),
            total_capital: dec!(500_000),
            portfolio_log_loss: dec!(0.0),
            symbol_log_loss: dec!(0.0),
            atr: None,
        };
        let result = size(&profile(), &signal(), &snapshot, Price::new(dec!(500.00)).unwrap());
        assert!(matches!(result, SizingResult::Rejected { .. }));
    }

    #[test]
    fn result_is_the_minimum_across_constraints() {
        let snapshot = SizingSnapshot {
            available_cash: dec!(1_000_000),
            total_capital: dec!(1_000_000),
            portfolio_log_loss: dec!(0.0),
            symbol_log_loss: dec!(0.0),
            atr: Some(dec!(5.0)),
        };
        let result = size(&profile(), &signal(), &snapshot, Price::new(dec!(500.00)).unwrap());
        if let SizingResult::Approved { qty, .. } = result {
            assert!(qty.to_i64() <= (1_000_000_i64 / 500));
        } else {
            panic!("expected approval");
        }
    }
}
