//! Trade lifecycle state machine (SPEC_FULL §4.8).
//!
//! State IDs are stable small integers so they round-trip through Postgres
//! as SMALLINT without relying on enum-label migrations.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use uuid::Uuid;

use crate::money::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum TradeStatus {
    Created = 0,
    Pending = 10,
    Filled = 20,
    Open = 30,
    Closed = 40,
    Rejected = -10,
    Cancelled = -20,
    Timeout = -30,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TradeStatus::Closed | TradeStatus::Rejected | TradeStatus::Cancelled | TradeStatus::Timeout
        )
    }

    /// The total transition function from SPEC_FULL §4.8. Any pair not
    /// listed here is illegal and must surface `StateMachineViolation`.
    pub fn can_transition_to(&self, next: TradeStatus) -> bool {
        use TradeStatus::*;
        matches!(
            (self, next),
            (Created, Pending)
                | (Created, Rejected)
                | (Pending, Filled)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Pending, Timeout)
                | (Filled, Open)
                | (Open, Closed)
        )
    }

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        use TradeStatus::*;
        Some(match id {
            0 => Created,
            10 => Pending,
            20 => Filled,
            30 => Open,
            40 => Closed,
            -10 => Rejected,
            -20 => Cancelled,
            -30 => Timeout,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::Created => "CREATED",
            TradeStatus::Pending => "PENDING",
            TradeStatus::Filled => "FILLED",
            TradeStatus::Open => "OPEN",
            TradeStatus::Closed => "CLOSED",
            TradeStatus::Rejected => "REJECTED",
            TradeStatus::Cancelled => "CANCELLED",
            TradeStatus::Timeout => "TIMEOUT",
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeType {
    NewBuy,
    Rebuy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitTrigger {
    TargetHit,
    StopLoss,
    TrailingStop,
    BrickReversal,
    TimeExit,
    Manual,
}

/// Per-user-broker position lifecycle row (SPEC_FULL §3).
#[derive(Debug, Clone)]
pub struct Trade {
    pub trade_id: Uuid,
    pub intent_id: Uuid,
    pub client_order_id: Uuid,
    pub broker_order_id: Option<String>,
    pub user_broker_id: Uuid,
    pub symbol: String,
    pub entry_qty: Decimal,
    pub entry_price: Option<Price>,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Price>,
    pub exit_price: Option<Price>,
    pub status: TradeStatus,
    pub trade_type: TradeType,
    pub exit_target_price: Price,
    pub exit_stop_price: Price,
    pub trailing_highest_price: Option<Price>,
    pub trailing_stop_price: Option<Price>,
    pub exit_trigger: Option<ExitTrigger>,
    pub realized_pnl: Option<Decimal>,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_broker_update_at: DateTime<Utc>,
    pub version: i64,
}

impl Trade {
    /// Realized P&L for a long-only close, per SPEC_FULL E1.
    pub fn compute_realized_pnl(entry_price: Price, exit_price: Price, qty: Decimal) -> Decimal {
        (exit_price - entry_price) * qty
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_states() -> [TradeStatus; 8] {
        use TradeStatus::*;
        [Created, Pending, Filled, Open, Closed, Rejected, Cancelled, Timeout]
    }

    #[test]
    fn only_spec_transitions_are_legal() {
        let legal: &[(TradeStatus, TradeStatus)] = &[
            (TradeStatus::Created, TradeStatus::Pending),
            (TradeStatus::Created, TradeStatus::Rejected),
            (TradeStatus::Pending, TradeStatus::Filled),
            (TradeStatus::Pending, TradeStatus::Rejected),
            (TradeStatus::Pending, TradeStatus::Cancelled),
            (TradeStatus::Pending, TradeStatus::Timeout),
            (TradeStatus::Filled, TradeStatus::Open),
            (TradeStatus::Open, TradeStatus::Closed),
        ];
        for from in all_states() {
            for to in all_states() {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{from:?} -> {to:?} expected {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_states() {
        assert!(TradeStatus::Closed.is_terminal());
        assert!(TradeStatus::Rejected.is_terminal());
        assert!(TradeStatus::Cancelled.is_terminal());
        assert!(TradeStatus::Timeout.is_terminal());
        assert!(!TradeStatus::Created.is_terminal());
        assert!(!TradeStatus::Pending.is_terminal());
        assert!(!TradeStatus::Filled.is_terminal());
        assert!(!TradeStatus::Open.is_terminal());
    }

    #[test]
    fn state_id_roundtrip() {
        for s in all_states() {
            assert_eq!(TradeStatus::from_id(s.id()), Some(s));
        }
        assert_eq!(TradeStatus::from_id(999), None);
    }
}
