//! Exit intent (SPEC_FULL §3, §4.10). Unique by `(trade_id, exit_reason,
//! episode_id)`; the episode id identifies a 30s cooldown-bounded exit
//! attempt window so a flapping price cannot spam the same exit reason.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub use crate::domain::trade::ExitTrigger as ExitReason;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitIntentStatus {
    Pending,
    Approved,
    Placed,
    Filled,
    Failed,
}

impl ExitIntentStatus {
    /// True while this exit intent still occupies the single exit-per-trade
    /// slot (SPEC_FULL P8: at most one of these per trade at any moment).
    pub fn blocks_new_exit(&self) -> bool {
        matches!(
            self,
            ExitIntentStatus::Pending | ExitIntentStatus::Approved | ExitIntentStatus::Placed
        )
    }
}

#[derive(Debug, Clone)]
pub struct ExitIntent {
    pub exit_intent_id: Uuid,
    pub trade_id: Uuid,
    pub user_broker_id: Uuid,
    pub exit_reason: ExitReason,
    pub episode_id: Uuid,
    pub triggered_at: DateTime<Utc>,
    pub status: ExitIntentStatus,
    pub broker_order_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_in_flight_statuses_block_a_new_exit() {
        assert!(ExitIntentStatus::Pending.blocks_new_exit());
        assert!(ExitIntentStatus::Approved.blocks_new_exit());
        assert!(ExitIntentStatus::Placed.blocks_new_exit());
        assert!(!ExitIntentStatus::Filled.blocks_new_exit());
        assert!(!ExitIntentStatus::Failed.blocks_new_exit());
    }
}
