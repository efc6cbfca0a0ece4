//! Single-writer trade persistence (SPEC_FULL §4.8, C8).
//!
//! Every write goes through a named transition method, never a generic
//! `update`. Each method enforces [`TradeStatus::can_transition_to`] before
//! touching the row, so an illegal transition surfaces as
//! [`PersistenceError::StateMachineViolation`] instead of silently
//! overwriting state. Methods that originate from a broker callback (fill,
//! status refresh) also bump `last_broker_update_at`, which the reconciler's
//! timeout sweep reads.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::Row;
use uuid::Uuid;

use crate::db::Database;
use crate::domain::trade::ExitTrigger;
use crate::domain::{Trade, TradeStatus, TradeType};
use crate::error::PersistenceError;
use crate::money::{Price, Qty};

#[derive(Clone)]
pub struct TradeStore {
    db: Database,
}

impl TradeStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a trade row in CREATED state, keyed idempotently on
    /// `intent_id`. A conflicting insert (retry after a crash between create
    /// and place) reads back the existing row rather than erroring.
    pub async fn create(
        &self,
        intent_id: Uuid,
        client_order_id: Uuid,
        user_broker_id: Uuid,
        symbol: &str,
        entry_qty: Qty,
        exit_target_price: Price,
        exit_stop_price: Price,
        trade_type: TradeType,
        now: DateTime<Utc>,
    ) -> Result<Trade, PersistenceError> {
        let trade_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO trades (trade_id, intent_id, client_order_id, user_broker_id, symbol, entry_qty, \
             filled_qty, status, trade_type, exit_target_price, exit_stop_price, created_at, updated_at, \
             last_broker_update_at, version) \
             VALUES ($1,$2,$3,$4,$5,$6,0,$7,$8,$9,$10,$11,$11,$11,1) \
             ON CONFLICT (intent_id) DO NOTHING",
        )
        .bind(trade_id)
        .bind(intent_id)
        .bind(client_order_id)
        .bind(user_broker_id)
        .bind(symbol)
        .bind(entry_qty.raw())
        .bind(TradeStatus::Created.as_str())
        .bind(trade_type_str(trade_type))
        .bind(exit_target_price.raw())
        .bind(exit_stop_price.raw())
        .bind(now)
        .execute(self.db.pool())
        .await?;

        // Whether this call won the race or lost it to a concurrent retry,
        // the row now exists — read it back either way (SPEC_FULL P6).
        self.by_intent_id(intent_id)
            .await?
            .ok_or_else(|| PersistenceError::StateMachineViolation { trade_id, from: "none".into(), to: "CREATED".into() })
    }

    /// CREATED -> PENDING, recording the broker-accepted `broker_order_id`.
    pub async fn mark_pending(&self, trade_id: Uuid, broker_order_id: &str, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check_transition(trade_id, TradeStatus::Pending).await?;
        sqlx::query(
            "UPDATE trades SET status = $1, broker_order_id = $2, updated_at = $3, last_broker_update_at = $3, version = version + 1 \
             WHERE trade_id = $4",
        )
        .bind(TradeStatus::Pending.as_str())
        .bind(broker_order_id)
        .bind(now)
        .bind(trade_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// CREATED -> REJECTED, when the broker synchronously rejects the order.
    pub async fn mark_rejected(&self, trade_id: Uuid, reason: &str, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check_transition(trade_id, TradeStatus::Rejected).await?;
        sqlx::query(
            "UPDATE trades SET status = $1, reject_reason = $2, updated_at = $3, last_broker_update_at = $3, version = version + 1 \
             WHERE trade_id = $4",
        )
        .bind(TradeStatus::Rejected.as_str())
        .bind(reason)
        .bind(now)
        .bind(trade_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// PENDING -> FILLED, recording the fill price/qty from a broker
    /// callback or a reconciler poll.
    pub async fn mark_filled(&self, trade_id: Uuid, filled_qty: Decimal, avg_fill_price: Price, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check_transition(trade_id, TradeStatus::Filled).await?;
        sqlx::query(
            "UPDATE trades SET status = $1, filled_qty = $2, avg_fill_price = $3, entry_price = $3, \
             updated_at = $4, last_broker_update_at = $4, version = version + 1 WHERE trade_id = $5",
        )
        .bind(TradeStatus::Filled.as_str())
        .bind(filled_qty)
        .bind(avg_fill_price.raw())
        .bind(now)
        .bind(trade_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// FILLED -> OPEN, once the exit monitor has picked the position up.
    pub async fn mark_open(&self, trade_id: Uuid, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check_transition(trade_id, TradeStatus::Open).await?;
        sqlx::query("UPDATE trades SET status = $1, updated_at = $2, version = version + 1 WHERE trade_id = $3")
            .bind(TradeStatus::Open.as_str())
            .bind(now)
            .bind(trade_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// OPEN -> CLOSED, recording the exit trigger, exit price, and realized
    /// P&L.
    pub async fn mark_closed(&self, trade_id: Uuid, exit_price: Price, trigger: ExitTrigger, realized_pnl: Decimal, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        self.check_transition(trade_id, TradeStatus::Closed).await?;
        sqlx::query(
            "UPDATE trades SET status = $1, exit_price = $2, exit_trigger = $3, realized_pnl = $4, \
             updated_at = $5, last_broker_update_at = $5, version = version + 1 WHERE trade_id = $6",
        )
        .bind(TradeStatus::Closed.as_str())
        .bind(exit_price.raw())
        .bind(exit_trigger_str(trigger))
        .bind(realized_pnl)
        .bind(now)
        .bind(trade_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// PENDING -> CANCELLED / TIMEOUT, the reconciler's stale-PENDING sweep.
    pub async fn mark_terminal_unfilled(&self, trade_id: Uuid, status: TradeStatus, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        debug_assert!(matches!(status, TradeStatus::Cancelled | TradeStatus::Timeout | TradeStatus::Rejected));
        self.check_transition(trade_id, status).await?;
        sqlx::query("UPDATE trades SET status = $1, updated_at = $2, last_broker_update_at = $2, version = version + 1 WHERE trade_id = $3")
            .bind(status.as_str())
            .bind(now)
            .bind(trade_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Updates the trailing-stop high-water mark without a status change.
    /// Not a state transition, so it does not go through [`Self::transition`].
    pub async fn update_trailing_stop(&self, trade_id: Uuid, highest: Price, stop: Price, now: DateTime<Utc>) -> Result<(), PersistenceError> {
        sqlx::query(
            "UPDATE trades SET trailing_highest_price = $1, trailing_stop_price = $2, updated_at = $3, version = version + 1 WHERE trade_id = $4",
        )
        .bind(highest.raw())
        .bind(stop.raw())
        .bind(now)
        .bind(trade_id)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    pub async fn by_intent_id(&self, intent_id: Uuid) -> Result<Option<Trade>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM trades WHERE intent_id = $1").bind(intent_id).fetch_optional(self.db.pool()).await?;
        Ok(row.map(row_to_trade))
    }

    pub async fn by_id(&self, trade_id: Uuid) -> Result<Option<Trade>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM trades WHERE trade_id = $1").bind(trade_id).fetch_optional(self.db.pool()).await?;
        Ok(row.map(row_to_trade))
    }

    pub async fn open_for_symbol(&self, user_broker_id: Uuid, symbol: &str) -> Result<Option<Trade>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM trades WHERE user_broker_id = $1 AND symbol = $2 AND status = 'OPEN'")
            .bind(user_broker_id)
            .bind(symbol)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(row_to_trade))
    }

    pub async fn all_open(&self) -> Result<Vec<Trade>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'OPEN'").fetch_all(self.db.pool()).await?;
        Ok(rows.into_iter().map(row_to_trade).collect())
    }

    /// PENDING trades whose `last_broker_update_at` is older than `cutoff`,
    /// the reconciler's polling candidate set (SPEC_FULL §4.9).
    pub async fn pending_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<Trade>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM trades WHERE status = 'PENDING' AND last_broker_update_at < $1")
            .bind(cutoff)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(row_to_trade).collect())
    }

    /// Sum of filled notional across every OPEN trade for `user_broker_id`,
    /// the `currentExposure` input to the portfolio-exposure gate.
    pub async fn open_exposure(&self, user_broker_id: Uuid) -> Result<Decimal, PersistenceError> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(filled_qty * avg_fill_price), 0) AS exposure \
             FROM trades WHERE user_broker_id = $1 AND status = 'OPEN'",
        )
        .bind(user_broker_id)
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("exposure"))
    }

    /// Realized loss as a fraction of `total_capital` across every CLOSED
    /// trade for `user_broker_id` since `since`. Only losing trades count;
    /// winners never offset the daily/weekly loss-limit gates.
    pub async fn realized_loss_pct_since(&self, user_broker_id: Uuid, since: DateTime<Utc>, total_capital: Decimal) -> Result<Decimal, PersistenceError> {
        if total_capital <= Decimal::ZERO {
            return Ok(Decimal::ZERO);
        }
        let row = sqlx::query(
            "SELECT COALESCE(SUM(LEAST(realized_pnl, 0)), 0) AS losses \
             FROM trades WHERE user_broker_id = $1 AND status = 'CLOSED' AND updated_at >= $2",
        )
        .bind(user_broker_id)
        .bind(since)
        .fetch_one(self.db.pool())
        .await?;
        let losses: Decimal = row.get("losses");
        Ok((-losses / total_capital).max(Decimal::ZERO))
    }

    /// PENDING -> PLACED, recording the broker-accepted `broker_order_id`
    /// for the exit order (mirrors [`Self::mark_pending`] for entries).
    pub async fn mark_exit_placed(&self, exit_intent_id: Uuid, broker_order_id: &str) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE exit_intents SET status = 'PLACED', broker_order_id = $1 WHERE exit_intent_id = $2")
            .bind(broker_order_id)
            .bind(exit_intent_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// PENDING -> FAILED, when the broker synchronously rejects the exit
    /// order. Leaves the underlying trade OPEN so the exit monitor keeps
    /// evaluating it and can raise another exit intent.
    pub async fn mark_exit_failed(&self, exit_intent_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE exit_intents SET status = 'FAILED' WHERE exit_intent_id = $1")
            .bind(exit_intent_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// PLACED -> FILLED, once the reconciler confirms the exit order filled.
    pub async fn mark_exit_filled(&self, exit_intent_id: Uuid) -> Result<(), PersistenceError> {
        sqlx::query("UPDATE exit_intents SET status = 'FILLED' WHERE exit_intent_id = $1")
            .bind(exit_intent_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Exit intents awaiting broker confirmation, the reconciler's exit-side
    /// polling candidate set.
    pub async fn placed_exit_intents(&self) -> Result<Vec<crate::domain::ExitIntent>, PersistenceError> {
        let rows = sqlx::query("SELECT * FROM exit_intents WHERE status = 'PLACED'").fetch_all(self.db.pool()).await?;
        Ok(rows.into_iter().map(row_to_exit_intent).collect())
    }

    /// Most recent exit intent raised for `trade_id`, if any — callers check
    /// [`crate::domain::ExitIntentStatus::blocks_new_exit`] on it before
    /// raising a second one for the same trade (SPEC_FULL P8).
    pub async fn latest_exit_intent(&self, trade_id: Uuid) -> Result<Option<crate::domain::ExitIntent>, PersistenceError> {
        let row = sqlx::query("SELECT * FROM exit_intents WHERE trade_id = $1 ORDER BY triggered_at DESC LIMIT 1")
            .bind(trade_id)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.map(row_to_exit_intent))
    }

    /// Count of trades currently in `status`, the source for the
    /// `open.trades`/`pending.trades` gauges (SPEC_FULL §4.15).
    pub async fn count_by_status(&self, status: TradeStatus) -> Result<i64, PersistenceError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM trades WHERE status = $1").bind(status.as_str()).fetch_one(self.db.pool()).await?;
        Ok(row.get("n"))
    }

    /// Idempotent insert on `(trade_id, exit_reason, episode_id)` — a retry
    /// of the same exit episode reads back the existing row rather than
    /// creating a second exit intent for a trade that already has one in
    /// flight (SPEC_FULL P8).
    pub async fn create_exit_intent(
        &self,
        trade_id: Uuid,
        user_broker_id: Uuid,
        exit_reason: ExitTrigger,
        episode_id: Uuid,
        triggered_at: DateTime<Utc>,
    ) -> Result<crate::domain::ExitIntent, PersistenceError> {
        let exit_intent_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO exit_intents (exit_intent_id, trade_id, user_broker_id, exit_reason, episode_id, triggered_at, status) \
             VALUES ($1,$2,$3,$4,$5,$6,$7) \
             ON CONFLICT (trade_id, exit_reason, episode_id) DO NOTHING",
        )
        .bind(exit_intent_id)
        .bind(trade_id)
        .bind(user_broker_id)
        .bind(exit_trigger_str(exit_reason))
        .bind(episode_id)
        .bind(triggered_at)
        .bind("PENDING")
        .execute(self.db.pool())
        .await?;

        let row = sqlx::query("SELECT * FROM exit_intents WHERE trade_id = $1 AND exit_reason = $2 AND episode_id = $3")
            .bind(trade_id)
            .bind(exit_trigger_str(exit_reason))
            .bind(episode_id)
            .fetch_one(self.db.pool())
            .await?;
        Ok(row_to_exit_intent(row))
    }

    /// Loads the current row and verifies the transition is legal before any
    /// caller issues its `UPDATE` (SPEC_FULL §4.8: illegal transitions must
    /// never silently apply).
    async fn check_transition(&self, trade_id: Uuid, next: TradeStatus) -> Result<(), PersistenceError> {
        let current = self.by_id(trade_id).await?.ok_or_else(|| PersistenceError::StateMachineViolation {
            trade_id,
            from: "missing".into(),
            to: next.as_str().into(),
        })?;

        if !current.status.can_transition_to(next) {
            return Err(PersistenceError::StateMachineViolation {
                trade_id,
                from: current.status.as_str().into(),
                to: next.as_str().into(),
            });
        }
        Ok(())
    }
}

fn trade_type_str(t: TradeType) -> &'static str {
    match t {
        TradeType::NewBuy => "NEW_BUY",
        TradeType::Rebuy => "REBUY",
    }
}

fn exit_trigger_str(t: ExitTrigger) -> &'static str {
    match t {
        ExitTrigger::TargetHit => "TARGET_HIT",
        ExitTrigger::StopLoss => "STOP_LOSS",
        ExitTrigger::TrailingStop => "TRAILING_STOP",
        ExitTrigger::BrickReversal => "BRICK_REVERSAL",
        ExitTrigger::TimeExit => "TIME_EXIT",
        ExitTrigger::Manual => "MANUAL",
    }
}

fn row_to_trade(row: sqlx::postgres::PgRow) -> Trade {
    let status = TradeStatus::from_id(status_to_id(row.get::<String, _>("status").as_str())).expect("persisted status");
    let trade_type = match row.get::<String, _>("trade_type").as_str() {
        "REBUY" => TradeType::Rebuy,
        _ => TradeType::NewBuy,
    };
    let exit_trigger = row.get::<Option<String>, _>("exit_trigger").map(|s| match s.as_str() {
        "STOP_LOSS" => ExitTrigger::StopLoss,
        "TRAILING_STOP" => ExitTrigger::TrailingStop,
        "BRICK_REVERSAL" => ExitTrigger::BrickReversal,
        "TIME_EXIT" => ExitTrigger::TimeExit,
        "MANUAL" => ExitTrigger::Manual,
        _ => ExitTrigger::TargetHit,
    });

    Trade {
        trade_id: row.get("trade_id"),
        intent_id: row.get("intent_id"),
        client_order_id: row.get("client_order_id"),
        broker_order_id: row.get("broker_order_id"),
        user_broker_id: row.get("user_broker_id"),
        symbol: row.get("symbol"),
        entry_qty: row.get("entry_qty"),
        entry_price: row.get::<Option<Decimal>, _>("entry_price").and_then(Price::new),
        filled_qty: row.get("filled_qty"),
        avg_fill_price: row.get::<Option<Decimal>, _>("avg_fill_price").and_then(Price::new),
        exit_price: row.get::<Option<Decimal>, _>("exit_price").and_then(Price::new),
        status,
        trade_type,
        exit_target_price: Price::new(row.get("exit_target_price")).expect("invariant"),
        exit_stop_price: Price::new(row.get("exit_stop_price")).expect("invariant"),
        trailing_highest_price: row.get::<Option<Decimal>, _>("trailing_highest_price").and_then(Price::new),
        trailing_stop_price: row.get::<Option<Decimal>, _>("trailing_stop_price").and_then(Price::new),
        exit_trigger,
        realized_pnl: row.get("realized_pnl"),
        reject_reason: row.get("reject_reason"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_broker_update_at: row.get("last_broker_update_at"),
        version: row.get("version"),
    }
}

fn row_to_exit_intent(row: sqlx::postgres::PgRow) -> crate::domain::ExitIntent {
    crate::domain::ExitIntent {
        exit_intent_id: row.get("exit_intent_id"),
        trade_id: row.get("trade_id"),
        user_broker_id: row.get("user_broker_id"),
        exit_reason: match row.get::<String, _>("exit_reason").as_str() {
            "STOP_LOSS" => ExitTrigger::StopLoss,
            "TRAILING_STOP" => ExitTrigger::TrailingStop,
            "BRICK_REVERSAL" => ExitTrigger::BrickReversal,
            "TIME_EXIT" => ExitTrigger::TimeExit,
            "MANUAL" => ExitTrigger::Manual,
            _ => ExitTrigger::TargetHit,
        },
        episode_id: row.get("episode_id"),
        triggered_at: row.get("triggered_at"),
        status: match row.get::<String, _>("status").as_str() {
            "APPROVED" => crate::domain::ExitIntentStatus::Approved,
            "PLACED" => crate::domain::ExitIntentStatus::Placed,
            "FILLED" => crate::domain::ExitIntentStatus::Filled,
            "FAILED" => crate::domain::ExitIntentStatus::Failed,
            _ => crate::domain::ExitIntentStatus::Pending,
        },
        broker_order_id: row.get("broker_order_id"),
    }
}

fn status_to_id(s: &str) -> i16 {
    match s {
        "CREATED" => 0,
        "PENDING" => 10,
        "FILLED" => 20,
        "OPEN" => 30,
        "CLOSED" => 40,
        "REJECTED" => -10,
        "CANCELLED" => -20,
        "TIMEOUT" => -30,
        other => panic!("unknown trade status in database: {other}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trade_type_round_trips_through_its_db_string() {
        assert_eq!(trade_type_str(TradeType::NewBuy), "NEW_BUY");
        assert_eq!(trade_type_str(TradeType::Rebuy), "REBUY");
    }

    #[test]
    fn status_id_mapping_matches_trade_status() {
        for s in ["CREATED", "PENDING", "FILLED", "OPEN", "CLOSED", "REJECTED", "CANCELLED", "TIMEOUT"] {
            assert!(TradeStatus::from_id(status_to_id(s)).is_some());
        }
    }
}
