//! Signal persistence and dedup (SPEC_FULL §3, P3).
//!
//! A signal insert that collides with the dedup tuple is treated as success:
//! the existing row is read back and `last_checked_at` is refreshed, per the
//! persistence error taxonomy's duplicate-key rule (§7).

use sqlx::Row;

use crate::db::Database;
use crate::domain::signal::{ConfluenceType, SignalStatus, Strength};
use crate::domain::Signal;
use crate::error::PersistenceError;
use crate::money::Price;

pub struct SignalStore {
    db: Database,
}

impl SignalStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Attempts to insert `signal`. On a dedup-tuple conflict, refreshes
    /// `last_checked_at` on the existing row and returns it with
    /// `newly_inserted = false`.
    pub async fn insert_or_touch(&self, signal: &Signal) -> Result<(Signal, bool), PersistenceError> {
        let inserted = sqlx::query(
            "INSERT INTO signals (signal_id, symbol, generated_at, confluence_type, composite_score, \
             strength, effective_floor, effective_ceiling, entry_low, entry_high, ref_price, p_win, kelly, \
             status, last_checked_at) \
             VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15) \
             ON CONFLICT (symbol, confluence_type, signal_day, effective_floor, effective_ceiling) DO NOTHING",
        )
        .bind(signal.signal_id)
        .bind(&signal.symbol)
        .bind(signal.generated_at)
        .bind(signal.confluence_type.id())
        .bind(signal.composite_score)
        .bind(strength_str(signal.strength))
        .bind(signal.effective_floor.raw())
        .bind(signal.effective_ceiling.raw())
        .bind(signal.entry_low.raw())
        .bind(signal.entry_high.raw())
        .bind(signal.ref_price.raw())
        .bind(signal.p_win)
        .bind(signal.kelly)
        .bind(status_str(signal.status))
        .bind(signal.last_checked_at)
        .execute(self.db.pool())
        .await?;

        if inserted.rows_affected() == 1 {
            return Ok((signal.clone(), true));
        }

        let row = sqlx::query(
            "UPDATE signals SET last_checked_at = $1 \
             WHERE symbol = $2 AND confluence_type = $3 AND signal_day = DATE($4) \
               AND effective_floor = $5 AND effective_ceiling = $6 \
             RETURNING signal_id, symbol, generated_at, confluence_type, composite_score, strength, \
                       effective_floor, effective_ceiling, entry_low, entry_high, ref_price, p_win, kelly, \
                       status, last_checked_at",
        )
        .bind(signal.last_checked_at)
        .bind(&signal.symbol)
        .bind(signal.confluence_type.id())
        .bind(signal.generated_at)
        .bind(signal.effective_floor.raw())
        .bind(signal.effective_ceiling.raw())
        .fetch_one(self.db.pool())
        .await?;

        Ok((row_to_signal(row), false))
    }
}

fn strength_str(s: Strength) -> &'static str {
    match s {
        Strength::Weak => "WEAK",
        Strength::Moderate => "MODERATE",
        Strength::Strong => "STRONG",
        Strength::VeryStrong => "VERY_STRONG",
    }
}

fn status_str(s: SignalStatus) -> &'static str {
    match s {
        SignalStatus::Published => "PUBLISHED",
        SignalStatus::Superseded => "SUPERSEDED",
        SignalStatus::Expired => "EXPIRED",
    }
}

fn row_to_signal(row: sqlx::postgres::PgRow) -> Signal {
    let confluence_type = ConfluenceType::from_zone_count(row.get::<i16, _>("confluence_type") as u8)
        .expect("persisted confluence_type outside 1..=3");
    let strength = match row.get::<String, _>("strength").as_str() {
        "VERY_STRONG" => Strength::VeryStrong,
        "STRONG" => Strength::Strong,
        "MODERATE" => Strength::Moderate,
        _ => Strength::Weak,
    };
    let status = match row.get::<String, _>("status").as_str() {
        "SUPERSEDED" => SignalStatus::Superseded,
        "EXPIRED" => SignalStatus::Expired,
        _ => SignalStatus::Published,
    };

    Signal {
        signal_id: row.get("signal_id"),
        symbol: row.get("symbol"),
        generated_at: row.get("generated_at"),
        confluence_type,
        composite_score: row.get("composite_score"),
        strength,
        effective_floor: Price::new(row.get("effective_floor")).expect("invariant"),
        effective_ceiling: Price::new(row.get("effective_ceiling")).expect("invariant"),
        entry_low: Price::new(row.get("entry_low")).expect("invariant"),
        entry_high: Price::new(row.get("entry_high")).expect("invariant"),
        ref_price: Price::new(row.get("ref_price")).expect("invariant"),
        p_win: row.get("p_win"),
        kelly: row.get("kelly"),
        status,
        last_checked_at: row.get("last_checked_at"),
    }
}
