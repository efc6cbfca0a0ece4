//! Candle persistence (SPEC_FULL §4.4, C4). Idempotent upsert by
//! `(symbol, timeframe_minutes, bucket_start)`; serves the windowed lookups
//! the evaluator needs and the previous-day DAILY close used as a fallback
//! LTP during a broker disconnect (§4.4, §9 item 5).

use chrono::{DateTime, Utc};
use sqlx::Row;

use crate::clock::TF_DAILY;
use crate::db::Database;
use crate::domain::candle::CandleState;
use crate::domain::Candle;
use crate::error::PersistenceError;
use crate::money::Price;

pub struct CandleStore {
    db: Database,
}

impl CandleStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub async fn upsert_closed(&self, candle: &Candle) -> Result<(), PersistenceError> {
        sqlx::query(
            "INSERT INTO candles (symbol, timeframe_minutes, bucket_start, open, high, low, close, volume) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (symbol, timeframe_minutes, bucket_start) \
             DO UPDATE SET open = excluded.open, high = excluded.high, low = excluded.low, \
                            close = excluded.close, volume = excluded.volume",
        )
        .bind(&candle.symbol)
        .bind(candle.timeframe_minutes as i32)
        .bind(candle.bucket_start)
        .bind(candle.open.raw())
        .bind(candle.high.raw())
        .bind(candle.low.raw())
        .bind(candle.close.raw())
        .bind(candle.volume)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Most recent `n` closed candles for `(symbol, timeframe_minutes)`,
    /// oldest first.
    pub async fn recent(&self, symbol: &str, timeframe_minutes: u32, n: i64) -> Result<Vec<Candle>, PersistenceError> {
        let rows = sqlx::query(
            "SELECT symbol, timeframe_minutes, bucket_start, open, high, low, close, volume \
             FROM candles WHERE symbol = $1 AND timeframe_minutes = $2 \
             ORDER BY bucket_start DESC LIMIT $3",
        )
        .bind(symbol)
        .bind(timeframe_minutes as i32)
        .bind(n)
        .fetch_all(self.db.pool())
        .await?;

        let mut candles: Vec<Candle> = rows.into_iter().map(row_to_candle).collect();
        candles.reverse();
        Ok(candles)
    }

    /// The most recent DAILY close strictly before `before` — the fallback
    /// LTP source when the data broker has been silent past the configured
    /// staleness threshold.
    pub async fn previous_daily_close(&self, symbol: &str, before: DateTime<Utc>) -> Result<Option<Price>, PersistenceError> {
        let row = sqlx::query(
            "SELECT close FROM candles WHERE symbol = $1 AND timeframe_minutes = $2 AND bucket_start < $3 \
             ORDER BY bucket_start DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(TF_DAILY as i32)
        .bind(before)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(row.map(|r| {
            let raw: rust_decimal::Decimal = r.get("close");
            Price::new(raw).expect("persisted close violates the price>0 invariant")
        }))
    }
}

fn row_to_candle(row: sqlx::postgres::PgRow) -> Candle {
    Candle {
        symbol: row.get("symbol"),
        timeframe_minutes: row.get::<i32, _>("timeframe_minutes") as u32,
        bucket_start: row.get("bucket_start"),
        open: Price::new(row.get("open")).expect("persisted open violates the price>0 invariant"),
        high: Price::new(row.get("high")).expect("persisted high violates the price>0 invariant"),
        low: Price::new(row.get("low")).expect("persisted low violates the price>0 invariant"),
        close: Price::new(row.get("close")).expect("persisted close violates the price>0 invariant"),
        volume: row.get("volume"),
        state: CandleState::Closed,
    }
}
