//! CREATE-then-place order flow and exit-intent translation (SPEC_FULL
//! §4.7, C7).
//!
//! `client_order_id` is the `intent_id` for entries and the `exit_intent_id`
//! for exits (GLOSSARY: ClientOrderId) — the broker port's idempotency
//! contract then makes retrying either flow after a crash safe without a
//! separate de-dup table.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;

use crate::broker::{OrderBroker, OrderRequest, OrderSide};
use crate::domain::{ExitIntent, Trade, TradeIntent, TradeStatus};
use crate::error::TradingError;
use crate::money::{Price, Qty};
use crate::trade_store::TradeStore;

/// Initial exit geometry for a new position, computed once at entry time and
/// frozen on the trade row. ATR-scaled rather than a fixed percentage so the
/// target/stop distance tracks the symbol's current volatility.
#[derive(Debug, Clone, Copy)]
pub struct ExitGeometry {
    pub target_price: Price,
    pub stop_price: Price,
}

impl ExitGeometry {
    pub fn from_atr(limit_price: Price, atr: Decimal, payoff_ratio: Decimal) -> Self {
        let stop_distance = atr.max(Decimal::ZERO);
        let target_distance = stop_distance * payoff_ratio;
        let target_price = Price::new(limit_price.raw() + target_distance).unwrap_or(limit_price);
        let stop_price = Price::new((limit_price.raw() - stop_distance).max(Decimal::new(1, 2))).unwrap_or(limit_price);
        Self { target_price, stop_price }
    }
}

pub struct Executor {
    trades: TradeStore,
    brokers: std::collections::HashMap<String, Arc<dyn OrderBroker>>,
}

impl Executor {
    pub fn new(trades: TradeStore, brokers: std::collections::HashMap<String, Arc<dyn OrderBroker>>) -> Self {
        Self { trades, brokers }
    }

    /// Places an entry order for an APPROVED intent: creates the CREATED
    /// trade row, calls the broker, and moves the row to PENDING or
    /// REJECTED based on the broker's synchronous response. Never blocks on
    /// a fill — that is the reconciler's and the broker callback's job.
    pub async fn place_entry(
        &self,
        intent: &TradeIntent,
        symbol: &str,
        broker_code: &str,
        exit_geometry: ExitGeometry,
        trade_type: crate::domain::TradeType,
        now: DateTime<Utc>,
    ) -> Result<Trade, TradingError> {
        let trade = self
            .trades
            .create(
                intent.intent_id,
                intent.intent_id,
                intent.user_broker_id,
                symbol,
                intent.approved_qty,
                exit_geometry.target_price,
                exit_geometry.stop_price,
                trade_type,
                now,
            )
            .await?;

        if trade.status != TradeStatus::Created {
            // Already progressed past CREATED on a prior attempt; nothing
            // left for this call to do.
            return Ok(trade);
        }

        let broker = self.broker_for(broker_code)?;
        let started = std::time::Instant::now();
        let response = broker
            .place_order(OrderRequest {
                client_order_id: intent.intent_id,
                symbol: symbol.to_string(),
                side: OrderSide::Buy,
                qty: intent.approved_qty.raw(),
                limit_price: intent.limit_price,
            })
            .await?;
        crate::metrics::order_placement_latency(started.elapsed());

        if response.accepted {
            self.trades.mark_pending(trade.trade_id, &response.broker_order_id, now).await?;
            crate::metrics::orders_placed(broker_code);
        } else {
            let reason = response.reject_reason.unwrap_or_else(|| "broker rejected".to_string());
            self.trades.mark_rejected(trade.trade_id, &reason, now).await?;
            crate::metrics::orders_rejected("broker_reject");
        }

        self.trades
            .by_id(trade.trade_id)
            .await?
            .ok_or_else(|| crate::error::PersistenceError::StateMachineViolation {
                trade_id: trade.trade_id,
                from: "CREATED".into(),
                to: "unknown".into(),
            })
            .map_err(TradingError::from)
    }

    /// Translates an approved [`ExitIntent`] into a reverse (SELL) order and
    /// persists the broker's synchronous response, mirroring
    /// [`Self::place_entry`]'s submit-then-record flow. Never marks the
    /// trade CLOSED itself — that happens only once the reconciler confirms
    /// the fill (SPEC_FULL §4.9, §4.10).
    pub async fn place_exit(&self, exit_intent: &ExitIntent, trade: &Trade, broker_code: &str, qty: Qty) -> Result<(), TradingError> {
        let broker = self.broker_for(broker_code)?;
        let limit_price = trade.avg_fill_price.unwrap_or(trade.exit_stop_price);

        let started = std::time::Instant::now();
        let response = broker
            .place_order(OrderRequest {
                client_order_id: exit_intent.exit_intent_id,
                symbol: trade.symbol.clone(),
                side: OrderSide::Sell,
                qty: qty.raw(),
                limit_price,
            })
            .await?;
        crate::metrics::order_placement_latency(started.elapsed());

        if response.accepted {
            self.trades.mark_exit_placed(exit_intent.exit_intent_id, &response.broker_order_id).await?;
            crate::metrics::orders_placed(broker_code);
        } else {
            self.trades.mark_exit_failed(exit_intent.exit_intent_id).await?;
            crate::metrics::orders_rejected("broker_reject");
        }
        Ok(())
    }

    fn broker_for(&self, broker_code: &str) -> Result<Arc<dyn OrderBroker>, TradingError> {
        self.brokers
            .get(broker_code)
            .cloned()
            .ok_or_else(|| TradingError::Broker(crate::error::BrokerError::Permanent(format!("no order broker registered for {broker_code}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn exit_geometry_scales_with_atr() {
        let geometry = ExitGeometry::from_atr(Price::new(dec!(500.00)).unwrap(), dec!(5.00), dec!(1.5));
        assert_eq!(geometry.stop_price.raw(), dec!(495.00));
        assert_eq!(geometry.target_price.raw(), dec!(507.50));
    }

    #[test]
    fn exit_geometry_never_quotes_a_non_positive_stop() {
        let geometry = ExitGeometry::from_atr(Price::new(dec!(1.00)).unwrap(), dec!(5.00), dec!(1.5));
        assert!(geometry.stop_price.raw() > Decimal::ZERO);
    }
}
