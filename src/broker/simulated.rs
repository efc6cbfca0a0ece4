//! In-memory broker double (SPEC_FULL §4.13): used by tests and by
//! non-production modes. Idempotent on `client_order_id` exactly like the
//! contract requires of a real adapter — a retried `place_order` returns the
//! first response rather than creating a second order.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use std::sync::Mutex;
use uuid::Uuid;

use super::{DataBroker, OrderBroker, OrderRequest, OrderResponse, OrderState, OrderStatus};
use crate::clock::Clock;
use crate::domain::Candle;
use crate::error::BrokerError;
use crate::money::Price;
use std::sync::Arc;

#[derive(Debug, Clone)]
struct SimulatedOrder {
    broker_order_id: String,
    status: OrderStatus,
}

/// A scripted fill a test queues up ahead of calling `get_order_status`.
#[derive(Debug, Clone)]
pub struct ScriptedFill {
    pub state: OrderState,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Price>,
}

pub struct SimulatedBroker {
    clock: Arc<dyn Clock>,
    orders: DashMap<Uuid, SimulatedOrder>,
    next_order_seq: Mutex<u64>,
    scripted_fills: DashMap<Uuid, ScriptedFill>,
}

impl SimulatedBroker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            orders: DashMap::new(),
            next_order_seq: Mutex::new(1),
            scripted_fills: DashMap::new(),
        }
    }

    /// Pre-arranges what `get_order_status` will report for a given
    /// `client_order_id` the next time it is queried.
    pub fn script_fill(&self, client_order_id: Uuid, fill: ScriptedFill) {
        self.scripted_fills.insert(client_order_id, fill);
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

#[async_trait]
impl OrderBroker for SimulatedBroker {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn authenticate(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn place_order(&self, req: OrderRequest) -> Result<OrderResponse, BrokerError> {
        if let Some(existing) = self.orders.get(&req.client_order_id) {
            return Ok(OrderResponse {
                broker_order_id: existing.broker_order_id.clone(),
                accepted: true,
                reject_reason: None,
            });
        }

        let seq = {
            let mut seq = self.next_order_seq.lock().expect("simulated broker mutex poisoned");
            let current = *seq;
            *seq += 1;
            current
        };
        let broker_order_id = format!("SIM-{seq}");

        self.orders.insert(
            req.client_order_id,
            SimulatedOrder {
                broker_order_id: broker_order_id.clone(),
                status: OrderStatus {
                    state: OrderState::Pending,
                    filled_qty: Decimal::ZERO,
                    avg_fill_price: None,
                    timestamp: self.now(),
                    reject_reason: None,
                },
            },
        );

        Ok(OrderResponse { broker_order_id, accepted: true, reject_reason: None })
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        for mut entry in self.orders.iter_mut() {
            if entry.broker_order_id == broker_order_id {
                entry.status.state = OrderState::Cancelled;
                entry.status.timestamp = self.now();
            }
        }
        Ok(())
    }

    async fn modify_order(&self, _broker_order_id: &str, _new_limit_price: Price) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn get_order_status(
        &self,
        broker_order_id: &str,
        client_order_id: Uuid,
    ) -> Result<OrderStatus, BrokerError> {
        if let Some(fill) = self.scripted_fills.get(&client_order_id) {
            return Ok(OrderStatus {
                state: fill.state,
                filled_qty: fill.filled_qty,
                avg_fill_price: fill.avg_fill_price,
                timestamp: self.now(),
                reject_reason: None,
            });
        }
        self.orders
            .get(&client_order_id)
            .map(|o| o.status.clone())
            .ok_or_else(|| BrokerError::Permanent(format!("unknown order {broker_order_id}")))
    }
}

#[async_trait]
impl DataBroker for SimulatedBroker {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn authenticate(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn connect(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn subscribe(&self, _symbols: &[String]) -> Result<(), BrokerError> {
        Ok(())
    }

    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _timeframe_minutes: u32,
        _from: DateTime<Utc>,
        _to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, BrokerError> {
        Ok(Vec::new())
    }

    async fn disconnect(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn broker() -> SimulatedBroker {
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 8, 1, 9, 30, 0).unwrap()));
        SimulatedBroker::new(clock)
    }

    #[tokio::test]
    async fn repeated_place_order_is_idempotent() {
        let broker = broker();
        let client_order_id = Uuid::new_v4();
        let req = OrderRequest {
            client_order_id,
            symbol: "SBIN".into(),
            side: super::super::OrderSide::Buy,
            qty: dec!(100),
            limit_price: Price::new(dec!(502.00)).unwrap(),
        };

        let first = broker.place_order(req.clone()).await.unwrap();
        let second = broker.place_order(req).await.unwrap();
        assert_eq!(first.broker_order_id, second.broker_order_id);
    }
}
