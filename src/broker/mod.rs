//! Broker port (SPEC_FULL §4.13, C13): the uniform contract this core talks
//! to, regardless of which real broker sits behind it. Real wire adapters
//! (HTTP/WebSocket parsing, OAuth) implement these same two traits and are a
//! downstream concern; this crate ships exactly one concrete pair —
//! [`simulated::SimulatedBroker`] — so it builds and is exercisable without
//! one.
//!
//! All methods MUST be idempotent on `client_order_id` per the spec's
//! idempotency contract, matching how this codebase's service adapters are
//! documented (`ServiceAdapter`): calling `place_order` twice with the same
//! `client_order_id` must return the first order, never create a second.

pub mod simulated;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::Candle;
use crate::error::BrokerError;
use crate::money::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub client_order_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub limit_price: Price,
}

#[derive(Debug, Clone)]
pub struct OrderResponse {
    pub broker_order_id: String,
    pub accepted: bool,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderState {
    Open,
    Pending,
    Complete,
    Rejected,
    Cancelled,
    TriggerPending,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub state: OrderState,
    pub filled_qty: Decimal,
    pub avg_fill_price: Option<Price>,
    pub timestamp: DateTime<Utc>,
    pub reject_reason: Option<String>,
}

/// Data-feed side of the port (SPEC_FULL §4.13).
#[async_trait]
pub trait DataBroker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn authenticate(&self) -> Result<(), BrokerError>;
    async fn connect(&self) -> Result<(), BrokerError>;
    async fn subscribe(&self, symbols: &[String]) -> Result<(), BrokerError>;
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe_minutes: u32,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Candle>, BrokerError>;
    async fn disconnect(&self) -> Result<(), BrokerError>;
}

/// Order-execution side of the port (SPEC_FULL §4.13).
#[async_trait]
pub trait OrderBroker: Send + Sync {
    fn name(&self) -> &'static str;
    async fn authenticate(&self) -> Result<(), BrokerError>;
    async fn place_order(&self, req: OrderRequest) -> Result<OrderResponse, BrokerError>;
    async fn cancel_order(&self, broker_order_id: &str) -> Result<(), BrokerError>;
    async fn modify_order(&self, broker_order_id: &str, new_limit_price: Price) -> Result<(), BrokerError>;
    async fn get_order_status(
        &self,
        broker_order_id: &str,
        client_order_id: Uuid,
    ) -> Result<OrderStatus, BrokerError>;
}
