//! Per-user-broker trade decision (SPEC_FULL §3, §4.6).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::money::{Price, Qty};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntentStatus {
    PendingValidation,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductType {
    /// Intraday / margin product. This core only ever emits this variant;
    /// other product types are a downstream concern.
    Mis,
}

/// `intent_id` doubles as the broker-facing `clientOrderId` (SPEC_FULL
/// glossary: ClientOrderId).
#[derive(Debug, Clone)]
pub struct TradeIntent {
    pub intent_id: Uuid,
    pub signal_id: Uuid,
    pub user_broker_id: Uuid,
    pub approved_qty: Qty,
    pub limit_price: Price,
    pub product_type: ProductType,
    pub status: IntentStatus,
    pub reject_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
