//! Signal type and its dedup key (SPEC_FULL §3, P3).

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::money::Price;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i16)]
pub enum ConfluenceType {
    Single = 1,
    Double = 2,
    Triple = 3,
}

impl ConfluenceType {
    pub fn from_zone_count(n: u8) -> Option<Self> {
        match n {
            1 => Some(ConfluenceType::Single),
            2 => Some(ConfluenceType::Double),
            3 => Some(ConfluenceType::Triple),
            _ => None,
        }
    }

    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfluenceType::Single => "SINGLE",
            ConfluenceType::Double => "DOUBLE",
            ConfluenceType::Triple => "TRIPLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    Weak,
    Moderate,
    Strong,
    VeryStrong,
}

impl Strength {
    /// Thresholds and multipliers from SPEC_FULL §4.5 step 4.
    pub fn classify(composite_score: Decimal) -> Self {
        if composite_score >= Decimal::new(100, 2) {
            Strength::VeryStrong
        } else if composite_score >= Decimal::new(80, 2) {
            Strength::Strong
        } else if composite_score >= Decimal::new(50, 2) {
            Strength::Moderate
        } else {
            Strength::Weak
        }
    }

    pub fn multiplier(&self) -> Decimal {
        match self {
            Strength::VeryStrong => Decimal::new(120, 2),
            Strength::Strong => Decimal::new(100, 2),
            Strength::Moderate => Decimal::new(75, 2),
            Strength::Weak => Decimal::new(50, 2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalStatus {
    Published,
    Superseded,
    Expired,
}

/// GLOBAL-scope trading signal. Long-only in this core (direction is always
/// BUY); carries no user-specific or risk-profile fields.
#[derive(Debug, Clone)]
pub struct Signal {
    pub signal_id: Uuid,
    pub symbol: String,
    pub generated_at: DateTime<Utc>,
    pub confluence_type: ConfluenceType,
    pub composite_score: Decimal,
    pub strength: Strength,
    pub effective_floor: Price,
    pub effective_ceiling: Price,
    pub entry_low: Price,
    pub entry_high: Price,
    pub ref_price: Price,
    pub p_win: Decimal,
    pub kelly: Decimal,
    pub status: SignalStatus,
    pub last_checked_at: DateTime<Utc>,
}

/// The idempotency tuple from SPEC_FULL §3 / P3, with prices already rounded
/// to 2 decimals (enforced by [`crate::money::Price`]).
pub type SignalDedupKey = (String, i16, NaiveDate, Price, Price);

impl Signal {
    pub fn signal_day(&self) -> NaiveDate {
        self.generated_at.date_naive()
    }

    pub fn dedup_key(&self) -> SignalDedupKey {
        (
            self.symbol.clone(),
            self.confluence_type.id(),
            self.signal_day(),
            self.effective_floor,
            self.effective_ceiling,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn strength_thresholds() {
        assert!(matches!(Strength::classify(dec!(1.00)), Strength::VeryStrong));
        assert!(matches!(Strength::classify(dec!(0.80)), Strength::Strong));
        assert!(matches!(Strength::classify(dec!(0.50)), Strength::Moderate));
        assert!(matches!(Strength::classify(dec!(0.49)), Strength::Weak));
    }
}
