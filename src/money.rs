//! Fixed 2-decimal price and quantity newtypes.
//!
//! All price columns in the data model carry a `price = round(price, 2)`
//! invariant (SPEC_FULL §3). Rather than re-validate at every call site,
//! [`Price`] and [`Qty`] round on construction so a value that exists can
//! never violate the invariant.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Mul, Sub};

/// A price, always rounded to 2 decimal places, always > 0 once constructed
/// via [`Price::new`]. `Default` and arithmetic results are not re-validated
/// for positivity — only construction from raw external input is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(Decimal);

/// A quantity (shares), always a non-negative integer count in practice but
/// stored as Decimal to share arithmetic with [`Price`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Qty(Decimal);

fn round2(d: Decimal) -> Decimal {
    d.round_dp(2)
}

impl Price {
    /// Returns `None` if `raw` is not strictly positive.
    pub fn new(raw: Decimal) -> Option<Self> {
        let rounded = round2(raw);
        if rounded > Decimal::ZERO {
            Some(Self(rounded))
        } else {
            None
        }
    }

    pub fn raw(self) -> Decimal {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self.0 > Decimal::ZERO && self.0 == round2(self.0)
    }
}

impl Qty {
    pub fn new(raw: Decimal) -> Self {
        Self(round2(raw))
    }

    pub fn floor_from_f64(value: f64) -> Self {
        Self(Decimal::from_f64_retain(value.floor()).unwrap_or(Decimal::ZERO))
    }

    pub fn raw(self) -> Decimal {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn to_i64(self) -> i64 {
        self.0.to_i64().unwrap_or(0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl fmt::Display for Qty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Mul<Qty> for Price {
    type Output = Decimal;
    fn mul(self, rhs: Qty) -> Decimal {
        self.0 * rhs.0
    }
}

impl Sub for Price {
    type Output = Decimal;
    fn sub(self, rhs: Price) -> Decimal {
        self.0 - rhs.0
    }
}

impl Add<Decimal> for Price {
    type Output = Decimal;
    fn add(self, rhs: Decimal) -> Decimal {
        self.0 + rhs
    }
}

impl Div for Qty {
    type Output = Decimal;
    fn div(self, rhs: Qty) -> Decimal {
        self.0 / rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn rejects_non_positive_price() {
        assert!(Price::new(dec!(0)).is_none());
        assert!(Price::new(dec!(-1.00)).is_none());
    }

    #[test]
    fn rounds_to_two_decimals() {
        let p = Price::new(dec!(502.0049)).unwrap();
        assert_eq!(p.raw(), dec!(502.00));
        let p2 = Price::new(dec!(502.005)).unwrap();
        assert_eq!(p2.raw(), dec!(502.01));
    }

    #[test]
    fn qty_times_price_is_notional() {
        let p = Price::new(dec!(500.00)).unwrap();
        let q = Qty::new(dec!(20));
        assert_eq!(p * q, dec!(10000.00));
    }
}
