// Money and tax arithmetic
//
// All amounts are integer cents. Tax rates are basis points so that
// 8.5% is stored exactly as 850.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Neg, Sub};

use crate::error::ValidationError;

const BPS_SCALE: i128 = 10_000;

/// An amount of money in cents. Negative values are discounts or credits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Convert a dollar amount (as delivered by untrusted JSON) into cents.
    /// Returns `None` for NaN, infinities and values outside the cent range.
    pub fn from_dollars(dollars: f64) -> Option<Self> {
        if !dollars.is_finite() {
            return None;
        }
        let cents = (dollars * 100.0).round();
        if cents.abs() >= i64::MAX as f64 {
            return None;
        }
        Some(Money(cents as i64))
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_mul_qty(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, |acc, m| acc + m)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

/// Tax rate in basis points (1/100 of a percent).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaxRate(u32);

impl TaxRate {
    pub const ZERO: TaxRate = TaxRate(0);

    pub const fn from_bps(bps: u32) -> Self {
        TaxRate(bps)
    }

    pub const fn bps(self) -> u32 {
        self.0
    }

    /// Parse a percentage such as `8.5`. Rejects negative and non-finite input.
    pub fn from_percent(percent: f64) -> Option<Self> {
        if !percent.is_finite() || percent < 0.0 || percent > 100.0 {
            return None;
        }
        Some(TaxRate((percent * 100.0).round() as u32))
    }

    /// Tax owed on `base`, rounded half away from zero to the cent.
    /// `None` when the result does not fit in the cent range.
    pub fn tax_on(self, base: Money) -> Option<Money> {
        let raw = i128::from(base.cents()) * i128::from(self.0);
        let half = BPS_SCALE / 2;
        let rounded = if raw >= 0 {
            (raw + half) / BPS_SCALE
        } else {
            -((-raw + half) / BPS_SCALE)
        };
        i64::try_from(rounded).ok().map(Money)
    }
}

impl fmt::Display for TaxRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// The derived money fields of a work item.
///
/// `total` only ever comes out of [`Totals::compute`], so it cannot drift
/// from its inputs. Amounts whose total leaves the `i64` cent range are
/// rejected with [`ValidationError::AmountOverflow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub subtotal: Money,
    pub discount_amount: Money,
    pub tax_rate: TaxRate,
    pub tax_amount: Money,
    pub total: Money,
}

impl Totals {
    pub fn compute(
        subtotal: Money,
        discount_amount: Money,
        tax_rate: TaxRate,
    ) -> Result<Self, ValidationError> {
        let taxable = subtotal
            .checked_sub(discount_amount)
            .ok_or(ValidationError::AmountOverflow)?;
        let tax_amount = tax_rate
            .tax_on(taxable)
            .ok_or(ValidationError::AmountOverflow)?;
        let total = taxable
            .checked_add(tax_amount)
            .ok_or(ValidationError::AmountOverflow)?;
        Ok(Self {
            subtotal,
            discount_amount,
            tax_rate,
            tax_amount,
            total,
        })
    }

    /// Subtotal less discount, the amount tax applies to.
    pub fn pre_tax(&self) -> Money {
        self.total - self.tax_amount
    }
}
