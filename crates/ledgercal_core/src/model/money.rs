//! Integral money amounts.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::ops::{Add, Sub};

const MINOR_PER_MAJOR: i64 = 100;

/// Amount in minor currency units (1/100 of the major unit).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn from_major(major: i64) -> Self {
        Self(major * MINOR_PER_MAJOR)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    /// Parses `"10"`, `"10.5"` or `"10.50"`; more than two fractional
    /// digits is rejected rather than rounded.
    pub fn parse_decimal(value: &str) -> Option<Money> {
        let trimmed = value.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };
        let (whole, fraction) = match digits.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (digits, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if fraction.len() > 2
            || !whole.chars().all(|c| c.is_ascii_digit())
            || !fraction.chars().all(|c| c.is_ascii_digit())
        {
            return None;
        }

        let whole_minor = if whole.is_empty() {
            0
        } else {
            whole.parse::<i64>().ok()?.checked_mul(MINOR_PER_MAJOR)?
        };
        let fraction_minor = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().ok()? * 10,
            _ => fraction.parse::<i64>().ok()?,
        };
        let minor = whole_minor.checked_add(fraction_minor)?;
        Some(Money(if negative { -minor } else { minor }))
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

impl Display for Money {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let per = MINOR_PER_MAJOR.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / per, abs % per)
    }
}

#[cfg(test)]
mod tests {
    use super::Money;

    #[test]
    fn display_pads_minor_units() {
        assert_eq!(Money::from_minor(1005).to_string(), "10.05");
        assert_eq!(Money::from_major(3).to_string(), "3.00");
        assert_eq!(Money::from_minor(-250).to_string(), "-2.50");
    }

    #[test]
    fn parse_decimal_accepts_common_forms() {
        assert_eq!(Money::parse_decimal("10"), Some(Money::from_minor(1000)));
        assert_eq!(Money::parse_decimal("10.5"), Some(Money::from_minor(1050)));
        assert_eq!(Money::parse_decimal(" 0.07 "), Some(Money::from_minor(7)));
        assert_eq!(Money::parse_decimal("-1.25"), Some(Money::from_minor(-125)));
    }

    #[test]
    fn parse_decimal_rejects_garbage_and_sub_cent_precision() {
        assert_eq!(Money::parse_decimal(""), None);
        assert_eq!(Money::parse_decimal("."), None);
        assert_eq!(Money::parse_decimal("1.005"), None);
        assert_eq!(Money::parse_decimal("1,50"), None);
        assert_eq!(Money::parse_decimal("abc"), None);
    }
}
