use ethers::types::{U256, U512};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};

use crate::errors::{DistributionError, Result};

/// Token decimals every amount in the pipeline is scaled by
pub const DECIMALS: usize = 18;

fn scale() -> U256 {
    U256::exp10(DECIMALS)
}

/// Non-negative token amount held as an integer number of 10^-18 units.
///
/// There is no floating point path in or out of this type: decimal strings are
/// parsed digit by digit and every division floors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(U256);

impl Amount {
    pub fn zero() -> Self {
        Self(U256::zero())
    }

    /// Raw base units (wei-like)
    pub fn from_wei(value: U256) -> Self {
        Self(value)
    }

    /// Whole tokens, mostly handy in fixtures
    pub fn from_tokens(tokens: u64) -> Self {
        Self(U256::from(tokens) * scale())
    }

    pub fn as_wei(&self) -> U256 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a decimal string and insist that formatting it back yields the
    /// same text once trailing fractional zeros are trimmed.
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(DistributionError::parse(input, "empty amount"));
        }

        let (int_part, frac_part) = trimmed.split_once('.').unwrap_or((trimmed, ""));
        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if int_part.is_empty() || !is_digits(int_part) || !is_digits(frac_part) {
            return Err(DistributionError::parse(input, "not a non-negative decimal"));
        }
        if frac_part.len() > DECIMALS {
            return Err(DistributionError::parse(input, "more than 18 fractional digits"));
        }

        let digits = format!("{int_part}{frac_part:0<width$}", width = DECIMALS);
        let value = U256::from_dec_str(&digits)
            .map_err(|_| DistributionError::parse(input, "out of range"))?;
        let amount = Self(value);

        if amount.to_string() != trim_decimal(trimmed) {
            return Err(DistributionError::parse(input, "does not round-trip"));
        }
        Ok(amount)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// `None` as soon as the running sum no longer fits in 256 bits
    pub fn checked_sum<'a, I>(amounts: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Amount>,
    {
        amounts
            .into_iter()
            .try_fold(Self::zero(), |acc, amount| acc.checked_add(*amount))
    }

    /// `None` instead of ever going negative
    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self(self.0.saturating_sub(rhs.0))
    }

    /// `floor(self * numerator / denominator)` with a 512-bit intermediate.
    /// `None` on a zero denominator or when the result does not fit.
    pub fn mul_div(self, numerator: U256, denominator: U256) -> Option<Self> {
        if denominator.is_zero() {
            return None;
        }
        let product: U512 = self.0.full_mul(numerator);
        U256::try_from(product / U512::from(denominator)).ok().map(Self)
    }

    /// `floor(self * part / whole)` for `part <= whole`; `part` is clamped to
    /// `whole` so the result never exceeds `self`. A zero `whole` yields zero.
    pub fn portion(self, part: u64, whole: u64) -> Self {
        if whole == 0 {
            return Self::zero();
        }
        let part = U256::from(part.min(whole));
        let whole = U256::from(whole);
        let (quotient, remainder) = self.0.div_mod(whole);
        Self(quotient * part + remainder * part / whole)
    }
}

/// Drop trailing fractional zeros and a dangling point; integers are untouched.
fn trim_decimal(value: &str) -> &str {
    if value.contains('.') {
        value.trim_end_matches('0').trim_end_matches('.')
    } else {
        value
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (int_part, frac_part) = self.0.div_mod(scale());
        if frac_part.is_zero() {
            return write!(f, "{int_part}");
        }
        let frac = format!("{:0>width$}", frac_part.to_string(), width = DECIMALS);
        write!(f, "{int_part}.{}", frac.trim_end_matches('0'))
    }
}

impl FromStr for Amount {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(de::Error::custom)
    }
}
