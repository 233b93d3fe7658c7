use ethers::types::Address;
use log::{error, info};
use serde::Deserialize;
use std::{collections::BTreeMap, path::Path};

use crate::amount::Amount;
use crate::errors::{DistributionError, MismatchError, Result};
use crate::types::{checksum, parse_address, total, BalanceMap};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ExpectedTotal {
    Exact(Amount),
    Range { min: Amount, max: Amount },
}

impl ExpectedTotal {
    fn accepts(&self, actual: Amount) -> bool {
        match self {
            ExpectedTotal::Exact(expected) => *expected == actual,
            ExpectedTotal::Range { min, max } => *min <= actual && actual <= *max,
        }
    }

    fn describe(&self) -> String {
        match self {
            ExpectedTotal::Exact(expected) => expected.to_string(),
            ExpectedTotal::Range { min, max } => format!("[{min}, {max}]"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawExpectations {
    #[serde(default)]
    balances: BTreeMap<String, Amount>,
    total_amount: ExpectedTotal,
}

/// Golden, reviewed reference output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectations {
    pub balances: BalanceMap,
    pub total: ExpectedTotal,
}

impl Expectations {
    pub fn new(balances: BalanceMap, total: ExpectedTotal) -> Self {
        Self { balances, total }
    }

    /// Only the aggregate is pinned
    pub fn total_range(min: Amount, max: Amount) -> Self {
        Self::new(BalanceMap::new(), ExpectedTotal::Range { min, max })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawExpectations = serde_json::from_str(json)?;
        let mut balances = BalanceMap::new();
        for (address, amount) in raw.balances {
            let address = parse_address(&address)?;
            if balances.insert(address, amount).is_some() {
                return Err(DistributionError::duplicate("expectations", checksum(&address)));
            }
        }
        Ok(Self::new(balances, raw.total_amount))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let expectations = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(
            "Loaded {} golden balances from {}",
            expectations.balances.len(),
            path.display()
        );
        Ok(expectations)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationReport {
    pub checked_addresses: usize,
    pub total: Amount,
}

/// A payload that passed (or was derived from one that passed) verification.
///
/// Only this module can mint one, and the batcher only accepts this type, so
/// nothing unverified can be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verified<T> {
    value: T,
    report: VerificationReport,
}

impl<T> Verified<T> {
    pub fn get(&self) -> &T {
        &self.value
    }

    pub fn report(&self) -> VerificationReport {
        self.report
    }

    pub fn into_inner(self) -> T {
        self.value
    }

    /// Derive another payload from the verified value. Crate-private so a
    /// `Verified` cannot be minted around unrelated data.
    pub(crate) fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Verified<U> {
        Verified {
            value: f(&self.value),
            report: self.report,
        }
    }
}

/// Compare computed balances against golden expectations.
///
/// Addresses are checked in ascending order and the first mismatch is
/// reported; a missing computed entry counts as zero.
pub fn verify(computed: BalanceMap, expected: &Expectations) -> Result<Verified<BalanceMap>> {
    let report = check(&computed, expected)?;
    Ok(Verified {
        value: computed,
        report,
    })
}

/// Same checks, keeping an arbitrary payload whose balance view is `computed`
pub fn verify_with<T>(payload: T, computed: &BalanceMap, expected: &Expectations) -> Result<Verified<T>> {
    let report = check(computed, expected)?;
    Ok(Verified {
        value: payload,
        report,
    })
}

fn check(computed: &BalanceMap, expected: &Expectations) -> Result<VerificationReport> {
    for (address, expected_amount) in &expected.balances {
        let actual = lookup(computed, address);
        if actual != *expected_amount {
            error!(
                "Expectation mismatch for {}: expected {}, computed {}",
                checksum(address),
                expected_amount,
                actual
            );
            return Err(MismatchError::Balance {
                address: *address,
                expected: *expected_amount,
                actual,
            }
            .into());
        }
    }

    let actual_total = total(computed)?;
    if !expected.total.accepts(actual_total) {
        error!(
            "Total mismatch: expected {}, computed {}",
            expected.total.describe(),
            actual_total
        );
        return Err(MismatchError::Total {
            expected: expected.total.describe(),
            actual: actual_total,
        }
        .into());
    }

    info!(
        "Verified {} golden balances and total {}",
        expected.balances.len(),
        actual_total
    );
    Ok(VerificationReport {
        checked_addresses: expected.balances.len(),
        total: actual_total,
    })
}

fn lookup(balances: &BalanceMap, address: &Address) -> Amount {
    balances.get(address).copied().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    #[test]
    fn test_mismatch_names_the_address() {
        let computed: BalanceMap = [(addr(1), Amount::from_tokens(100))].into_iter().collect();
        let expected = Expectations::new(
            [(addr(1), Amount::from_tokens(101))].into_iter().collect(),
            ExpectedTotal::Exact(Amount::from_tokens(100)),
        );
        let err = verify(computed, &expected).unwrap_err();
        match err {
            DistributionError::ExpectationMismatch(MismatchError::Balance { address, .. }) => {
                assert_eq!(address, addr(1))
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_derived_payload_keeps_the_report() {
        let computed: BalanceMap = [(addr(1), Amount::from_tokens(7)), (addr(2), Amount::zero())]
            .into_iter()
            .collect();
        let expected = Expectations::total_range(Amount::zero(), Amount::from_tokens(7));
        let verified = verify_with(vec!["payload"], &computed, &expected).unwrap();
        let derived = verified.map(|payload| payload.len());
        assert_eq!(*derived.get(), 1);
        assert_eq!(derived.report(), verified.report());
        assert_eq!(derived.report().total, Amount::from_tokens(7));
    }

    #[test]
    fn test_total_past_u256_is_an_error() {
        let half = Amount::from_wei(ethers::types::U256::MAX / 2 + 1);
        let computed: BalanceMap = [(addr(1), half), (addr(2), half)].into_iter().collect();
        let expected = Expectations::total_range(Amount::zero(), Amount::from_wei(ethers::types::U256::MAX));
        assert!(matches!(verify(computed, &expected), Err(DistributionError::Overflow(_))));
    }

    #[test]
    fn test_missing_entry_counts_as_zero() {
        let expected = Expectations::new(
            [(addr(2), Amount::zero())].into_iter().collect(),
            ExpectedTotal::Exact(Amount::zero()),
        );
        assert!(verify(BalanceMap::new(), &expected).is_ok());
    }

    #[test]
    fn test_total_range() {
        let computed: BalanceMap = [(addr(1), Amount::from_tokens(10))].into_iter().collect();
        let inside = Expectations::total_range(Amount::from_tokens(5), Amount::from_tokens(10));
        assert_eq!(verify(computed.clone(), &inside).unwrap().report().total, Amount::from_tokens(10));

        let outside = Expectations::total_range(Amount::from_tokens(11), Amount::from_tokens(20));
        assert!(matches!(
            verify(computed, &outside),
            Err(DistributionError::ExpectationMismatch(MismatchError::Total { .. }))
        ));
    }

    #[test]
    fn test_from_json() {
        let json = r#"{
            "balances": { "0x1111111111111111111111111111111111111111": "1.5" },
            "totalAmount": { "min": "1", "max": "2" }
        }"#;
        let expectations = Expectations::from_json(json).unwrap();
        assert_eq!(expectations.balances[&addr(0x11)], Amount::parse("1.5").unwrap());
        assert!(matches!(expectations.total, ExpectedTotal::Range { .. }));

        let exact = Expectations::from_json(r#"{ "totalAmount": "42" }"#).unwrap();
        assert_eq!(exact.total, ExpectedTotal::Exact(Amount::from_tokens(42)));
    }

    #[test]
    fn test_from_json_rejects_case_duplicates() {
        let json = r#"{
            "balances": {
                "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa": "1",
                "0xAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA": "1"
            },
            "totalAmount": "2"
        }"#;
        assert!(matches!(
            Expectations::from_json(json),
            Err(DistributionError::DuplicateEntry { .. })
        ));
    }
}
