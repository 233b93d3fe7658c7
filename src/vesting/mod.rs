use chrono::{DateTime, Duration, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::amount::Amount;
use crate::errors::{DistributionError, Result};
use crate::registry::Registries;
use crate::types::{Allocation, BalanceMap};

/// Initial unlock scale: 1_000_000 is the whole allocation
pub const FULL_UNLOCK: u32 = 1_000_000;

/// Default period length between monthly releases
pub const DEFAULT_PERIOD_DAYS: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingSchedule {
    pub name: String,
    /// Vesting type index on the vesting contract, if allocations go there
    pub smart_contract_index: Option<u8>,
    /// Share released at allocation time, in millionths
    pub initial_unlock: Option<u32>,
    /// Periods after allocation before linear release starts
    pub cliff_periods: u32,
    /// Periods over which the remainder is released linearly
    pub vesting_periods: u32,
}

impl VestingSchedule {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(DistributionError::InvalidArgument(
                "vesting schedule without a name".to_string(),
            ));
        }
        if let Some(initial) = self.initial_unlock {
            if !(1..=FULL_UNLOCK).contains(&initial) {
                return Err(DistributionError::InvalidArgument(format!(
                    "vesting schedule {:?}: initial unlock {initial} outside 1..={FULL_UNLOCK}",
                    self.name
                )));
            }
        }
        Ok(())
    }

    /// Everything unlocks at allocation time
    pub fn is_immediate(&self) -> bool {
        self.initial_unlock == Some(FULL_UNLOCK)
    }

    /// Elapsed periods after which the whole allocation is unlocked
    pub fn finish_threshold(&self) -> Option<u32> {
        if self.is_immediate() {
            None
        } else {
            Some(self.cliff_periods.saturating_add(self.vesting_periods))
        }
    }

    /// Unlocked part of `total` after `elapsed_periods` whole periods.
    ///
    /// Non-decreasing in `elapsed_periods` and never above `total`.
    pub fn unlocked_amount(&self, total: Amount, elapsed_periods: u32) -> Amount {
        if self.is_immediate() {
            return total;
        }

        let initial = total.portion(u64::from(self.initial_unlock.unwrap_or(0)), u64::from(FULL_UNLOCK));
        let remainder = total.saturating_sub(initial);

        if elapsed_periods < self.cliff_periods {
            return initial;
        }

        let released = if self.vesting_periods == 0 {
            remainder
        } else {
            let vested = (elapsed_periods - self.cliff_periods).min(self.vesting_periods);
            remainder.portion(u64::from(vested), u64::from(self.vesting_periods))
        };

        // initial + released, which can never exceed `total`
        total.saturating_sub(remainder.saturating_sub(released))
    }
}

/// Time-based unlock arithmetic on top of the vesting schedule registry
#[derive(Debug, Clone)]
pub struct VestingCalculator {
    registries: Arc<Registries>,
    reference: DateTime<Utc>,
    period: Duration,
    /// elapsed-period threshold → types that become finished there
    finish_table: BTreeMap<u32, Vec<String>>,
    immediate: BTreeSet<String>,
}

impl VestingCalculator {
    pub fn new(registries: Arc<Registries>, reference: DateTime<Utc>, period: Duration) -> Result<Self> {
        if period.num_seconds() <= 0 {
            return Err(DistributionError::InvalidArgument(
                "vesting period must be positive".to_string(),
            ));
        }

        let mut finish_table: BTreeMap<u32, Vec<String>> = BTreeMap::new();
        let mut immediate = BTreeSet::new();
        for schedule in registries.vesting_schedules() {
            match schedule.finish_threshold() {
                Some(threshold) => finish_table
                    .entry(threshold)
                    .or_default()
                    .push(schedule.name.clone()),
                None => {
                    immediate.insert(schedule.name.clone());
                }
            }
        }
        debug!("Vesting finish table: {:?}", finish_table);

        Ok(Self {
            registries,
            reference,
            period,
            finish_table,
            immediate,
        })
    }

    pub fn reference(&self) -> DateTime<Utc> {
        self.reference
    }

    pub fn schedule(&self, name: &str) -> Result<&VestingSchedule> {
        self.registries.vesting_schedule(name)
    }

    /// `floor((date - reference) / period)`, negative before the reference
    pub fn elapsed_periods(&self, date: DateTime<Utc>) -> i64 {
        let elapsed = (date - self.reference).num_seconds();
        elapsed.div_euclid(self.period.num_seconds())
    }

    /// Names of every vesting type fully unlocked as of `date`
    pub fn finished_types(&self, date: DateTime<Utc>) -> BTreeSet<String> {
        let mut finished = self.immediate.clone();
        let elapsed = self.elapsed_periods(date);
        if elapsed >= 0 {
            let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
            for names in self.finish_table.range(..=elapsed).map(|(_, names)| names) {
                finished.extend(names.iter().cloned());
            }
        }
        finished
    }

    /// Unlocked part of an allocation of `vesting_type` as of `date`
    pub fn unlocked_at(&self, vesting_type: &str, total: Amount, date: DateTime<Utc>) -> Result<Amount> {
        let schedule = self.schedule(vesting_type)?;
        if schedule.is_immediate() {
            return Ok(total);
        }
        let elapsed = self.elapsed_periods(date);
        if elapsed < 0 {
            return Ok(Amount::zero());
        }
        let elapsed = u32::try_from(elapsed).unwrap_or(u32::MAX);
        Ok(schedule.unlocked_amount(total, elapsed))
    }

    /// Unlocked amount per address across all of its allocations
    pub fn unlocked_balances(&self, allocations: &[Allocation], date: DateTime<Utc>) -> Result<BalanceMap> {
        let mut unlocked = BalanceMap::new();
        for allocation in allocations {
            let amount = self.unlocked_at(&allocation.vesting_type, allocation.amount, date)?;
            let entry = unlocked.entry(allocation.address).or_default();
            *entry = entry
                .checked_add(amount)
                .ok_or(DistributionError::Overflow("unlocked balances"))?;
        }
        Ok(unlocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry;
    use chrono::TimeZone;

    fn schedule(initial: Option<u32>, cliff: u32, periods: u32) -> VestingSchedule {
        VestingSchedule {
            name: "test".to_string(),
            smart_contract_index: Some(0),
            initial_unlock: initial,
            cliff_periods: cliff,
            vesting_periods: periods,
        }
    }

    fn calculator() -> VestingCalculator {
        let registries = Arc::new(registry::builtin().unwrap());
        let reference = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        VestingCalculator::new(registries, reference, Duration::days(DEFAULT_PERIOD_DAYS)).unwrap()
    }

    #[test]
    fn test_validate_initial_unlock_range() {
        assert!(schedule(Some(0), 0, 1).validate().is_err());
        assert!(schedule(Some(FULL_UNLOCK + 1), 0, 1).validate().is_err());
        assert!(schedule(Some(1), 0, 1).validate().is_ok());
        assert!(schedule(Some(FULL_UNLOCK), 0, 0).validate().is_ok());
        assert!(schedule(None, 0, 1).validate().is_ok());
    }

    #[test]
    fn test_full_initial_unlock_releases_everything_at_once() {
        let s = schedule(Some(FULL_UNLOCK), 6, 12);
        let total = Amount::from_tokens(1_000);
        assert_eq!(s.unlocked_amount(total, 0), total);
        assert_eq!(s.unlocked_amount(total, 100), total);
    }

    #[test]
    fn test_initial_share_then_linear_release() {
        // 10% up front, 1 period cliff, 9 periods linear
        let s = schedule(Some(100_000), 1, 9);
        let total = Amount::from_tokens(1_000);

        assert_eq!(s.unlocked_amount(total, 0), Amount::from_tokens(100));
        assert_eq!(s.unlocked_amount(total, 1), Amount::from_tokens(100));
        assert_eq!(s.unlocked_amount(total, 2), Amount::from_tokens(200));
        assert_eq!(s.unlocked_amount(total, 10), total);
        assert_eq!(s.unlocked_amount(total, 50), total);
    }

    #[test]
    fn test_unlocked_amount_is_monotonic_and_capped() {
        let total = Amount::parse("12345.678901234567891").unwrap();
        for s in [
            schedule(Some(50_000), 3, 12),
            schedule(None, 12, 24),
            schedule(Some(1), 0, 7),
            schedule(Some(999_999), 2, 0),
        ] {
            let mut previous = Amount::zero();
            for elapsed in 0..60 {
                let unlocked = s.unlocked_amount(total, elapsed);
                assert!(unlocked >= previous, "{s:?} decreased at {elapsed}");
                assert!(unlocked <= total, "{s:?} exceeded total at {elapsed}");
                previous = unlocked;
            }
            assert_eq!(previous, total);
        }
    }

    #[test]
    fn test_elapsed_periods_floors() {
        let calc = calculator();
        let reference = calc.reference();
        assert_eq!(calc.elapsed_periods(reference), 0);
        assert_eq!(calc.elapsed_periods(reference + Duration::days(29)), 0);
        assert_eq!(calc.elapsed_periods(reference + Duration::days(30)), 1);
        assert_eq!(calc.elapsed_periods(reference - Duration::days(1)), -1);
    }

    #[test]
    fn test_finished_types_grow_with_time() {
        let calc = calculator();
        let reference = calc.reference();

        let before = calc.finished_types(reference - Duration::days(10));
        assert_eq!(
            before,
            ["airdrop", "public"].iter().map(|s| s.to_string()).collect()
        );

        // private: cliff 1 + 9 periods
        let at_ten = calc.finished_types(reference + Duration::days(30 * 10));
        assert!(at_ten.contains("private"));
        assert!(!at_ten.contains("seed"));

        let at_fifteen = calc.finished_types(reference + Duration::days(30 * 15));
        assert!(at_fifteen.contains("seed"));
        assert!(!at_fifteen.contains("team"));

        let late = calc.finished_types(reference + Duration::days(30 * 40));
        assert_eq!(late.len(), 8);
    }

    #[test]
    fn test_unknown_vesting_type() {
        let calc = calculator();
        let err = calc
            .unlocked_at("nonexistent", Amount::from_tokens(1), calc.reference())
            .unwrap_err();
        assert!(matches!(err, DistributionError::VestingScheduleNotFound(name) if name == "nonexistent"));
    }
}
