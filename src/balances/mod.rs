pub mod csv;

use ethers::types::Address;
use log::{info, warn};
use std::collections::{BTreeSet, HashMap};

use crate::amount::Amount;
use crate::errors::{DistributionError, Result};
use crate::types::{checksum, total, BalanceMap};

/// One labeled `(address, amount)` snapshot, duplicate-free
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceSource {
    label: String,
    balances: BalanceMap,
}

impl BalanceSource {
    /// Rejects an address appearing twice within the same source
    pub fn from_rows<I>(label: impl Into<String>, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (Address, Amount)>,
    {
        let label = label.into();
        let mut balances = BalanceMap::new();
        for (address, amount) in rows {
            if balances.insert(address, amount).is_some() {
                return Err(DistributionError::duplicate(&label, checksum(&address)));
            }
        }
        Ok(Self { label, balances })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn balances(&self) -> &BalanceMap {
        &self.balances
    }

    pub fn total(&self) -> Result<Amount> {
        total(&self.balances)
    }
}

/// Addresses whose final balance is forced to zero
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blacklist {
    label: String,
    addresses: BTreeSet<Address>,
}

impl Blacklist {
    pub fn from_addresses<I>(label: impl Into<String>, addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = Address>,
    {
        let label = label.into();
        let mut set = BTreeSet::new();
        for address in addresses {
            if !set.insert(address) {
                return Err(DistributionError::duplicate(&label, checksum(&address)));
            }
        }
        Ok(Self {
            label,
            addresses: set,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }
}

/// Value accounted for by each merge step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// `prev` value on addresses not superseded by `next`
    pub prev_retained: Amount,
    /// `retro` value on addresses not superseded by `next`
    pub retro_retained: Amount,
    pub next_total: Amount,
    /// Value removed by zeroing blacklisted addresses
    pub blacklisted_total: Amount,
}

impl MergeReport {
    /// Total the merged map must sum to
    pub fn expected_total(&self) -> Result<Amount> {
        let merged = Amount::checked_sum([&self.prev_retained, &self.retro_retained, &self.next_total])
            .ok_or(DistributionError::Overflow("merge report"))?;
        merged
            .checked_sub(self.blacklisted_total)
            .ok_or(DistributionError::Overflow("merge report"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregation {
    pub balances: BalanceMap,
    pub report: MergeReport,
}

/// Merge all sources into one balance map.
///
/// `prev` is the baseline, `retro` adds on top of it, an address present in
/// `next` takes exactly the `next` amount, and blacklisted addresses end at zero.
pub fn aggregate(
    next: &[BalanceSource],
    prev: &[BalanceSource],
    retro: &[BalanceSource],
    blacklist: &[Blacklist],
) -> Result<Aggregation> {
    let next = combine("next", next)?;
    let prev = combine("prev", prev)?;
    let retro = combine("retro", retro)?;

    let mut balances = BalanceMap::new();
    let mut report = MergeReport::default();

    for (address, amount) in prev.iter().filter(|(a, _)| !next.contains_key(*a)) {
        add_to(&mut balances, *address, *amount)?;
        accumulate(&mut report.prev_retained, *amount)?;
    }
    for (address, amount) in retro.iter().filter(|(a, _)| !next.contains_key(*a)) {
        add_to(&mut balances, *address, *amount)?;
        accumulate(&mut report.retro_retained, *amount)?;
    }
    for (address, amount) in &next {
        balances.insert(*address, *amount);
        accumulate(&mut report.next_total, *amount)?;
    }

    let blocked: BTreeSet<Address> = blacklist
        .iter()
        .flat_map(|list| list.addresses.iter().copied())
        .collect();
    for address in blocked {
        let removed = balances.insert(address, Amount::zero()).unwrap_or_default();
        accumulate(&mut report.blacklisted_total, removed)?;
    }

    info!(
        "Aggregated {} addresses: prev {} + retro {} + next {} - blacklisted {} = {}",
        balances.len(),
        report.prev_retained,
        report.retro_retained,
        report.next_total,
        report.blacklisted_total,
        total(&balances)?,
    );

    Ok(Aggregation { balances, report })
}

/// Sum the sources of one category per address. A source repeated under the
/// same label is taken once; the same label with other content is an error.
fn combine(category: &str, sources: &[BalanceSource]) -> Result<BalanceMap> {
    for (first, second) in identical_sources(sources) {
        warn!(
            "{category} sources {first:?} and {second:?} have identical contents and are both counted"
        );
    }

    let mut seen: HashMap<&str, &BalanceSource> = HashMap::new();
    let mut combined = BalanceMap::new();

    for source in sources {
        if let Some(previous) = seen.get(source.label()) {
            if *previous != source {
                return Err(DistributionError::duplicate(category, source.label()));
            }
            continue;
        }
        seen.insert(source.label(), source);

        for (address, amount) in source.balances() {
            add_to(&mut combined, *address, *amount)?;
        }
    }
    Ok(combined)
}

/// Pairs of distinct labels carrying exactly the same balances, usually one
/// file passed twice under different paths
pub fn identical_sources(sources: &[BalanceSource]) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    for (i, first) in sources.iter().enumerate() {
        for second in &sources[i + 1..] {
            if first.label() != second.label()
                && !first.balances().is_empty()
                && first.balances() == second.balances()
                && !pairs.contains(&(first.label(), second.label()))
            {
                pairs.push((first.label(), second.label()));
            }
        }
    }
    pairs
}

fn add_to(balances: &mut BalanceMap, address: Address, amount: Amount) -> Result<()> {
    accumulate(balances.entry(address).or_default(), amount)
}

fn accumulate(running: &mut Amount, amount: Amount) -> Result<()> {
    *running = running
        .checked_add(amount)
        .ok_or(DistributionError::Overflow("balance aggregation"))?;
    Ok(())
}
