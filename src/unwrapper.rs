use ethers::types::Address;
use log::{info, warn};
use std::{
    collections::{BTreeSet, HashMap},
    str::FromStr,
};

use crate::amount::Amount;
use crate::balances::Blacklist;
use crate::errors::{DistributionError, Result};
use crate::registry::Network;
use crate::types::{checksum, parse_address, total, BalanceMap, Classification, ContractKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnwrapRule {
    /// Move the balance to the contract's owner/deployer
    Redirect { to: Address },
    /// Drop the balance. Refused on production networks.
    Drop,
}

/// `drop` or the `0x` address balances are redirected to
impl FromStr for UnwrapRule {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "drop" => Ok(UnwrapRule::Drop),
            target => Ok(UnwrapRule::Redirect {
                to: parse_address(target)?,
            }),
        }
    }
}

/// Per contract kind rules for balances held by contracts
#[derive(Debug, Clone, Default)]
pub struct UnwrapPolicy {
    rules: HashMap<ContractKind, UnwrapRule>,
    production: bool,
    /// Addresses a redirect must never credit
    blocked: BTreeSet<Address>,
}

impl UnwrapPolicy {
    pub fn for_network(network: &Network) -> Self {
        Self {
            rules: HashMap::new(),
            production: network.production,
            blocked: BTreeSet::new(),
        }
    }

    pub fn with_rule(mut self, kind: ContractKind, rule: UnwrapRule) -> Self {
        self.rules.insert(kind, rule);
        self
    }

    pub fn with_rules<I>(self, rules: I) -> Self
    where
        I: IntoIterator<Item = (ContractKind, UnwrapRule)>,
    {
        rules
            .into_iter()
            .fold(self, |policy, (kind, rule)| policy.with_rule(kind, rule))
    }

    pub fn with_blacklist(mut self, lists: &[Blacklist]) -> Self {
        self.blocked
            .extend(lists.iter().flat_map(|list| list.addresses().copied()));
        self
    }

    pub fn rule(&self, kind: ContractKind) -> Option<UnwrapRule> {
        self.rules.get(&kind).copied()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unwrapped {
    pub balances: BalanceMap,
    /// Contract address → amount dropped
    pub dropped: BalanceMap,
    /// Contract address → amount moved to its redirect target
    pub redirected: BalanceMap,
}

/// Rewrite balances held by contracts. `sum(balances) + sum(dropped)` always
/// equals the input total.
pub fn unwrap(
    balances: &BalanceMap,
    classifications: &HashMap<Address, Classification>,
    policy: &UnwrapPolicy,
) -> Result<Unwrapped> {
    let mut out = BalanceMap::new();
    let mut dropped = BalanceMap::new();
    let mut redirected = BalanceMap::new();

    for (&address, &amount) in balances {
        if amount.is_zero() {
            out.entry(address).or_insert_with(Amount::zero);
            continue;
        }

        let classification = classifications
            .get(&address)
            .ok_or(DistributionError::UnclassifiedAddress(address))?;

        match classification {
            Classification::Human => credit(&mut out, address, amount)?,
            Classification::Contract(kind) => match policy.rule(*kind) {
                Some(UnwrapRule::Redirect { to }) if policy.blocked.contains(&to) => {
                    return Err(DistributionError::BlacklistedRedirect {
                        kind: *kind,
                        address,
                        to,
                    })
                }
                Some(UnwrapRule::Redirect { to }) => {
                    info!(
                        "Redirecting {} from {} {} to {}",
                        amount,
                        kind,
                        checksum(&address),
                        checksum(&to)
                    );
                    credit(&mut out, to, amount)?;
                    redirected.insert(address, amount);
                }
                Some(UnwrapRule::Drop) if !policy.production => {
                    dropped.insert(address, amount);
                }
                _ => {
                    return Err(DistributionError::UnhandledContractType {
                        kind: *kind,
                        address,
                    })
                }
            },
        }
    }

    if !dropped.is_empty() {
        warn!(
            "Dropped {} held by {} contracts (non-production run)",
            total(&dropped)?,
            dropped.len()
        );
    }

    Ok(Unwrapped {
        balances: out,
        dropped,
        redirected,
    })
}

fn credit(balances: &mut BalanceMap, address: Address, amount: Amount) -> Result<()> {
    let entry = balances.entry(address).or_default();
    *entry = entry
        .checked_add(amount)
        .ok_or(DistributionError::Overflow("contract unwrapping"))?;
    Ok(())
}
