use ethers::{types::Address, utils::to_checksum};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt, str::FromStr};

use crate::amount::Amount;
use crate::errors::{DistributionError, Result};

/// Address → amount with a stable, sorted iteration order
pub type BalanceMap = BTreeMap<Address, Amount>;

/// Per-address entitlement pushed on-chain through `setClaims`/`addClaims`
pub type Claims = BTreeMap<Address, Amount>;

/// Strict `0x` + 40 hex parse. Mixed case is accepted, equality is by value.
pub fn parse_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    let hex_part = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .ok_or_else(|| DistributionError::InvalidAddress(input.to_string()))?;

    if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(DistributionError::InvalidAddress(input.to_string()));
    }
    Address::from_str(hex_part).map_err(|_| DistributionError::InvalidAddress(input.to_string()))
}

/// EIP-55 form used in logs and output files
pub fn checksum(address: &Address) -> String {
    to_checksum(address, None)
}

pub fn total(balances: &BalanceMap) -> Result<Amount> {
    Amount::checked_sum(balances.values()).ok_or(DistributionError::Overflow("balance total"))
}

/// Known smart-contract holder types
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractKind {
    LiquidityPool,
    LiquidityLocker,
    StakingPool,
    Proxy,
    Multisig,
    VestingWallet,
    Bridge,
    Exchange,
}

impl fmt::Display for ContractKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ContractKind::LiquidityPool => "liquidity-pool",
            ContractKind::LiquidityLocker => "liquidity-locker",
            ContractKind::StakingPool => "staking-pool",
            ContractKind::Proxy => "proxy",
            ContractKind::Multisig => "multisig",
            ContractKind::VestingWallet => "vesting-wallet",
            ContractKind::Bridge => "bridge",
            ContractKind::Exchange => "exchange",
        };
        f.write_str(name)
    }
}

impl FromStr for ContractKind {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "liquidity-pool" => Ok(ContractKind::LiquidityPool),
            "liquidity-locker" => Ok(ContractKind::LiquidityLocker),
            "staking-pool" => Ok(ContractKind::StakingPool),
            "proxy" => Ok(ContractKind::Proxy),
            "multisig" => Ok(ContractKind::Multisig),
            "vesting-wallet" => Ok(ContractKind::VestingWallet),
            "bridge" => Ok(ContractKind::Bridge),
            "exchange" => Ok(ContractKind::Exchange),
            other => Err(DistributionError::InvalidArgument(format!("unknown contract kind {other:?}"))),
        }
    }
}

/// Resolved nature of a holder address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    Human,
    Contract(ContractKind),
}

/// One `(address, vestingType, amount)` allocation row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub address: Address,
    pub vesting_type: String,
    pub amount: Amount,
}
