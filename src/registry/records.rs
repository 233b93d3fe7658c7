use url::Url;

use super::{
    BytecodeMatcher, ClassifiedAddress, Deployment, KnownBytecode, Network, Registries, TokenInfo,
};
use crate::errors::{DistributionError, Result};
use crate::types::{parse_address, ContractKind};
use crate::vesting::VestingSchedule;

/// (name, chain id, explorer, production)
const NETWORKS: &[(&str, u64, &str, bool)] = &[
    ("mainnet", 1, "https://etherscan.io/", true),
    ("sepolia", 11155111, "https://sepolia.etherscan.io/", false),
    ("bsc", 56, "https://bscscan.com/", true),
    ("bsc-testnet", 97, "https://testnet.bscscan.com/", false),
    ("polygon", 137, "https://polygonscan.com/", true),
    ("hardhat", 31337, "http://localhost/", false),
];

/// Holders whose nature is known without touching the chain
const CLASSIFIED_ADDRESSES: &[(&str, &str, ContractKind, &str)] = &[
    // Liquidity lockers
    ("mainnet", "0x663A5C229c09b049E36dCc11a9B0d4a8Eb9db214", ContractKind::LiquidityLocker, "UNCX V2 locker"),
    ("mainnet", "0xE2fE530C047f2d85298b07D9333C05737f1435fB", ContractKind::LiquidityLocker, "Team Finance locker"),

    // Routers
    ("mainnet", "0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D", ContractKind::Exchange, "Uniswap V2 router"),
    ("bsc", "0x10ED43C718714eb63d5aA57B78B54704E256024E", ContractKind::Exchange, "PancakeSwap V2 router"),
];

/// (hex prefix, kind, label)
const BYTECODE_PREFIXES: &[(&str, ContractKind, &str)] = &[
    // EIP-1167 minimal proxy
    ("363d3d373d3d3d363d73", ContractKind::Proxy, "EIP-1167 minimal proxy"),
];

const TOKENS: &[(&str, &str, &str, u8)] = &[
    ("mainnet", "USDC", "0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", 6),
    ("mainnet", "USDT", "0xdAC17F958D2ee523a2206206994597C13D831ec7", 6),
    ("mainnet", "WETH", "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2", 18),
    ("bsc", "WBNB", "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c", 18),
    ("polygon", "WMATIC", "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270", 18),
];

/// Local deployments in hardhat's deterministic order; live networks are
/// configured through the environment.
const DEPLOYMENTS: &[(&str, &str, &str)] = &[
    ("hardhat", "token", "0x5FbDB2315678afecb367f032d93F642f64180aa3"),
    ("hardhat", "distributor", "0xe7f1725E7734CE288F8367e1Bb143E90bb3F0512"),
    ("hardhat", "vesting", "0x9fE46736679d2D9a65F0992F2272dE9f3c7fa6e0"),
];

/// (name, vesting contract index, initial unlock in millionths, cliff, vesting periods)
const VESTING_SCHEDULES: &[(&str, Option<u8>, Option<u32>, u32, u32)] = &[
    ("seed", Some(0), Some(50_000), 3, 12),
    ("private", Some(1), Some(100_000), 1, 9),
    ("strategic", Some(2), Some(75_000), 2, 10),
    ("team", Some(3), None, 12, 24),
    ("advisors", Some(4), None, 6, 12),
    ("ecosystem", Some(5), Some(20_000), 0, 36),
    ("public", None, Some(1_000_000), 0, 0),
    ("airdrop", None, Some(1_000_000), 0, 0),
];

/// Registries populated from the literal tables above
pub fn builtin() -> Result<Registries> {
    let mut registries = Registries::default();

    for &(name, chain_id, explorer, production) in NETWORKS {
        registries.insert_network(Network {
            name: name.to_string(),
            chain_id,
            explorer_url: Url::parse(explorer)
                .map_err(|e| DistributionError::InvalidArgument(format!("{explorer}: {e}")))?,
            production,
        })?;
    }

    for &(network, address, kind, label) in CLASSIFIED_ADDRESSES {
        registries.insert_classification(ClassifiedAddress {
            network: network.to_string(),
            address: parse_address(address)?,
            kind,
            label: label.to_string(),
        })?;
    }

    for &(prefix, kind, label) in BYTECODE_PREFIXES {
        let bytes = hex::decode(prefix)
            .map_err(|e| DistributionError::InvalidArgument(format!("{prefix}: {e}")))?;
        registries.insert_bytecode(KnownBytecode {
            matcher: BytecodeMatcher::Prefix(bytes),
            kind,
            label: label.to_string(),
        })?;
    }

    for &(network, symbol, address, decimals) in TOKENS {
        registries.insert_token(TokenInfo {
            network: network.to_string(),
            symbol: symbol.to_string(),
            address: parse_address(address)?,
            decimals,
        })?;
    }

    for &(network, name, address) in DEPLOYMENTS {
        registries.insert_deployment(Deployment {
            network: network.to_string(),
            name: name.to_string(),
            address: parse_address(address)?,
        })?;
    }

    for &(name, smart_contract_index, initial_unlock, cliff_periods, vesting_periods) in VESTING_SCHEDULES {
        registries.insert_vesting_schedule(VestingSchedule {
            name: name.to_string(),
            smart_contract_index,
            initial_unlock,
            cliff_periods,
            vesting_periods,
        })?;
    }

    Ok(registries)
}
