mod records;

pub use records::builtin;

use ethers::types::{Address, H256};
use ethers::utils::keccak256;
use std::{collections::HashMap, fmt::Debug, hash::Hash};
use url::Url;

use crate::errors::{DistributionError, Result};
use crate::types::ContractKind;
use crate::vesting::VestingSchedule;

/// Entities stored in a [`Repository`] expose the composite key they must be
/// unique by.
pub trait Keyed {
    type Key: Eq + Hash + Clone + Debug;

    fn key(&self) -> Self::Key;
}

/// Owned, insertion-ordered collection with a uniqueness-checked insert
#[derive(Debug, Clone)]
pub struct Repository<V: Keyed> {
    name: &'static str,
    entries: Vec<V>,
    index: HashMap<V::Key, usize>,
}

impl<V: Keyed> Repository<V> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn insert(&mut self, value: V) -> Result<()> {
        let key = value.key();
        if self.index.contains_key(&key) {
            return Err(DistributionError::duplicate(self.name, key));
        }
        self.index.insert(key, self.entries.len());
        self.entries.push(value);
        Ok(())
    }

    pub fn get(&self, key: &V::Key) -> Option<&V> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Network {
    pub name: String,
    pub chain_id: u64,
    /// Block explorer root, transactions live under `tx/<hash>`
    pub explorer_url: Url,
    /// Production networks never allow balances to be dropped
    pub production: bool,
}

impl Keyed for Network {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// Statically known contract holder on one network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedAddress {
    pub network: String,
    pub address: Address,
    pub kind: ContractKind,
    pub label: String,
}

impl Keyed for ClassifiedAddress {
    type Key = (String, Address);

    fn key(&self) -> Self::Key {
        (self.network.clone(), self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BytecodeMatcher {
    /// keccak-256 of the full runtime code
    Hash(H256),
    /// Fixed leading bytes, for templated code such as minimal proxies
    Prefix(Vec<u8>),
}

impl BytecodeMatcher {
    pub fn matches(&self, code: &[u8], code_hash: &H256) -> bool {
        match self {
            BytecodeMatcher::Hash(hash) => hash == code_hash,
            BytecodeMatcher::Prefix(prefix) => code.starts_with(prefix),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownBytecode {
    pub matcher: BytecodeMatcher,
    pub kind: ContractKind,
    pub label: String,
}

impl Keyed for KnownBytecode {
    type Key = BytecodeMatcher;

    fn key(&self) -> BytecodeMatcher {
        self.matcher.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenInfo {
    pub network: String,
    pub symbol: String,
    pub address: Address,
    pub decimals: u8,
}

impl Keyed for TokenInfo {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.network.clone(), self.symbol.clone())
    }
}

/// Deployed contract the pipeline talks to (distributor, vesting vault, token)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deployment {
    pub network: String,
    pub name: String,
    pub address: Address,
}

impl Keyed for Deployment {
    type Key = (String, String);

    fn key(&self) -> Self::Key {
        (self.network.clone(), self.name.clone())
    }
}

impl Keyed for VestingSchedule {
    type Key = String;

    fn key(&self) -> String {
        self.name.clone()
    }
}

/// All static lookup tables. Built once at start-up, then shared behind an
/// `Arc` and never mutated again.
#[derive(Debug, Clone)]
pub struct Registries {
    networks: Repository<Network>,
    classifications: Repository<ClassifiedAddress>,
    bytecodes: Repository<KnownBytecode>,
    vesting: Repository<VestingSchedule>,
    tokens: Repository<TokenInfo>,
    deployments: Repository<Deployment>,
}

impl Default for Registries {
    fn default() -> Self {
        Self {
            networks: Repository::new("networks"),
            classifications: Repository::new("address classifications"),
            bytecodes: Repository::new("known bytecode"),
            vesting: Repository::new("vesting schedules"),
            tokens: Repository::new("tokens"),
            deployments: Repository::new("deployments"),
        }
    }
}

impl Registries {
    pub fn insert_network(&mut self, network: Network) -> Result<()> {
        self.networks.insert(network)
    }

    pub fn insert_classification(&mut self, entry: ClassifiedAddress) -> Result<()> {
        self.networks_contains(&entry.network)?;
        self.classifications.insert(entry)
    }

    pub fn insert_bytecode(&mut self, entry: KnownBytecode) -> Result<()> {
        self.bytecodes.insert(entry)
    }

    pub fn insert_vesting_schedule(&mut self, schedule: VestingSchedule) -> Result<()> {
        schedule.validate()?;
        self.vesting.insert(schedule)
    }

    pub fn insert_token(&mut self, token: TokenInfo) -> Result<()> {
        self.networks_contains(&token.network)?;
        self.tokens.insert(token)
    }

    pub fn insert_deployment(&mut self, deployment: Deployment) -> Result<()> {
        self.networks_contains(&deployment.network)?;
        self.deployments.insert(deployment)
    }

    fn networks_contains(&self, name: &str) -> Result<()> {
        self.network(name).map(|_| ())
    }

    pub fn network(&self, name: &str) -> Result<&Network> {
        self.networks
            .get(&name.to_string())
            .ok_or_else(|| DistributionError::UnknownNetwork(name.to_string()))
    }

    pub fn networks(&self) -> impl Iterator<Item = &Network> {
        self.networks.iter()
    }

    pub fn classification(&self, network: &str, address: &Address) -> Option<&ClassifiedAddress> {
        self.classifications.get(&(network.to_string(), *address))
    }

    /// First known bytecode entry matching `code`, with the code's hash
    pub fn match_bytecode(&self, code: &[u8]) -> (H256, Option<ContractKind>) {
        let code_hash = H256::from(keccak256(code));
        let kind = self
            .bytecodes
            .iter()
            .find(|entry| entry.matcher.matches(code, &code_hash))
            .map(|entry| entry.kind);
        (code_hash, kind)
    }

    pub fn vesting_schedule(&self, name: &str) -> Result<&VestingSchedule> {
        self.vesting
            .get(&name.to_string())
            .ok_or_else(|| DistributionError::VestingScheduleNotFound(name.to_string()))
    }

    pub fn vesting_schedules(&self) -> impl Iterator<Item = &VestingSchedule> {
        self.vesting.iter()
    }

    pub fn token(&self, network: &str, symbol: &str) -> Option<&TokenInfo> {
        self.tokens.get(&(network.to_string(), symbol.to_string()))
    }

    pub fn deployment(&self, network: &str, name: &str) -> Option<&Deployment> {
        self.deployments.get(&(network.to_string(), name.to_string()))
    }
}
