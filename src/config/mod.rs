use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use ethers::types::Address;
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{fmt, path::PathBuf, str::FromStr, time::Duration};

use crate::amount::Amount;
use crate::batch::{BatchOptions, DEFAULT_CHUNK_SIZE, DEFAULT_MIN_CONFIRMATIONS};
use crate::classifier::cache::DEFAULT_TTL_DAYS;
use crate::pipeline::ClaimsMode;
use crate::registry::Registries;
use crate::types::{parse_address, ContractKind};
use crate::unwrapper::UnwrapRule;

pub const MAX_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_RPC_RATE_LIMIT: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Claims,
    Allocations,
    UnlockedBalances,
}

impl FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claims" => Ok(Task::Claims),
            "allocations" => Ok(Task::Allocations),
            "unlocked" | "unlocked-balances" => Ok(Task::UnlockedBalances),
            other => Err(anyhow!("unknown task {other:?}")),
        }
    }
}

/// Inputs of the claims task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsConfig {
    pub next: Vec<PathBuf>,
    pub prev: Vec<PathBuf>,
    pub retro: Vec<PathBuf>,
    pub blacklist: Option<PathBuf>,
    pub rate: Amount,
    pub stage_index: u32,
    pub share_numerator: u64,
    pub share_denominator: u64,
    pub mode: ClaimsMode,
    /// `UNWRAP_RULES`, e.g. `liquidity-locker=0x...,staking-pool=drop`
    pub unwrap_rules: Vec<(ContractKind, UnwrapRule)>,
}

/// Inputs of the allocations and unlocked-balances tasks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationsConfig {
    pub allocations: PathBuf,
    pub vesting_start: DateTime<Utc>,
    pub as_of: DateTime<Utc>,
}

pub struct DistributionConfig {
    // Network configuration
    pub rpc_url: String,
    pub network: String,

    // Wallet configuration, only needed for live runs
    pub private_key: Option<String>,

    // Contract addresses, falling back to the deployment registry
    pub distributor_address: Option<Address>,
    pub token_address: Option<Address>,
    pub vesting_address: Option<Address>,

    // Classification cache
    pub cache_dir: PathBuf,
    pub cache_ttl_days: i64,
    pub rpc_rate_limit: u32,

    // Submission
    pub chunk_size: usize,
    pub min_confirmations: usize,
    pub resume_from: usize,
    /// Allocations only: first planned call to send
    pub resume_call: usize,
    pub dry_run: bool,

    // Task and its inputs
    pub task: Task,
    pub claims: Option<ClaimsConfig>,
    pub allocations: Option<AllocationsConfig>,
    pub expectations: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub log_level: LevelFilter,
}

impl fmt::Debug for DistributionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributionConfig")
            .field("rpc_url", &self.rpc_url)
            .field("network", &self.network)
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("distributor_address", &self.distributor_address)
            .field("token_address", &self.token_address)
            .field("vesting_address", &self.vesting_address)
            .field("cache_dir", &self.cache_dir)
            .field("cache_ttl_days", &self.cache_ttl_days)
            .field("rpc_rate_limit", &self.rpc_rate_limit)
            .field("chunk_size", &self.chunk_size)
            .field("min_confirmations", &self.min_confirmations)
            .field("resume_from", &self.resume_from)
            .field("resume_call", &self.resume_call)
            .field("dry_run", &self.dry_run)
            .field("task", &self.task)
            .field("claims", &self.claims)
            .field("allocations", &self.allocations)
            .field("expectations", &self.expectations)
            .field("output", &self.output)
            .field("log_level", &self.log_level)
            .finish()
    }
}

impl DistributionConfig {
    /// Read from the process environment. Call `dotenv` first to pick up a
    /// `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let task: Task = env.parsed("TASK")?.unwrap_or(Task::Claims);

        let claims = match task {
            Task::Claims => Some(ClaimsConfig::from_env(&env)?),
            _ => None,
        };
        let allocations = match task {
            Task::Allocations | Task::UnlockedBalances => Some(AllocationsConfig::from_env(&env)?),
            Task::Claims => None,
        };

        Ok(Self {
            rpc_url: env.required("RPC_URL")?,
            network: env.required("NETWORK")?,
            private_key: env.get("PRIVATE_KEY"),
            distributor_address: env.address("DISTRIBUTOR_ADDRESS")?,
            token_address: env.address("TOKEN_ADDRESS")?,
            vesting_address: env.address("VESTING_ADDRESS")?,
            cache_dir: env.get("CACHE_DIR").unwrap_or_else(|| ".cache".to_string()).into(),
            cache_ttl_days: env.parsed("CACHE_TTL_DAYS")?.unwrap_or(DEFAULT_TTL_DAYS),
            rpc_rate_limit: env.parsed("RPC_RATE_LIMIT")?.unwrap_or(DEFAULT_RPC_RATE_LIMIT),
            chunk_size: env.parsed("CHUNK_SIZE")?.unwrap_or(DEFAULT_CHUNK_SIZE),
            min_confirmations: env
                .parsed("MIN_CONFIRMATIONS")?
                .unwrap_or(DEFAULT_MIN_CONFIRMATIONS),
            resume_from: env.parsed("RESUME_FROM")?.unwrap_or(0),
            resume_call: env.parsed("RESUME_CALL")?.unwrap_or(0),
            dry_run: env.parsed("DRY_RUN")?.unwrap_or(true),
            task,
            claims,
            allocations,
            expectations: env.get("EXPECTATIONS").map(PathBuf::from),
            output: env.get("OUTPUT").map(PathBuf::from),
            log_level: env.parsed("LOG_LEVEL")?.unwrap_or(LevelFilter::Info),
        })
    }

    pub fn validate_all(&self, registries: &Registries) -> Result<()> {
        validate_rpc_url(&self.rpc_url)?;

        match &self.private_key {
            Some(key) => validate_private_key(key)?,
            None if !self.dry_run => bail!("PRIVATE_KEY is required when DRY_RUN=false"),
            None => {}
        }

        for (name, address) in [
            ("DISTRIBUTOR_ADDRESS", self.distributor_address),
            ("TOKEN_ADDRESS", self.token_address),
            ("VESTING_ADDRESS", self.vesting_address),
        ] {
            if address == Some(Address::zero()) {
                bail!("{name} must not be the zero address");
            }
        }

        if self.chunk_size == 0 || self.chunk_size > MAX_CHUNK_SIZE {
            bail!("CHUNK_SIZE must be between 1 and {MAX_CHUNK_SIZE}, got {}", self.chunk_size);
        }
        if self.rpc_rate_limit == 0 {
            bail!("RPC_RATE_LIMIT must be positive");
        }
        if self.cache_ttl_days < 0 {
            bail!("CACHE_TTL_DAYS must not be negative");
        }

        self.validate_network_settings(registries)?;
        self.validate_task_inputs()?;
        Ok(())
    }

    fn validate_network_settings(&self, registries: &Registries) -> Result<()> {
        let network = registries
            .network(&self.network)
            .with_context(|| format!("NETWORK {}", self.network))?;
        if network.production && self.dry_run && self.private_key.is_some() {
            log::warn!("DRY_RUN is set on {}, the private key will not be used", network.name);
        }
        Ok(())
    }

    fn validate_task_inputs(&self) -> Result<()> {
        if let Some(claims) = &self.claims {
            if claims.next.is_empty() {
                bail!("NEXT_BALANCES must name at least one file");
            }
            if claims.share_denominator == 0 || claims.share_numerator > claims.share_denominator {
                bail!(
                    "STAGE_SHARE {}/{} is not a fraction in [0, 1]",
                    claims.share_numerator,
                    claims.share_denominator
                );
            }
        }
        if self.expectations.is_none() && !self.dry_run {
            bail!("EXPECTATIONS is required when DRY_RUN=false");
        }
        Ok(())
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            chunk_size: self.chunk_size,
            min_confirmations: self.min_confirmations,
            resume_from: self.resume_from,
        }
    }
}

impl ClaimsConfig {
    fn from_env<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self> {
        let (share_numerator, share_denominator) = match env.get("STAGE_SHARE") {
            Some(share) => parse_share(&share)?,
            None => (1, 1),
        };
        Ok(Self {
            next: env.paths("NEXT_BALANCES"),
            prev: env.paths("PREV_BALANCES"),
            retro: env.paths("RETRO_BALANCES"),
            blacklist: env.get("BLACKLIST").map(PathBuf::from),
            rate: match env.get("AIRDROP_RATE") {
                Some(rate) => Amount::parse(&rate).context("AIRDROP_RATE")?,
                None => Amount::from_tokens(1),
            },
            stage_index: env.parsed("STAGE_INDEX")?.unwrap_or(0),
            share_numerator,
            share_denominator,
            mode: env.parsed("CLAIMS_MODE")?.unwrap_or(ClaimsMode::Replace),
            unwrap_rules: match env.get("UNWRAP_RULES") {
                Some(rules) => parse_unwrap_rules(&rules).context("UNWRAP_RULES")?,
                None => Vec::new(),
            },
        })
    }
}

impl AllocationsConfig {
    fn from_env<F: Fn(&str) -> Option<String>>(env: &Env<F>) -> Result<Self> {
        let vesting_start = parse_date(&env.required("VESTING_START")?).context("VESTING_START")?;
        let as_of = match env.get("AS_OF") {
            Some(date) => parse_date(&date).context("AS_OF")?,
            None => Utc::now(),
        };
        Ok(Self {
            allocations: env.required("ALLOCATIONS")?.into(),
            vesting_start,
            as_of,
        })
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn required(&self, key: &str) -> Result<String> {
        self.get(key).ok_or_else(|| anyhow!("{key} must be set"))
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|e| anyhow!("{key}={value:?}: {e}"))
            })
            .transpose()
    }

    fn address(&self, key: &str) -> Result<Option<Address>> {
        self.get(key)
            .map(|value| parse_address(&value).with_context(|| key.to_string()))
            .transpose()
    }

    fn paths(&self, key: &str) -> Vec<PathBuf> {
        self.get(key)
            .map(|value| {
                value
                    .split(',')
                    .map(str::trim)
                    .filter(|path| !path.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn validate_rpc_url(url: &str) -> Result<()> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        bail!("RPC_URL must be an http(s) endpoint, got {url:?}");
    }
    url::Url::parse(url).with_context(|| format!("RPC_URL {url:?}"))?;
    Ok(())
}

fn validate_private_key(key: &str) -> Result<()> {
    let hex_part = key.strip_prefix("0x").unwrap_or(key);
    if hex_part.len() != 64 || !hex_part.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("PRIVATE_KEY must be 32 bytes of hex");
    }
    Ok(())
}

/// `"1/4"` style share
fn parse_share(share: &str) -> Result<(u64, u64)> {
    let (numerator, denominator) = share
        .split_once('/')
        .ok_or_else(|| anyhow!("STAGE_SHARE {share:?} must look like 1/4"))?;
    Ok((
        numerator.trim().parse().context("STAGE_SHARE numerator")?,
        denominator.trim().parse().context("STAGE_SHARE denominator")?,
    ))
}

/// Comma separated `kind=target` pairs, one per contract kind
fn parse_unwrap_rules(value: &str) -> Result<Vec<(ContractKind, UnwrapRule)>> {
    let mut rules: Vec<(ContractKind, UnwrapRule)> = Vec::new();
    for pair in value.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let (kind, rule) = pair
            .split_once('=')
            .ok_or_else(|| anyhow!("{pair:?} must look like kind=0x... or kind=drop"))?;
        let kind: ContractKind = kind.parse()?;
        let rule: UnwrapRule = rule.parse()?;
        if rule == (UnwrapRule::Redirect { to: Address::zero() }) {
            bail!("{kind} redirects to the zero address");
        }
        if rules.iter().any(|(existing, _)| *existing == kind) {
            bail!("{kind} has more than one rule");
        }
        rules.push((kind, rule));
    }
    Ok(rules)
}

/// RFC 3339 timestamp or a bare `YYYY-MM-DD` taken as midnight UTC
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{value:?} is neither RFC 3339 nor YYYY-MM-DD"))?;
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow!("invalid date {value:?}"))?;
    Ok(Utc.from_utc_datetime(&midnight))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub retry_attempts: u32,
    pub backoff_base_ms: u64,
    pub classify_concurrency: usize,
}

impl RuntimeConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 5,
            backoff_base_ms: 250,
            classify_concurrency: 8,
        }
    }
}
