use ethers::types::Address;
use thiserror::Error;

use crate::amount::Amount;
use crate::types::ContractKind;

pub type Result<T, E = DistributionError> = std::result::Result<T, E>;

/// Every failure the distribution pipeline can surface.
///
/// Parse, classification and verification failures are raised before any
/// transaction is built; `ChunkFailed` is the only variant produced after
/// submission has started.
#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("invalid amount {input:?}: {reason}")]
    Parse { input: String, reason: String },

    #[error("invalid address {0:?}: expected 0x followed by 40 hex characters")]
    InvalidAddress(String),

    #[error("duplicate entry {key} in {source_label}")]
    DuplicateEntry { source_label: String, key: String },

    #[error("unknown contract at {address:?} on {network} (code hash 0x{code_hash})")]
    UnknownContract {
        network: String,
        address: Address,
        code_hash: String,
    },

    #[error("no unwrap rule for {kind} contract at {address:?}")]
    UnhandledContractType { kind: ContractKind, address: Address },

    #[error("{kind} contract at {address:?} redirects to blacklisted {to:?}")]
    BlacklistedRedirect {
        kind: ContractKind,
        address: Address,
        to: Address,
    },

    #[error("no classification resolved for {0:?}")]
    UnclassifiedAddress(Address),

    #[error("vesting schedule {0:?} not found")]
    VestingScheduleNotFound(String),

    #[error("vesting schedule {0:?} is unfinished and has no vesting contract index")]
    MissingContractIndex(String),

    #[error(transparent)]
    ExpectationMismatch(#[from] MismatchError),

    #[error("array length mismatch: {addresses} addresses vs {amounts} amounts")]
    ArrayLengthMismatch { addresses: usize, amounts: usize },

    #[error("rate limit exceeded after {attempts} attempts: {message}")]
    RateLimitExceeded { attempts: u32, message: String },

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("chunk {chunk} failed (last confirmed chunk: {last_confirmed:?}): {message}")]
    ChunkFailed {
        chunk: usize,
        last_confirmed: Option<usize>,
        message: String,
    },

    #[error("unknown network {0:?}")]
    UnknownNetwork(String),

    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Golden expectation mismatch. Carries the first offending address, or the
/// aggregate total when every address matched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MismatchError {
    #[error("balance mismatch for {address:?}: expected {expected}, computed {actual}")]
    Balance {
        address: Address,
        expected: Amount,
        actual: Amount,
    },

    #[error("total mismatch: expected {expected}, computed {actual}")]
    Total { expected: String, actual: Amount },
}

impl DistributionError {
    pub(crate) fn parse(input: &str, reason: &str) -> Self {
        Self::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn duplicate(source_label: &str, key: impl std::fmt::Debug) -> Self {
        Self::DuplicateEntry {
            source_label: source_label.to_string(),
            key: format!("{key:?}"),
        }
    }

    /// True for errors an RPC endpoint returns when it throttles us.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }
}
