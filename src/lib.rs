pub mod airdrop;
pub mod amount;
pub mod balances;
pub mod batch;       // Chunked on-chain submission
pub mod classifier;  // Address classification and bytecode cache
pub mod config;
pub mod errors;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod rpc;
pub mod types;
pub mod unwrapper;
pub mod utils;
pub mod verify;
pub mod vesting;

pub use amount::Amount;
pub use errors::{DistributionError, Result};
