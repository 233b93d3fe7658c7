use async_trait::async_trait;
use ethers::{
    abi::Detokenize,
    contract::{abigen, ContractCall},
    middleware::SignerMiddleware,
    providers::{Http, Provider},
    signers::LocalWallet,
    types::{Address, TransactionReceipt, U256, U64},
};
use log::debug;
use std::sync::Arc;

use super::{BatchCall, BatchSender, SingleCall};
use crate::errors::{DistributionError, Result};
use crate::rpc::classify_rpc_error;

pub type SignerClient = SignerMiddleware<Provider<Http>, LocalWallet>;

// Generate type-safe contract bindings
abigen!(
    ClaimDistributor,
    r#"[
        function setClaims(address[] recipients, uint256[] amounts) external
        function addClaims(address[] recipients, uint256[] amounts) external
        function clearClaims() external
        function claim() external
    ]"#,
);

abigen!(
    MultiTransferToken,
    r#"[
        function transferMany(address[] recipients, uint256[] amounts) external
    ]"#,
);

abigen!(
    VestingVault,
    r#"[
        function addAllocations(address[] recipients, uint256[] amounts, uint8 vestingIndex) external
    ]"#,
);

/// On-chain targets for each call family. A call whose contract is not
/// configured fails before anything is signed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContractAddresses {
    pub distributor: Option<Address>,
    pub token: Option<Address>,
    pub vesting: Option<Address>,
}

pub struct EthersBatchSender {
    distributor: Option<ClaimDistributor<SignerClient>>,
    token: Option<MultiTransferToken<SignerClient>>,
    vesting: Option<VestingVault<SignerClient>>,
}

impl EthersBatchSender {
    pub fn new(client: Arc<SignerClient>, addresses: ContractAddresses) -> Self {
        Self {
            distributor: addresses
                .distributor
                .map(|address| ClaimDistributor::new(address, client.clone())),
            token: addresses
                .token
                .map(|address| MultiTransferToken::new(address, client.clone())),
            vesting: addresses
                .vesting
                .map(|address| VestingVault::new(address, client.clone())),
        }
    }

    fn distributor(&self) -> Result<&ClaimDistributor<SignerClient>> {
        self.distributor
            .as_ref()
            .ok_or_else(|| missing("distributor"))
    }

    fn token(&self) -> Result<&MultiTransferToken<SignerClient>> {
        self.token.as_ref().ok_or_else(|| missing("token"))
    }

    fn vesting(&self) -> Result<&VestingVault<SignerClient>> {
        self.vesting.as_ref().ok_or_else(|| missing("vesting"))
    }
}

fn missing(contract: &str) -> DistributionError {
    DistributionError::InvalidArgument(format!("no {contract} contract configured"))
}

/// Send and wait for `confirmations` blocks; a dropped or reverted
/// transaction is an error.
async fn confirm<D: Detokenize>(
    call: ContractCall<SignerClient, D>,
    confirmations: usize,
) -> Result<TransactionReceipt> {
    let pending = call
        .send()
        .await
        .map_err(|e| classify_rpc_error(e.to_string()))?;
    debug!("Sent {:?}, awaiting {} confirmations", *pending, confirmations);

    let receipt = pending
        .confirmations(confirmations)
        .await
        .map_err(|e| classify_rpc_error(e.to_string()))?
        .ok_or_else(|| DistributionError::Rpc("transaction dropped from mempool".to_string()))?;

    if receipt.status == Some(U64::zero()) {
        return Err(DistributionError::Rpc(format!(
            "transaction {:?} reverted",
            receipt.transaction_hash
        )));
    }
    Ok(receipt)
}

#[async_trait]
impl BatchSender for EthersBatchSender {
    async fn send_batch(
        &self,
        call: BatchCall,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        min_confirmations: usize,
    ) -> Result<TransactionReceipt> {
        match call {
            BatchCall::SetClaims => {
                confirm(self.distributor()?.set_claims(recipients, amounts), min_confirmations).await
            }
            BatchCall::AddClaims => {
                confirm(self.distributor()?.add_claims(recipients, amounts), min_confirmations).await
            }
            BatchCall::TransferMany => {
                confirm(self.token()?.transfer_many(recipients, amounts), min_confirmations).await
            }
            BatchCall::AddAllocations { vesting_index } => {
                confirm(
                    self.vesting()?.add_allocations(recipients, amounts, vesting_index),
                    min_confirmations,
                )
                .await
            }
        }
    }

    async fn send_single(&self, call: SingleCall, min_confirmations: usize) -> Result<TransactionReceipt> {
        match call {
            SingleCall::ClearClaims => confirm(self.distributor()?.clear_claims(), min_confirmations).await,
            SingleCall::Claim => confirm(self.distributor()?.claim(), min_confirmations).await,
        }
    }
}
