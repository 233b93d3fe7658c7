pub mod contracts;

use async_trait::async_trait;
use ethers::types::{Address, TransactionReceipt, H256, U256};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use metrics::{counter, histogram, increment_counter};
use std::{fmt, sync::Arc, time::Instant};
use tokio::sync::Mutex;
use url::Url;

use crate::errors::{DistributionError, Result};
use crate::metrics::{
    CHUNKS_FAILED, CHUNKS_SUBMITTED, CONFIRMATION_SECONDS, RECIPIENTS_SUBMITTED,
};
use crate::types::BalanceMap;
use crate::utils::explorer_tx_url;
use crate::verify::Verified;

pub const DEFAULT_CHUNK_SIZE: usize = 400;
pub const DEFAULT_MIN_CONFIRMATIONS: usize = 2;

/// Contract calls taking parallel recipient/amount arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchCall {
    SetClaims,
    AddClaims,
    TransferMany,
    AddAllocations { vesting_index: u8 },
}

impl fmt::Display for BatchCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchCall::SetClaims => write!(f, "setClaims"),
            BatchCall::AddClaims => write!(f, "addClaims"),
            BatchCall::TransferMany => write!(f, "transferMany"),
            BatchCall::AddAllocations { vesting_index } => write!(f, "addAllocations[{vesting_index}]"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SingleCall {
    ClearClaims,
    Claim,
}

impl fmt::Display for SingleCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SingleCall::ClearClaims => write!(f, "clearClaims"),
            SingleCall::Claim => write!(f, "claim"),
        }
    }
}

/// Parallel recipient and amount arrays, always of equal length
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transfers {
    recipients: Vec<Address>,
    amounts: Vec<U256>,
}

impl Transfers {
    pub fn new(recipients: Vec<Address>, amounts: Vec<U256>) -> Result<Self> {
        if recipients.len() != amounts.len() {
            return Err(DistributionError::ArrayLengthMismatch {
                addresses: recipients.len(),
                amounts: amounts.len(),
            });
        }
        Ok(Self {
            recipients,
            amounts,
        })
    }

    /// Non-zero entries in ascending address order
    pub fn from_map(balances: &BalanceMap) -> Self {
        let (recipients, amounts) = balances
            .iter()
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(address, amount)| (*address, amount.as_wei()))
            .unzip();
        Self {
            recipients,
            amounts,
        }
    }

    /// Batch arrays of a verified balance map
    pub fn from_verified(balances: &Verified<BalanceMap>) -> Verified<Self> {
        balances.map(Self::from_map)
    }

    pub fn recipients(&self) -> &[Address] {
        &self.recipients
    }

    pub fn amounts(&self) -> &[U256] {
        &self.amounts
    }

    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionChunk {
    pub index: usize,
    pub recipients: Vec<Address>,
    pub amounts: Vec<U256>,
}

impl TransactionChunk {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// Split parallel arrays into ordered chunks of at most `chunk_size` entries
pub fn plan_chunks(
    recipients: &[Address],
    amounts: &[U256],
    chunk_size: usize,
) -> Result<Vec<TransactionChunk>> {
    if recipients.len() != amounts.len() {
        return Err(DistributionError::ArrayLengthMismatch {
            addresses: recipients.len(),
            amounts: amounts.len(),
        });
    }
    if chunk_size == 0 {
        return Err(DistributionError::InvalidArgument(
            "chunk size must be positive".to_string(),
        ));
    }

    Ok(recipients
        .chunks(chunk_size)
        .zip(amounts.chunks(chunk_size))
        .enumerate()
        .map(|(index, (recipients, amounts))| TransactionChunk {
            index,
            recipients: recipients.to_vec(),
            amounts: amounts.to_vec(),
        })
        .collect())
}

/// Signs, sends and awaits confirmation of distributor calls
#[async_trait]
pub trait BatchSender: Send + Sync {
    async fn send_batch(
        &self,
        call: BatchCall,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        min_confirmations: usize,
    ) -> Result<TransactionReceipt>;

    async fn send_single(&self, call: SingleCall, min_confirmations: usize) -> Result<TransactionReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub chunk_size: usize,
    pub min_confirmations: usize,
    /// First chunk to send; earlier chunks were confirmed by a previous run
    pub resume_from: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            resume_from: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedTx {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub explorer_url: Url,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub index: usize,
    pub recipients: usize,
    pub tx: SubmittedTx,
}

/// Sequential chunked submission from a single signer.
///
/// Overlapping `submit` calls on one batcher are serialised so that nonces are
/// never interleaved.
pub struct TransactionBatcher {
    sender: Arc<dyn BatchSender>,
    explorer: Url,
    lock: Mutex<()>,
}

impl TransactionBatcher {
    pub fn new(sender: Arc<dyn BatchSender>, explorer: Url) -> Self {
        Self {
            sender,
            explorer,
            lock: Mutex::new(()),
        }
    }

    /// The chunks `submit` would send, without sending anything
    pub fn plan(&self, transfers: &Verified<Transfers>, options: &BatchOptions) -> Result<Vec<TransactionChunk>> {
        let transfers = transfers.get();
        plan_chunks(transfers.recipients(), transfers.amounts(), options.chunk_size)
    }

    pub async fn submit(
        &self,
        call: BatchCall,
        transfers: &Verified<Transfers>,
        options: &BatchOptions,
    ) -> Result<Vec<ChunkReceipt>> {
        let chunks = self.plan(transfers, options)?;
        if options.resume_from > chunks.len() {
            return Err(DistributionError::InvalidArgument(format!(
                "resume_from {} is past the last of {} chunks",
                options.resume_from,
                chunks.len()
            )));
        }

        let _guard = self.lock.lock().await;
        info!(
            "Submitting {} for {} recipients in {} chunks (starting at chunk {})",
            call,
            transfers.get().len(),
            chunks.len(),
            options.resume_from
        );

        let progress = ProgressBar::new(chunks.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("{msg} [{bar:40}] {pos}/{len} chunks") {
            progress.set_style(style);
        }
        progress.set_message(call.to_string());
        progress.set_position(options.resume_from as u64);

        let mut receipts = Vec::with_capacity(chunks.len() - options.resume_from);
        for chunk in chunks.into_iter().skip(options.resume_from) {
            let index = chunk.index;
            let size = chunk.len();
            let started = Instant::now();

            let result = self
                .sender
                .send_batch(call, chunk.recipients, chunk.amounts, options.min_confirmations)
                .await
                .and_then(|receipt| self.submitted(&receipt));

            match result {
                Ok(tx) => {
                    histogram!(CONFIRMATION_SECONDS, started.elapsed().as_secs_f64());
                    increment_counter!(CHUNKS_SUBMITTED);
                    counter!(RECIPIENTS_SUBMITTED, size as u64);
                    info!("Chunk {} ({} recipients) confirmed: {}", index, size, tx.explorer_url);

                    receipts.push(ChunkReceipt {
                        index,
                        recipients: size,
                        tx,
                    });
                    progress.inc(1);
                }
                Err(e) => {
                    increment_counter!(CHUNKS_FAILED);
                    progress.abandon_with_message(format!("{call} failed at chunk {index}"));
                    let last_confirmed = index.checked_sub(1);
                    error!(
                        "Chunk {} of {} failed, last confirmed chunk {:?}: {}",
                        index, call, last_confirmed, e
                    );
                    return Err(DistributionError::ChunkFailed {
                        chunk: index,
                        last_confirmed,
                        message: e.to_string(),
                    });
                }
            }
        }

        progress.finish_with_message(format!("{call} done"));
        Ok(receipts)
    }

    pub async fn send_single(&self, call: SingleCall, min_confirmations: usize) -> Result<SubmittedTx> {
        let _guard = self.lock.lock().await;
        let receipt = self.sender.send_single(call, min_confirmations).await?;
        let tx = self.submitted(&receipt)?;
        info!("{} confirmed: {}", call, tx.explorer_url);
        Ok(tx)
    }

    fn submitted(&self, receipt: &TransactionReceipt) -> Result<SubmittedTx> {
        Ok(SubmittedTx {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.as_u64()),
            explorer_url: explorer_tx_url(&self.explorer, &receipt.transaction_hash)?,
        })
    }
}
