#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, Bytes, TransactionReceipt, H256, U256, U64};
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};
use url::Url;

use token_distributor::{
    amount::Amount,
    balances::BalanceSource,
    batch::{BatchCall, BatchSender, SingleCall, TransactionBatcher},
    classifier::{AddressClassifier, CodeCache, CodeReader},
    registry::{self, Registries},
    DistributionError, Result,
};

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn tokens(value: u64) -> Amount {
    Amount::from_tokens(value)
}

pub fn source(label: &str, rows: &[(u8, u64)]) -> BalanceSource {
    BalanceSource::from_rows(label, rows.iter().map(|&(a, v)| (addr(a), tokens(v)))).unwrap()
}

pub fn registries() -> Arc<Registries> {
    Arc::new(registry::builtin().unwrap())
}

/// Serves fixed bytecode per address; anything unknown has no code
#[derive(Default)]
pub struct FakeCodeReader {
    code: HashMap<Address, Bytes>,
    pub calls: AtomicUsize,
}

impl FakeCodeReader {
    pub fn with_contract(mut self, address: Address, code: &[u8]) -> Self {
        self.code.insert(address, Bytes::from(code.to_vec()));
        self
    }
}

#[async_trait]
impl CodeReader for FakeCodeReader {
    async fn get_code(&self, address: Address) -> Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }
}

pub fn classifier(cache_dir: &Path, reader: FakeCodeReader) -> Arc<AddressClassifier> {
    Arc::new(
        AddressClassifier::new(registries(), CodeCache::with_default_ttl(cache_dir))
            .with_reader("hardhat", Arc::new(reader), 1000)
            .unwrap(),
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Batch {
        call: BatchCall,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
    },
    Single(SingleCall),
}

/// Records every call; optionally fails the n-th batch call (0-based)
#[derive(Default)]
pub struct RecordingSender {
    pub sent: Mutex<Vec<Sent>>,
    fail_batch_at: Option<usize>,
    batches: AtomicUsize,
}

impl RecordingSender {
    pub fn failing_at(batch: usize) -> Self {
        Self {
            fail_batch_at: Some(batch),
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn receipt(&self) -> TransactionReceipt {
        let n = self.sent.lock().unwrap().len() as u64;
        TransactionReceipt {
            transaction_hash: H256::from_low_u64_be(n + 1),
            block_number: Some(U64::from(100 + n)),
            status: Some(U64::one()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl BatchSender for RecordingSender {
    async fn send_batch(
        &self,
        call: BatchCall,
        recipients: Vec<Address>,
        amounts: Vec<U256>,
        _min_confirmations: usize,
    ) -> Result<TransactionReceipt> {
        let index = self.batches.fetch_add(1, Ordering::SeqCst);
        if self.fail_batch_at == Some(index) {
            return Err(DistributionError::Rpc("nonce too low".to_string()));
        }
        let receipt = self.receipt();
        self.sent.lock().unwrap().push(Sent::Batch {
            call,
            recipients,
            amounts,
        });
        Ok(receipt)
    }

    async fn send_single(&self, call: SingleCall, _min_confirmations: usize) -> Result<TransactionReceipt> {
        let receipt = self.receipt();
        self.sent.lock().unwrap().push(Sent::Single(call));
        Ok(receipt)
    }
}

pub fn batcher(sender: Arc<RecordingSender>) -> Arc<TransactionBatcher> {
    Arc::new(TransactionBatcher::new(
        sender,
        Url::parse("https://sepolia.etherscan.io/").unwrap(),
    ))
}
