pub mod cache;
pub mod rate_limit;

pub use cache::CodeCache;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use futures::{stream, StreamExt, TryStreamExt};
use log::{debug, info};
use metrics::increment_counter;
use std::{collections::HashMap, sync::Arc};

use crate::errors::{DistributionError, Result};
use crate::metrics::{CLASSIFIER_CACHE_HITS, CLASSIFIER_CACHE_MISSES, RPC_CODE_FETCHES};
use crate::registry::Registries;
use crate::types::{checksum, Classification};

/// Read-only access to deployed bytecode on one network
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CodeReader: Send + Sync {
    async fn get_code(&self, address: Address) -> Result<Bytes>;
}

struct Endpoint {
    reader: Arc<dyn CodeReader>,
    limiter: RateLimiter,
}

/// Resolves holder addresses to Human or a known contract kind.
///
/// Static registry first, then cached, rate-limited bytecode lookups. Unknown
/// bytecode is an error, never a silent Human.
pub struct AddressClassifier {
    registries: Arc<Registries>,
    cache: CodeCache,
    endpoints: HashMap<String, Endpoint>,
}

impl AddressClassifier {
    pub fn new(registries: Arc<Registries>, cache: CodeCache) -> Self {
        Self {
            registries,
            cache,
            endpoints: HashMap::new(),
        }
    }

    /// Register the bytecode source for `network`, limited to
    /// `requests_per_second`.
    pub fn with_reader(
        mut self,
        network: &str,
        reader: Arc<dyn CodeReader>,
        requests_per_second: u32,
    ) -> Result<Self> {
        self.registries.network(network)?;
        self.endpoints.insert(
            network.to_string(),
            Endpoint {
                reader,
                limiter: RateLimiter::per_second(requests_per_second),
            },
        );
        Ok(self)
    }

    pub async fn classify(&self, network: &str, address: Address) -> Result<Classification> {
        if let Some(entry) = self.registries.classification(network, &address) {
            debug!("{} is {} ({})", checksum(&address), entry.kind, entry.label);
            return Ok(Classification::Contract(entry.kind));
        }

        let code = self.code_at(network, address).await?;
        if code.is_empty() {
            return Ok(Classification::Human);
        }

        match self.registries.match_bytecode(&code) {
            (_, Some(kind)) => Ok(Classification::Contract(kind)),
            (code_hash, None) => Err(DistributionError::UnknownContract {
                network: network.to_string(),
                address,
                code_hash: hex::encode(code_hash.as_bytes()),
            }),
        }
    }

    /// Classify many addresses with at most `concurrency` lookups in flight.
    /// Fails on the first error.
    pub async fn classify_all<I>(
        &self,
        network: &str,
        addresses: I,
        concurrency: usize,
    ) -> Result<HashMap<Address, Classification>>
    where
        I: IntoIterator<Item = Address>,
    {
        let classified: HashMap<Address, Classification> = stream::iter(addresses)
            .map(|address| async move {
                self.classify(network, address)
                    .await
                    .map(|classification| (address, classification))
            })
            .buffer_unordered(concurrency.max(1))
            .try_collect()
            .await?;

        let contracts = classified
            .values()
            .filter(|c| matches!(c, Classification::Contract(_)))
            .count();
        info!(
            "Classified {} addresses on {}: {} contracts",
            classified.len(),
            network,
            contracts
        );
        Ok(classified)
    }

    async fn code_at(&self, network: &str, address: Address) -> Result<Bytes> {
        if let Some(code) = self.cache.get(network, &address).await? {
            increment_counter!(CLASSIFIER_CACHE_HITS);
            return Ok(code);
        }
        increment_counter!(CLASSIFIER_CACHE_MISSES);

        let endpoint = self
            .endpoints
            .get(network)
            .ok_or_else(|| DistributionError::UnknownNetwork(network.to_string()))?;

        endpoint.limiter.acquire().await;
        increment_counter!(RPC_CODE_FETCHES);
        let code = endpoint.reader.get_code(address).await?;

        self.cache.put(network, &address, &code).await?;
        Ok(code)
    }
}
