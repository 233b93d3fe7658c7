use anyhow::{anyhow, Context as _, Result};
use ethers::{
    middleware::SignerMiddleware,
    providers::{Http, Provider},
    signers::{LocalWallet, Signer},
    types::U256,
};
use log::{info, warn};
use std::sync::Arc;

use token_distributor::{
    airdrop::AirdropStage,
    amount::Amount,
    balances::csv::{read_allocations, read_balance_source, read_blacklist, write_balances_to},
    batch::{
        contracts::{ContractAddresses, EthersBatchSender},
        TransactionBatcher,
    },
    classifier::{AddressClassifier, CodeCache},
    config::{DistributionConfig, RuntimeConfig, Task},
    metrics::describe_metrics,
    pipeline::{run_allocations, run_claims, AllocationInputs, ClaimsInputs, Context, ResumePoint, Submission},
    registry::{self, Network, Registries},
    rpc::{ProviderCodeReader, RetryPolicy},
    types::{checksum, total},
    unwrapper::UnwrapPolicy,
    utils::setup_logger,
    verify::Expectations,
    vesting::{VestingCalculator, DEFAULT_PERIOD_DAYS},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    dotenv::dotenv().ok();
    let config = DistributionConfig::from_env()?;
    setup_logger(config.log_level)?;
    describe_metrics();

    // Load and validate configuration against the static registries
    let registries = Arc::new(registry::builtin()?);
    config.validate_all(&registries)?;
    let runtime_config = RuntimeConfig::default();
    info!("Loaded configuration: {:?}", config);

    let network = registries.network(&config.network)?.clone();
    let provider = Arc::new(
        Provider::<Http>::try_from(config.rpc_url.as_str())
            .with_context(|| format!("RPC_URL {}", config.rpc_url))?,
    );

    // Classifier with cached, rate-limited bytecode lookups
    let retry = RetryPolicy::new(runtime_config.retry_attempts, runtime_config.backoff_base());
    let cache = CodeCache::new(&config.cache_dir, chrono::Duration::days(config.cache_ttl_days));
    let classifier = AddressClassifier::new(registries.clone(), cache).with_reader(
        &network.name,
        Arc::new(ProviderCodeReader::new(provider.clone(), retry)),
        config.rpc_rate_limit,
    )?;

    let submission = if config.dry_run {
        warn!("DRY_RUN enabled, no transactions will be sent");
        Submission::DryRun
    } else {
        Submission::Live(Arc::new(
            live_batcher(&config, &registries, &network, provider.as_ref().clone()).await?,
        ))
    };

    let ctx = Context::new(
        registries.clone(),
        &network.name,
        Arc::new(classifier),
        submission,
        config.batch_options(),
    )?
    .with_classify_concurrency(runtime_config.classify_concurrency);

    let expectations = load_expectations(&config)?;

    match config.task {
        Task::Claims => claims(&ctx, &config, &network, expectations).await,
        Task::Allocations => allocations(&ctx, &config, &registries, expectations).await,
        Task::UnlockedBalances => unlocked_balances(&config, &registries),
    }
}

async fn live_batcher(
    config: &DistributionConfig,
    registries: &Registries,
    network: &Network,
    provider: Provider<Http>,
) -> Result<TransactionBatcher> {
    let key = config
        .private_key
        .as_deref()
        .ok_or_else(|| anyhow!("PRIVATE_KEY is required for live runs"))?;
    let wallet = key
        .parse::<LocalWallet>()
        .context("PRIVATE_KEY")?
        .with_chain_id(network.chain_id);
    info!("Signing as {:?} on {}", wallet.address(), network.name);

    let deployed = |name: &str| registries.deployment(&network.name, name).map(|d| d.address);
    let addresses = ContractAddresses {
        distributor: config.distributor_address.or_else(|| deployed("distributor")),
        token: config.token_address.or_else(|| deployed("token")),
        vesting: config.vesting_address.or_else(|| deployed("vesting")),
    };
    info!("Contracts: {:?}", addresses);

    let client = Arc::new(SignerMiddleware::new(provider, wallet));
    Ok(TransactionBatcher::new(
        Arc::new(EthersBatchSender::new(client, addresses)),
        network.explorer_url.clone(),
    ))
}

fn load_expectations(config: &DistributionConfig) -> Result<Expectations> {
    match &config.expectations {
        Some(path) => Expectations::load(path).with_context(|| format!("EXPECTATIONS {}", path.display())),
        None => {
            warn!("No EXPECTATIONS file, only the total range is checked");
            Ok(Expectations::total_range(Amount::zero(), Amount::from_wei(U256::MAX)))
        }
    }
}

async fn claims(
    ctx: &Context,
    config: &DistributionConfig,
    network: &Network,
    expectations: Expectations,
) -> Result<()> {
    let claims_config = config
        .claims
        .as_ref()
        .ok_or_else(|| anyhow!("claims task without claims inputs"))?;

    let read_all = |paths: &[std::path::PathBuf]| {
        paths
            .iter()
            .map(|path| read_balance_source(path))
            .collect::<Result<Vec<_>, _>>()
    };
    let inputs = ClaimsInputs {
        next: read_all(&claims_config.next)?,
        prev: read_all(&claims_config.prev)?,
        retro: read_all(&claims_config.retro)?,
        blacklist: claims_config
            .blacklist
            .iter()
            .map(|path| read_blacklist(path))
            .collect::<Result<Vec<_>, _>>()?,
        rate: claims_config.rate,
        stage: AirdropStage {
            index: claims_config.stage_index,
            share_numerator: claims_config.share_numerator,
            share_denominator: claims_config.share_denominator,
        },
        unwrap_policy: UnwrapPolicy::for_network(network).with_rules(claims_config.unwrap_rules.iter().copied()),
        expectations,
        mode: claims_config.mode,
    };

    let outcome = run_claims(ctx, inputs).await?;
    info!(
        "Claims: {} recipients, total {}, {} chunks planned, {} sent",
        outcome.claims.get().len(),
        outcome.claims.report().total,
        outcome.planned.len(),
        outcome.receipts.len()
    );
    for receipt in &outcome.receipts {
        info!("  chunk {}: {}", receipt.index, receipt.tx.explorer_url);
    }

    if let Some(output) = &config.output {
        write_balances_to(output, outcome.claims.get())?;
        info!("Wrote claims to {}", output.display());
    }
    Ok(())
}

fn calculator(config: &DistributionConfig, registries: &Arc<Registries>) -> Result<VestingCalculator> {
    let allocations = config
        .allocations
        .as_ref()
        .ok_or_else(|| anyhow!("task needs ALLOCATIONS and VESTING_START"))?;
    Ok(VestingCalculator::new(
        registries.clone(),
        allocations.vesting_start,
        chrono::Duration::days(DEFAULT_PERIOD_DAYS),
    )?)
}

async fn allocations(
    ctx: &Context,
    config: &DistributionConfig,
    registries: &Arc<Registries>,
    expectations: Expectations,
) -> Result<()> {
    let calculator = calculator(config, registries)?;
    let allocations_config = config
        .allocations
        .as_ref()
        .ok_or_else(|| anyhow!("allocations task without inputs"))?;

    let inputs = AllocationInputs {
        allocations: read_allocations(&allocations_config.allocations)?,
        as_of: allocations_config.as_of,
        expectations,
        resume: ResumePoint {
            call: config.resume_call,
            chunk: config.resume_from,
        },
    };

    let outcome = run_allocations(ctx, &calculator, inputs).await?;
    info!("Finished vesting types: {:?}", outcome.finished);
    for (index, planned) in outcome.calls.iter().enumerate() {
        info!(
            "  call {}: {} for {:?}, {} recipients in {} chunks",
            index,
            planned.call,
            planned.vesting_types,
            planned.transfers.get().len(),
            planned.chunks.len()
        );
    }
    Ok(())
}

fn unlocked_balances(config: &DistributionConfig, registries: &Arc<Registries>) -> Result<()> {
    let calculator = calculator(config, registries)?;
    let allocations_config = config
        .allocations
        .as_ref()
        .ok_or_else(|| anyhow!("unlocked balances task without inputs"))?;

    let allocations = read_allocations(&allocations_config.allocations)?;
    let unlocked = calculator.unlocked_balances(&allocations, allocations_config.as_of)?;
    info!(
        "Unlocked as of {}: {} across {} addresses",
        allocations_config.as_of.format("%Y-%m-%d"),
        total(&unlocked)?,
        unlocked.len()
    );

    match &config.output {
        Some(output) => {
            write_balances_to(output, &unlocked)?;
            info!("Wrote unlocked balances to {}", output.display());
        }
        None => {
            for (address, amount) in &unlocked {
                info!("  {}: {}", checksum(address), amount);
            }
        }
    }
    Ok(())
}
