use chrono::{DateTime, Utc};
use ethers::types::Address;
use log::{error, info, warn};
use std::{collections::BTreeMap, collections::BTreeSet, fmt, str::FromStr, sync::Arc};

use crate::airdrop::{stage_claims, AirdropStage};
use crate::amount::Amount;
use crate::balances::{aggregate, Aggregation, BalanceSource, Blacklist};
use crate::batch::{
    plan_chunks, BatchCall, BatchOptions, ChunkReceipt, SingleCall, SubmittedTx, TransactionBatcher,
    TransactionChunk, Transfers,
};
use crate::classifier::AddressClassifier;
use crate::errors::{DistributionError, MismatchError, Result};
use crate::registry::{Network, Registries};
use crate::types::{total, Allocation, BalanceMap, Claims};
use crate::unwrapper::{unwrap, UnwrapPolicy, Unwrapped};
use crate::verify::{verify, verify_with, Expectations, Verified};
use crate::vesting::VestingCalculator;

/// Whether transactions are actually sent
pub enum Submission {
    DryRun,
    Live(Arc<TransactionBatcher>),
}

/// Everything a run needs, passed explicitly
pub struct Context {
    pub registries: Arc<Registries>,
    pub network: Network,
    pub classifier: Arc<AddressClassifier>,
    pub submission: Submission,
    pub batch: BatchOptions,
    pub classify_concurrency: usize,
}

impl Context {
    pub fn new(
        registries: Arc<Registries>,
        network: &str,
        classifier: Arc<AddressClassifier>,
        submission: Submission,
        batch: BatchOptions,
    ) -> Result<Self> {
        let network = registries.network(network)?.clone();
        Ok(Self {
            registries,
            network,
            classifier,
            submission,
            batch,
            classify_concurrency: 8,
        })
    }

    pub fn with_classify_concurrency(mut self, concurrency: usize) -> Self {
        self.classify_concurrency = concurrency.max(1);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        matches!(self.submission, Submission::DryRun)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsMode {
    /// `clearClaims` then `setClaims`
    Replace,
    /// `addClaims` on top of the existing claims
    Append,
}

impl ClaimsMode {
    pub fn call(&self) -> BatchCall {
        match self {
            ClaimsMode::Replace => BatchCall::SetClaims,
            ClaimsMode::Append => BatchCall::AddClaims,
        }
    }
}

impl FromStr for ClaimsMode {
    type Err = DistributionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "replace" => Ok(ClaimsMode::Replace),
            "append" => Ok(ClaimsMode::Append),
            other => Err(DistributionError::InvalidArgument(format!(
                "claims mode {other:?}, expected replace or append"
            ))),
        }
    }
}

impl fmt::Display for ClaimsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClaimsMode::Replace => write!(f, "replace"),
            ClaimsMode::Append => write!(f, "append"),
        }
    }
}

pub struct ClaimsInputs {
    pub next: Vec<BalanceSource>,
    pub prev: Vec<BalanceSource>,
    pub retro: Vec<BalanceSource>,
    pub blacklist: Vec<Blacklist>,
    pub rate: Amount,
    pub stage: AirdropStage,
    pub unwrap_policy: UnwrapPolicy,
    pub expectations: Expectations,
    pub mode: ClaimsMode,
}

#[derive(Debug)]
pub struct ClaimsOutcome {
    pub aggregation: Aggregation,
    pub unwrapped: Unwrapped,
    pub claims: Verified<Claims>,
    pub planned: Vec<TransactionChunk>,
    pub cleared: Option<SubmittedTx>,
    /// Empty on dry runs
    pub receipts: Vec<ChunkReceipt>,
}

/// Aggregate, classify, unwrap, convert and verify; then submit the claims
/// unless this is a dry run.
pub async fn run_claims(ctx: &Context, inputs: ClaimsInputs) -> Result<ClaimsOutcome> {
    let aggregation = aggregate(&inputs.next, &inputs.prev, &inputs.retro, &inputs.blacklist)?;
    check_conservation(&aggregation)?;

    let holders: Vec<_> = aggregation
        .balances
        .iter()
        .filter(|(_, amount)| !amount.is_zero())
        .map(|(address, _)| *address)
        .collect();
    let classifications = ctx
        .classifier
        .classify_all(&ctx.network.name, holders, ctx.classify_concurrency)
        .await?;

    let policy = inputs.unwrap_policy.with_blacklist(&inputs.blacklist);
    let unwrapped = unwrap(&aggregation.balances, &classifications, &policy)?;
    if !unwrapped.dropped.is_empty() {
        warn!(
            "{} dropped from {} contract holders on {}",
            total(&unwrapped.dropped)?,
            unwrapped.dropped.len(),
            ctx.network.name
        );
    }

    let claims = stage_claims(&unwrapped.balances, inputs.rate, &inputs.stage)?;
    let claims = verify(claims, &inputs.expectations)?;

    let call = inputs.mode.call();
    let transfers = Transfers::from_verified(&claims);
    let planned = plan_chunks(
        transfers.get().recipients(),
        transfers.get().amounts(),
        ctx.batch.chunk_size,
    )?;

    let (cleared, receipts) = match &ctx.submission {
        Submission::DryRun => {
            info!(
                "Dry run: would send {} chunks of {} ({} mode) for {} recipients",
                planned.len(),
                call,
                inputs.mode,
                transfers.get().len()
            );
            (None, Vec::new())
        }
        Submission::Live(batcher) => {
            let cleared = if inputs.mode == ClaimsMode::Replace && ctx.batch.resume_from == 0 {
                Some(
                    batcher
                        .send_single(SingleCall::ClearClaims, ctx.batch.min_confirmations)
                        .await?,
                )
            } else {
                None
            };
            let receipts = batcher.submit(call, &transfers, &ctx.batch).await?;
            (cleared, receipts)
        }
    };

    Ok(ClaimsOutcome {
        aggregation,
        unwrapped,
        claims,
        planned,
        cleared,
        receipts,
    })
}

fn check_conservation(aggregation: &Aggregation) -> Result<()> {
    let actual = total(&aggregation.balances)?;
    let expected = aggregation.report.expected_total()?;
    if expected != actual {
        error!("Aggregation lost value: expected {}, got {}", expected, actual);
        return Err(MismatchError::Total {
            expected: expected.to_string(),
            actual,
        }
        .into());
    }
    Ok(())
}

/// Where to pick up an allocations run that failed part way
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumePoint {
    /// Index into the planned calls
    pub call: usize,
    /// First chunk of that call still to send
    pub chunk: usize,
}

pub struct AllocationInputs {
    pub allocations: Vec<Allocation>,
    pub as_of: DateTime<Utc>,
    pub expectations: Expectations,
    pub resume: ResumePoint,
}

#[derive(Debug)]
pub struct PlannedCall {
    pub call: BatchCall,
    /// Vesting types paid by this call
    pub vesting_types: Vec<String>,
    pub transfers: Verified<Transfers>,
    pub chunks: Vec<TransactionChunk>,
}

#[derive(Debug)]
pub struct AllocationOutcome {
    pub finished: BTreeSet<String>,
    pub calls: Vec<PlannedCall>,
    /// (call index, receipts); empty on dry runs
    pub receipts: Vec<(usize, Vec<ChunkReceipt>)>,
}

/// Pay allocation rows: finished vesting types as direct transfers, the rest
/// into the vesting contract under their schedule index. Every call is
/// planned and verified before the first one is sent.
pub async fn run_allocations(
    ctx: &Context,
    calculator: &VestingCalculator,
    inputs: AllocationInputs,
) -> Result<AllocationOutcome> {
    let mut by_type: BTreeMap<String, BalanceMap> = BTreeMap::new();
    let mut combined = BalanceMap::new();
    for allocation in &inputs.allocations {
        calculator.schedule(&allocation.vesting_type)?;
        credit(
            by_type.entry(allocation.vesting_type.clone()).or_default(),
            allocation.address,
            allocation.amount,
        )?;
        credit(&mut combined, allocation.address, allocation.amount)?;
    }

    let finished = calculator.finished_types(inputs.as_of);

    let mut split = AllocationSplit::default();
    for (vesting_type, balances) in by_type {
        if finished.contains(&vesting_type) {
            for (address, amount) in &balances {
                credit(&mut split.direct, *address, *amount)?;
            }
            split.direct_types.push(vesting_type);
        } else {
            let vesting_index = calculator
                .schedule(&vesting_type)?
                .smart_contract_index
                .ok_or_else(|| DistributionError::MissingContractIndex(vesting_type.clone()))?;
            split.vested.push((vesting_type, vesting_index, balances));
        }
    }

    // Expectations apply to the combined view of the split
    let verified = verify_with(split, &combined, &inputs.expectations)?;
    let mut calls = Vec::new();
    if !verified.get().direct.is_empty() {
        calls.push(planned_call(
            ctx,
            BatchCall::TransferMany,
            verified.get().direct_types.clone(),
            verified.map(|split| Transfers::from_map(&split.direct)),
        )?);
    }
    for (position, (vesting_type, vesting_index, _)) in verified.get().vested.iter().enumerate() {
        calls.push(planned_call(
            ctx,
            BatchCall::AddAllocations {
                vesting_index: *vesting_index,
            },
            vec![vesting_type.clone()],
            verified.map(|split| Transfers::from_map(&split.vested[position].2)),
        )?);
    }

    info!(
        "Planned {} allocation calls as of {} ({} finished types)",
        calls.len(),
        inputs.as_of.format("%Y-%m-%d"),
        finished.len()
    );
    if inputs.resume.call > calls.len() {
        return Err(DistributionError::InvalidArgument(format!(
            "resume call {} is past the last of {} calls",
            inputs.resume.call,
            calls.len()
        )));
    }

    let mut receipts = Vec::new();
    match &ctx.submission {
        Submission::DryRun => {
            for planned in &calls {
                info!(
                    "Dry run: would send {} chunks of {} for {:?}",
                    planned.chunks.len(),
                    planned.call,
                    planned.vesting_types
                );
            }
        }
        Submission::Live(batcher) => {
            for (index, planned) in calls.iter().enumerate().skip(inputs.resume.call) {
                let options = BatchOptions {
                    resume_from: if index == inputs.resume.call { inputs.resume.chunk } else { 0 },
                    ..ctx.batch
                };
                let sent = batcher
                    .submit(planned.call, &planned.transfers, &options)
                    .await
                    .map_err(|e| match e {
                        DistributionError::ChunkFailed {
                            chunk,
                            last_confirmed,
                            message,
                        } => DistributionError::ChunkFailed {
                            chunk,
                            last_confirmed,
                            message: format!("call {index} ({}): {message}", planned.call),
                        },
                        other => other,
                    })?;
                receipts.push((index, sent));
            }
        }
    }

    Ok(AllocationOutcome {
        finished,
        calls,
        receipts,
    })
}

/// Allocation rows grouped by how they are paid
#[derive(Debug, Default)]
struct AllocationSplit {
    /// Finished types merged into one direct transfer
    direct: BalanceMap,
    direct_types: Vec<String>,
    /// (vesting type, contract index, balances)
    vested: Vec<(String, u8, BalanceMap)>,
}

fn planned_call(
    ctx: &Context,
    call: BatchCall,
    vesting_types: Vec<String>,
    transfers: Verified<Transfers>,
) -> Result<PlannedCall> {
    let chunks = plan_chunks(
        transfers.get().recipients(),
        transfers.get().amounts(),
        ctx.batch.chunk_size,
    )?;
    Ok(PlannedCall {
        call,
        vesting_types,
        transfers,
        chunks,
    })
}

fn credit(balances: &mut BalanceMap, address: Address, amount: Amount) -> Result<()> {
    let entry = balances.entry(address).or_default();
    *entry = entry
        .checked_add(amount)
        .ok_or(DistributionError::Overflow("allocations"))?;
    Ok(())
}
