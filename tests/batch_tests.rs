mod common;

use anyhow::Result;
use ethers::types::{H256, U256};
use std::sync::Arc;

use common::{batcher, RecordingSender, Sent};
use token_distributor::{
    amount::Amount,
    batch::{BatchCall, BatchOptions, SingleCall, Transfers},
    types::BalanceMap,
    verify::{verify, Expectations, Verified},
    DistributionError,
};

fn verified_transfers(n: u64) -> Verified<Transfers> {
    let balances: BalanceMap = (1..=n)
        .map(|i| (ethers::types::Address::from_low_u64_be(i), Amount::from_tokens(i)))
        .collect();
    let anything = Expectations::total_range(Amount::zero(), Amount::from_wei(U256::MAX));
    Transfers::from_verified(&verify(balances, &anything).unwrap())
}

fn options(resume_from: usize) -> BatchOptions {
    BatchOptions {
        chunk_size: 400,
        min_confirmations: 1,
        resume_from,
    }
}

fn batch_sizes(sent: &[Sent]) -> Vec<usize> {
    sent.iter()
        .filter_map(|s| match s {
            Sent::Batch { recipients, .. } => Some(recipients.len()),
            Sent::Single(_) => None,
        })
        .collect()
}

#[test_log::test(tokio::test)]
async fn test_chunks_are_sent_in_order() -> Result<()> {
    let sender = Arc::new(RecordingSender::default());
    let batcher = batcher(sender.clone());
    let transfers = verified_transfers(1000);

    let receipts = batcher.submit(BatchCall::SetClaims, &transfers, &options(0)).await?;
    assert_eq!(receipts.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2]);
    assert_eq!(receipts.iter().map(|r| r.recipients).collect::<Vec<_>>(), vec![400, 400, 200]);

    let sent = sender.sent();
    assert_eq!(batch_sizes(&sent), vec![400, 400, 200]);

    // concatenating the chunks gives back the original arrays
    let mut recipients = Vec::new();
    let mut amounts = Vec::new();
    for s in &sent {
        if let Sent::Batch { call, recipients: r, amounts: a } = s {
            assert_eq!(*call, BatchCall::SetClaims);
            recipients.extend_from_slice(r);
            amounts.extend_from_slice(a);
        }
    }
    assert_eq!(recipients, transfers.get().recipients());
    assert_eq!(amounts, transfers.get().amounts());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_receipts_link_to_explorer() -> Result<()> {
    let sender = Arc::new(RecordingSender::default());
    let receipts = batcher(sender)
        .submit(BatchCall::AddClaims, &verified_transfers(3), &options(0))
        .await?;

    assert_eq!(receipts.len(), 1);
    let tx = &receipts[0].tx;
    assert_eq!(tx.tx_hash, H256::from_low_u64_be(1));
    assert_eq!(tx.block_number, Some(100));
    assert_eq!(
        tx.explorer_url.as_str(),
        format!("https://sepolia.etherscan.io/tx/{:#x}", H256::from_low_u64_be(1))
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failure_reports_last_confirmed_chunk() -> Result<()> {
    let sender = Arc::new(RecordingSender::failing_at(1));
    let err = batcher(sender.clone())
        .submit(BatchCall::SetClaims, &verified_transfers(1000), &options(0))
        .await
        .unwrap_err();

    match err {
        DistributionError::ChunkFailed {
            chunk,
            last_confirmed,
            message,
        } => {
            assert_eq!(chunk, 1);
            assert_eq!(last_confirmed, Some(0));
            assert!(message.contains("nonce too low"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // nothing after the failed chunk was attempted
    assert_eq!(batch_sizes(&sender.sent()), vec![400]);
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failure_on_first_chunk_has_nothing_confirmed() -> Result<()> {
    let sender = Arc::new(RecordingSender::failing_at(0));
    let err = batcher(sender)
        .submit(BatchCall::TransferMany, &verified_transfers(10), &options(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        DistributionError::ChunkFailed {
            chunk: 0,
            last_confirmed: None,
            ..
        }
    ));
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_resume_skips_confirmed_chunks() -> Result<()> {
    let transfers = verified_transfers(1000);
    let sender = Arc::new(RecordingSender::default());
    let receipts = batcher(sender.clone())
        .submit(BatchCall::SetClaims, &transfers, &options(1))
        .await?;

    assert_eq!(receipts.iter().map(|r| r.index).collect::<Vec<_>>(), vec![1, 2]);
    let sent = sender.sent();
    assert_eq!(batch_sizes(&sent), vec![400, 200]);
    match &sent[0] {
        Sent::Batch { recipients, .. } => assert_eq!(recipients[0], transfers.get().recipients()[400]),
        other => panic!("unexpected call {other:?}"),
    }

    // resuming past the end is refused, resuming at the end is a no-op
    let batcher = batcher(Arc::new(RecordingSender::default()));
    assert!(batcher.submit(BatchCall::SetClaims, &transfers, &options(4)).await.is_err());
    assert!(batcher.submit(BatchCall::SetClaims, &transfers, &options(3)).await?.is_empty());
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_overlapping_submissions_do_not_interleave() -> Result<()> {
    let sender = Arc::new(RecordingSender::default());
    let batcher = batcher(sender.clone());
    let first = verified_transfers(800);
    let second = verified_transfers(5);

    let first_options = options(0);
    let second_options = options(0);
    let (a, b) = tokio::join!(
        batcher.submit(BatchCall::SetClaims, &first, &first_options),
        batcher.submit(BatchCall::AddClaims, &second, &second_options),
    );
    a?;
    b?;

    let calls: Vec<BatchCall> = sender
        .sent()
        .iter()
        .filter_map(|s| match s {
            Sent::Batch { call, .. } => Some(*call),
            Sent::Single(_) => None,
        })
        .collect();
    assert!(
        calls == vec![BatchCall::SetClaims, BatchCall::SetClaims, BatchCall::AddClaims]
            || calls == vec![BatchCall::AddClaims, BatchCall::SetClaims, BatchCall::SetClaims]
    );
    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_single_call() -> Result<()> {
    let sender = Arc::new(RecordingSender::default());
    let tx = batcher(sender.clone()).send_single(SingleCall::ClearClaims, 1).await?;
    assert_eq!(sender.sent(), vec![Sent::Single(SingleCall::ClearClaims)]);
    assert!(tx.explorer_url.as_str().ends_with(&format!("{:#x}", tx.tx_hash)));
    Ok(())
}

#[test]
fn test_zero_chunk_size_is_rejected() {
    let batcher = batcher(Arc::new(RecordingSender::default()));
    let options = BatchOptions {
        chunk_size: 0,
        ..BatchOptions::default()
    };
    assert!(matches!(
        batcher.plan(&verified_transfers(3), &options),
        Err(DistributionError::InvalidArgument(_))
    ));
}
