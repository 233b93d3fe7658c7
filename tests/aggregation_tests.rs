mod common;

use anyhow::Result;
use std::io::Write;

use common::{addr, source, tokens};
use token_distributor::{
    amount::Amount,
    balances::{
        aggregate,
        csv::{read_balance_source, read_blacklist, write_balances_to},
        BalanceSource, Blacklist,
    },
    types::total,
    DistributionError,
};

fn blacklist(bytes: &[u8]) -> Blacklist {
    Blacklist::from_addresses("blacklist", bytes.iter().map(|&b| addr(b))).unwrap()
}

#[test]
fn test_next_overrides_prev() -> Result<()> {
    let merged = aggregate(
        &[source("next", &[(1, 5)])],
        &[source("prev", &[(1, 10)])],
        &[],
        &[],
    )?;
    assert_eq!(merged.balances[&addr(1)], tokens(5));
    assert_eq!(merged.balances.len(), 1);
    Ok(())
}

#[test]
fn test_retro_adds_to_prev() -> Result<()> {
    let merged = aggregate(
        &[],
        &[source("prev", &[(1, 10)])],
        &[source("retro", &[(1, 3), (2, 4)])],
        &[],
    )?;
    assert_eq!(merged.balances[&addr(1)], tokens(13));
    assert_eq!(merged.balances[&addr(2)], tokens(4));
    Ok(())
}

#[test]
fn test_blacklist_zeroes_balance() -> Result<()> {
    let merged = aggregate(
        &[source("next", &[(1, 5), (2, 6)])],
        &[],
        &[],
        &[blacklist(&[2, 9])],
    )?;
    assert_eq!(merged.balances[&addr(1)], tokens(5));
    assert_eq!(merged.balances[&addr(2)], Amount::zero());
    assert_eq!(merged.report.blacklisted_total, tokens(6));
    assert_eq!(total(&merged.balances)?, tokens(5));
    Ok(())
}

#[test]
fn test_conservation_holds_across_scenarios() -> Result<()> {
    let scenarios: Vec<(Vec<BalanceSource>, Vec<BalanceSource>, Vec<BalanceSource>, Vec<Blacklist>)> = vec![
        (vec![source("n", &[(1, 1)])], vec![], vec![], vec![]),
        (
            vec![source("n", &[(1, 7), (3, 2)])],
            vec![source("p", &[(1, 100), (2, 50)])],
            vec![source("r", &[(2, 5), (3, 9), (4, 1)])],
            vec![blacklist(&[4])],
        ),
        (
            vec![source("n1", &[(5, 1)]), source("n2", &[(5, 2), (6, 3)])],
            vec![source("p", &[(6, 40), (7, 8)])],
            vec![],
            vec![blacklist(&[5, 7])],
        ),
    ];

    for (next, prev, retro, lists) in scenarios {
        let merged = aggregate(&next, &prev, &retro, &lists)?;
        assert_eq!(merged.report.expected_total()?, total(&merged.balances)?);
    }
    Ok(())
}

#[test]
fn test_aggregation_is_idempotent() -> Result<()> {
    let next = source("next", &[(1, 5), (2, 6)]);
    let prev = source("prev", &[(3, 1)]);
    let once = aggregate(&[next.clone()], &[prev.clone()], &[], &[])?;
    let twice = aggregate(&[next.clone(), next], &[prev.clone(), prev], &[], &[])?;
    assert_eq!(once, twice);
    Ok(())
}

#[test]
fn test_same_label_with_different_content_is_rejected() {
    let err = aggregate(
        &[source("next", &[(1, 5)]), source("next", &[(1, 6)])],
        &[],
        &[],
        &[],
    )
    .unwrap_err();
    assert!(matches!(err, DistributionError::DuplicateEntry { .. }));
}

#[test]
fn test_csv_round_trip_through_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let next_path = dir.path().join("next.csv");
    let mut file = std::fs::File::create(&next_path)?;
    writeln!(file, "address,amount")?;
    writeln!(file, "0x0101010101010101010101010101010101010101, 1.5")?;
    writeln!(file, "0x0202020202020202020202020202020202020202,2")?;

    let blacklist_path = dir.path().join("blacklist.csv");
    std::fs::write(&blacklist_path, "address\n0x0202020202020202020202020202020202020202\n")?;

    let next = read_balance_source(&next_path)?;
    assert_eq!(next.label(), "next.csv");
    let merged = aggregate(&[next], &[], &[], &[read_blacklist(&blacklist_path)?])?;

    let out = dir.path().join("merged.csv");
    write_balances_to(&out, &merged.balances)?;
    let reread = read_balance_source(&out)?;
    assert_eq!(reread.balances(), &merged.balances);
    assert_eq!(reread.total()?, Amount::parse("1.5")?);
    Ok(())
}

#[test]
fn test_duplicate_address_in_csv_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("dup.csv");
    std::fs::write(
        &path,
        "address,amount\n\
         0x0101010101010101010101010101010101010101,1\n\
         0x0101010101010101010101010101010101010101,2\n",
    )?;
    assert!(matches!(
        read_balance_source(&path),
        Err(DistributionError::DuplicateEntry { .. })
    ));
    Ok(())
}
