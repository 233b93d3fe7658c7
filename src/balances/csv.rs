use csv::{ReaderBuilder, StringRecord, Trim};
use log::info;
use std::{collections::HashSet, io, path::Path};

use super::{BalanceSource, Blacklist};
use crate::amount::Amount;
use crate::errors::{DistributionError, Result};
use crate::types::{checksum, parse_address, Allocation, BalanceMap};

fn field<'r>(record: &'r StringRecord, index: usize, label: &str) -> Result<&'r str> {
    record.get(index).filter(|value| !value.is_empty()).ok_or_else(|| {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        DistributionError::InvalidArgument(format!("{label}: line {line} is missing column {index}"))
    })
}

fn reader<R: io::Read>(input: R) -> csv::Reader<R> {
    ReaderBuilder::new().trim(Trim::All).from_reader(input)
}

/// Label sources by file name, falling back to the full path
fn label_for(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// `address,amount` rows with a header line
pub fn parse_balance_rows<R: io::Read>(label: &str, input: R) -> Result<BalanceSource> {
    let mut rows = Vec::new();
    for record in reader(input).records() {
        let record = record?;
        let address = parse_address(field(&record, 0, label)?)?;
        let amount = Amount::parse(field(&record, 1, label)?)?;
        rows.push((address, amount));
    }
    BalanceSource::from_rows(label, rows)
}

pub fn read_balance_source(path: &Path) -> Result<BalanceSource> {
    let label = label_for(path);
    let source = parse_balance_rows(&label, std::fs::File::open(path)?)?;
    info!("Loaded {} balances ({}) from {}", source.balances().len(), source.total()?, label);
    Ok(source)
}

/// Single `address` column with a header line
pub fn parse_blacklist<R: io::Read>(label: &str, input: R) -> Result<Blacklist> {
    let mut addresses = Vec::new();
    for record in reader(input).records() {
        let record = record?;
        addresses.push(parse_address(field(&record, 0, label)?)?);
    }
    Blacklist::from_addresses(label, addresses)
}

pub fn read_blacklist(path: &Path) -> Result<Blacklist> {
    let label = label_for(path);
    parse_blacklist(&label, std::fs::File::open(path)?)
}

/// `address,vestingType,amount` rows. One row per (address, type).
pub fn parse_allocations<R: io::Read>(label: &str, input: R) -> Result<Vec<Allocation>> {
    let mut seen = HashSet::new();
    let mut allocations = Vec::new();
    for record in reader(input).records() {
        let record = record?;
        let allocation = Allocation {
            address: parse_address(field(&record, 0, label)?)?,
            vesting_type: field(&record, 1, label)?.to_string(),
            amount: Amount::parse(field(&record, 2, label)?)?,
        };
        if !seen.insert((allocation.address, allocation.vesting_type.clone())) {
            return Err(DistributionError::duplicate(
                label,
                (checksum(&allocation.address), &allocation.vesting_type),
            ));
        }
        allocations.push(allocation);
    }
    Ok(allocations)
}

pub fn read_allocations(path: &Path) -> Result<Vec<Allocation>> {
    let label = label_for(path);
    let allocations = parse_allocations(&label, std::fs::File::open(path)?)?;
    info!("Loaded {} allocations from {}", allocations.len(), label);
    Ok(allocations)
}

/// Write a balance or claim map as `address,amount` with checksummed addresses
pub fn write_balances<W: io::Write>(output: W, balances: &BalanceMap) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(["address", "amount"])?;
    for (address, amount) in balances {
        writer.write_record([checksum(address), amount.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_balances_to(path: &Path, balances: &BalanceMap) -> Result<()> {
    write_balances(std::fs::File::create(path)?, balances)?;
    info!("Wrote {} rows to {}", balances.len(), path.display());
    Ok(())
}
