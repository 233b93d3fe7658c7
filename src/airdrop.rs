use ethers::types::{U256, U512};
use log::info;
use serde::{Deserialize, Serialize};

use crate::amount::{Amount, DECIMALS};
use crate::errors::{DistributionError, Result};
use crate::types::{total, BalanceMap, Claims};

/// One periodic distribution: claims receive `numerator / denominator` of the
/// rate-converted balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AirdropStage {
    pub index: u32,
    pub share_numerator: u64,
    pub share_denominator: u64,
}

impl AirdropStage {
    pub fn validate(&self) -> Result<()> {
        if self.share_denominator == 0 {
            return Err(DistributionError::InvalidArgument(format!(
                "airdrop stage {}: zero share denominator",
                self.index
            )));
        }
        if self.share_numerator > self.share_denominator {
            return Err(DistributionError::InvalidArgument(format!(
                "airdrop stage {}: share {}/{} exceeds one",
                self.index, self.share_numerator, self.share_denominator
            )));
        }
        Ok(())
    }
}

/// `floor(amount * rate * numerator / denominator)`, `rate` read as an
/// 18-decimal fixed point factor. Only the final division rounds.
pub fn multiply(amount: Amount, rate: Amount, numerator: u64, denominator: u64) -> Result<Amount> {
    if denominator == 0 {
        return Err(DistributionError::InvalidArgument(
            "zero share denominator".to_string(),
        ));
    }

    let product = amount
        .as_wei()
        .full_mul(rate.as_wei())
        .checked_mul(U512::from(numerator))
        .ok_or(DistributionError::Overflow("airdrop multiplier"))?;
    let divisor = U512::from(denominator) * U512::from(U256::exp10(DECIMALS));
    U256::try_from(product / divisor)
        .map(Amount::from_wei)
        .map_err(|_| DistributionError::Overflow("airdrop multiplier"))
}

/// Convert source-chain balances into this stage's claims, skipping zeros
pub fn stage_claims(balances: &BalanceMap, rate: Amount, stage: &AirdropStage) -> Result<Claims> {
    stage.validate()?;

    let mut claims = Claims::new();
    for (address, amount) in balances {
        let claim = multiply(*amount, rate, stage.share_numerator, stage.share_denominator)?;
        if !claim.is_zero() {
            claims.insert(*address, claim);
        }
    }

    info!(
        "Stage {} ({}/{} at rate {}): {} claims totalling {}",
        stage.index,
        stage.share_numerator,
        stage.share_denominator,
        rate,
        claims.len(),
        total(&claims)?
    );
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::Address;

    #[test]
    fn test_multiply_floors_once() {
        // 1 wei * 2.5 * 1/2 = 1.25 wei -> 1
        let rate = Amount::parse("2.5").unwrap();
        let one_wei = Amount::from_wei(U256::one());
        assert_eq!(multiply(one_wei, rate, 1, 2).unwrap(), one_wei);

        let hundred = Amount::from_tokens(100);
        assert_eq!(multiply(hundred, rate, 1, 4).unwrap(), Amount::parse("62.5").unwrap());
    }

    #[test]
    fn test_multiply_zero_and_monotonic() {
        let rate = Amount::parse("0.333333333333333333").unwrap();
        assert_eq!(multiply(Amount::zero(), rate, 3, 7).unwrap(), Amount::zero());

        let mut previous = Amount::zero();
        for wei in 0u64..200 {
            let value = multiply(Amount::from_wei(U256::from(wei)), rate, 3, 7).unwrap();
            assert!(value >= previous);
            previous = value;
        }
    }

    #[test]
    fn test_multiply_rejects_zero_denominator() {
        assert!(multiply(Amount::from_tokens(1), Amount::from_tokens(1), 1, 0).is_err());
    }

    #[test]
    fn test_stage_claims_skip_zero() {
        let balances: BalanceMap = [
            (Address::repeat_byte(1), Amount::from_tokens(10)),
            (Address::repeat_byte(2), Amount::zero()),
        ]
        .into_iter()
        .collect();
        let stage = AirdropStage {
            index: 1,
            share_numerator: 1,
            share_denominator: 4,
        };
        let claims = stage_claims(&balances, Amount::from_tokens(2), &stage).unwrap();
        assert_eq!(claims.len(), 1);
        assert_eq!(claims[&Address::repeat_byte(1)], Amount::from_tokens(5));
    }

    #[test]
    fn test_stage_share_above_one_is_invalid() {
        let stage = AirdropStage {
            index: 2,
            share_numerator: 5,
            share_denominator: 4,
        };
        assert!(stage.validate().is_err());
    }
}
