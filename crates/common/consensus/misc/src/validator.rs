use alloy_primitives::B256;
use keel_bls::PublicKey;
use keel_network_spec::preset::Preset;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

use crate::constants::FAR_FUTURE_EPOCH;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct Validator {
    pub pubkey: PublicKey,

    /// Commitment to pubkey for withdrawals
    pub withdrawal_credentials: B256,

    /// Balance at stake
    #[serde(with = "serde_utils::quoted_u64")]
    pub effective_balance: u64,
    pub slashed: bool,

    /// When criteria for activation were met
    #[serde(with = "serde_utils::quoted_u64")]
    pub activation_eligibility_epoch: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub activation_epoch: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub exit_epoch: u64,

    /// When validator can withdraw funds
    #[serde(with = "serde_utils::quoted_u64")]
    pub withdrawable_epoch: u64,
}

impl Validator {
    /// A fresh validator as created by a first deposit for ``pubkey``.
    pub fn from_deposit<P: Preset>(pubkey: PublicKey, withdrawal_credentials: B256, amount: u64) -> Self {
        Self {
            pubkey,
            withdrawal_credentials,
            effective_balance: (amount - amount % P::EFFECTIVE_BALANCE_INCREMENT)
                .min(P::MAX_EFFECTIVE_BALANCE),
            slashed: false,
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        }
    }

    pub fn is_active_validator(&self, epoch: u64) -> bool {
        self.activation_epoch <= epoch && epoch < self.exit_epoch
    }

    pub fn is_slashable_validator(&self, epoch: u64) -> bool {
        !self.slashed && self.activation_epoch <= epoch && epoch < self.withdrawable_epoch
    }

    /// Check if ``validator`` is eligible to be placed into the activation queue.
    pub fn is_eligible_for_activation_queue<P: Preset>(&self) -> bool {
        self.activation_eligibility_epoch == FAR_FUTURE_EPOCH
            && self.effective_balance == P::MAX_EFFECTIVE_BALANCE
    }

    /// Check if ``validator`` is eligible for activation, given the state's finalized epoch.
    pub fn is_eligible_for_activation(&self, finalized_epoch: u64) -> bool {
        // Placement in queue is finalized
        self.activation_eligibility_epoch <= finalized_epoch
            // Has not yet been activated
            && self.activation_epoch == FAR_FUTURE_EPOCH
    }
}

#[cfg(test)]
mod tests {
    use keel_network_spec::preset::MinimalPreset;
    use rstest::rstest;

    use super::*;

    fn validator(activation_epoch: u64, exit_epoch: u64, withdrawable_epoch: u64) -> Validator {
        Validator {
            pubkey: PublicKey::default(),
            withdrawal_credentials: B256::ZERO,
            effective_balance: MinimalPreset::MAX_EFFECTIVE_BALANCE,
            slashed: false,
            activation_eligibility_epoch: 0,
            activation_epoch,
            exit_epoch,
            withdrawable_epoch,
        }
    }

    #[rstest]
    #[case(4, false)]
    #[case(5, true)]
    #[case(9, true)]
    #[case(10, false)]
    fn test_active_window(#[case] epoch: u64, #[case] expected: bool) {
        assert_eq!(validator(5, 10, 20).is_active_validator(epoch), expected);
    }

    #[rstest]
    #[case(4, false)]
    #[case(12, true)]
    #[case(20, false)]
    fn test_slashable_window(#[case] epoch: u64, #[case] expected: bool) {
        assert_eq!(validator(5, 10, 20).is_slashable_validator(epoch), expected);
    }

    #[test]
    fn test_slashed_validator_is_not_slashable() {
        let mut validator = validator(0, FAR_FUTURE_EPOCH, FAR_FUTURE_EPOCH);
        validator.slashed = true;
        assert!(!validator.is_slashable_validator(3));
        assert!(validator.is_active_validator(3));
    }

    #[test]
    fn test_deposit_rounds_effective_balance() {
        let validator = Validator::from_deposit::<MinimalPreset>(
            PublicKey::default(),
            B256::ZERO,
            17_500_000_000,
        );
        assert_eq!(validator.effective_balance, 17_000_000_000);
        assert!(!validator.is_eligible_for_activation_queue::<MinimalPreset>());

        let capped = Validator::from_deposit::<MinimalPreset>(
            PublicKey::default(),
            B256::ZERO,
            40_000_000_000,
        );
        assert_eq!(capped.effective_balance, MinimalPreset::MAX_EFFECTIVE_BALANCE);
        assert!(capped.is_eligible_for_activation_queue::<MinimalPreset>());
        assert!(!capped.is_eligible_for_activation(10));
    }
}
