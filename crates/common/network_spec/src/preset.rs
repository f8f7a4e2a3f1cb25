use std::{fmt::Debug, hash::Hash};

use serde::{Deserialize, Serialize};
use ssz_types::typenum::{
    U2, U16, U32, U64, U128, U1024, U2048, U4096, U8192, U65536, U1099511627776, U16777216,
    Unsigned,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresetName {
    Mainnet,
    Minimal,
}

impl PresetName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresetName::Mainnet => "mainnet",
            PresetName::Minimal => "minimal",
        }
    }
}

/// Compile-time configuration variables.
///
/// Every list and vector length in the beacon containers is a type-level integer here, so
/// `FixedVector`/`VariableList` bounds are enforced by the type system. Scalar values are
/// associated constants. Defaults are the mainnet values.
pub trait Preset:
    'static + Default + Clone + Copy + Debug + PartialEq + Eq + Hash + Send + Sync
{
    type MaxValidatorsPerCommittee: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type SlotsPerHistoricalRoot: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type EpochsPerHistoricalVector: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type EpochsPerSlashingsVector: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type HistoricalRootsLimit: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type ValidatorRegistryLimit: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type SlotsPerEth1VotingPeriod: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxPendingAttestations: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxProposerSlashings: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxAttesterSlashings: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxAttestations: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxDeposits: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;
    type MaxVoluntaryExits: Unsigned + Clone + Debug + PartialEq + Eq + Hash + Send + Sync;

    const NAME: PresetName;

    // Misc
    const MAX_COMMITTEES_PER_SLOT: u64 = 64;
    const TARGET_COMMITTEE_SIZE: u64 = 128;
    const SHUFFLE_ROUND_COUNT: u8 = 90;
    const HYSTERESIS_QUOTIENT: u64 = 4;
    const HYSTERESIS_DOWNWARD_MULTIPLIER: u64 = 1;
    const HYSTERESIS_UPWARD_MULTIPLIER: u64 = 5;

    // Fork choice
    const SAFE_SLOTS_TO_UPDATE_JUSTIFIED: u64 = 8;

    // Gwei values
    const MIN_DEPOSIT_AMOUNT: u64 = 1_000_000_000;
    const MAX_EFFECTIVE_BALANCE: u64 = 32_000_000_000;
    const EFFECTIVE_BALANCE_INCREMENT: u64 = 1_000_000_000;

    // Time parameters
    const MIN_ATTESTATION_INCLUSION_DELAY: u64 = 1;
    const SLOTS_PER_EPOCH: u64 = 32;
    const MIN_SEED_LOOKAHEAD: u64 = 1;
    const MAX_SEED_LOOKAHEAD: u64 = 4;
    const EPOCHS_PER_ETH1_VOTING_PERIOD: u64 = 32;
    const MIN_EPOCHS_TO_INACTIVITY_PENALTY: u64 = 4;

    // Rewards and penalties
    const BASE_REWARD_FACTOR: u64 = 64;
    const WHISTLEBLOWER_REWARD_QUOTIENT: u64 = 512;
    const PROPOSER_REWARD_QUOTIENT: u64 = 8;
    const INACTIVITY_PENALTY_QUOTIENT: u64 = 1 << 24;
    const MIN_SLASHING_PENALTY_QUOTIENT: u64 = 32;
    const PROPORTIONAL_SLASHING_MULTIPLIER: u64 = 3;

    fn slots_per_historical_root() -> u64 {
        Self::SlotsPerHistoricalRoot::to_u64()
    }

    fn epochs_per_historical_vector() -> u64 {
        Self::EpochsPerHistoricalVector::to_u64()
    }

    fn epochs_per_slashings_vector() -> u64 {
        Self::EpochsPerSlashingsVector::to_u64()
    }

    fn max_validators_per_committee() -> u64 {
        Self::MaxValidatorsPerCommittee::to_u64()
    }

    fn slots_per_eth1_voting_period() -> u64 {
        Self::SlotsPerEth1VotingPeriod::to_u64()
    }

    fn max_deposits() -> u64 {
        Self::MaxDeposits::to_u64()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MainnetPreset;

impl Preset for MainnetPreset {
    type MaxValidatorsPerCommittee = U2048;
    type SlotsPerHistoricalRoot = U8192;
    type EpochsPerHistoricalVector = U65536;
    type EpochsPerSlashingsVector = U8192;
    type HistoricalRootsLimit = U16777216;
    type ValidatorRegistryLimit = U1099511627776;
    type SlotsPerEth1VotingPeriod = U1024;
    type MaxPendingAttestations = U4096;
    type MaxProposerSlashings = U16;
    type MaxAttesterSlashings = U2;
    type MaxAttestations = U128;
    type MaxDeposits = U16;
    type MaxVoluntaryExits = U16;

    const NAME: PresetName = PresetName::Mainnet;
}

/// Reduced lengths and committee sizes for local testing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct MinimalPreset;

impl Preset for MinimalPreset {
    type MaxValidatorsPerCommittee = U2048;
    type SlotsPerHistoricalRoot = U64;
    type EpochsPerHistoricalVector = U64;
    type EpochsPerSlashingsVector = U64;
    type HistoricalRootsLimit = U16777216;
    type ValidatorRegistryLimit = U1099511627776;
    type SlotsPerEth1VotingPeriod = U32;
    type MaxPendingAttestations = U1024;
    type MaxProposerSlashings = U16;
    type MaxAttesterSlashings = U2;
    type MaxAttestations = U128;
    type MaxDeposits = U16;
    type MaxVoluntaryExits = U16;

    const NAME: PresetName = PresetName::Minimal;

    const MAX_COMMITTEES_PER_SLOT: u64 = 4;
    const TARGET_COMMITTEE_SIZE: u64 = 4;
    const SHUFFLE_ROUND_COUNT: u8 = 10;
    const SAFE_SLOTS_TO_UPDATE_JUSTIFIED: u64 = 2;
    const SLOTS_PER_EPOCH: u64 = 8;
    const EPOCHS_PER_ETH1_VOTING_PERIOD: u64 = 4;
}
