use alloy_primitives::{aliases::B32, fixed_bytes};

pub const GENESIS_SLOT: u64 = 0;
pub const GENESIS_EPOCH: u64 = 0;
pub const FAR_FUTURE_EPOCH: u64 = u64::MAX;
pub const BASE_REWARDS_PER_EPOCH: u64 = 4;
pub const DEPOSIT_CONTRACT_TREE_DEPTH: u64 = 32;
pub const JUSTIFICATION_BITS_LENGTH: usize = 4;
pub const MAX_RANDOM_BYTE: u64 = 255;
pub const TARGET_AGGREGATORS_PER_COMMITTEE: u64 = 16;
pub const BLS_WITHDRAWAL_PREFIX: &[u8] = &[0x00];

pub const DOMAIN_BEACON_PROPOSER: B32 = fixed_bytes!("0x00000000");
pub const DOMAIN_BEACON_ATTESTER: B32 = fixed_bytes!("0x01000000");
pub const DOMAIN_RANDAO: B32 = fixed_bytes!("0x02000000");
pub const DOMAIN_DEPOSIT: B32 = fixed_bytes!("0x03000000");
pub const DOMAIN_VOLUNTARY_EXIT: B32 = fixed_bytes!("0x04000000");
pub const DOMAIN_SELECTION_PROOF: B32 = fixed_bytes!("0x05000000");
pub const DOMAIN_AGGREGATE_AND_PROOF: B32 = fixed_bytes!("0x06000000");
