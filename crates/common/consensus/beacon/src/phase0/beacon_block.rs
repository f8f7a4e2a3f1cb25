use alloy_primitives::B256;
use keel_bls::BLSSignature;
use keel_consensus_misc::{
    beacon_block_header::{BeaconBlockHeader, SignedBeaconBlockHeader},
    validator_index::ValidatorIndex,
};
use keel_network_spec::preset::Preset;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use super::beacon_block_body::BeaconBlockBody;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct SignedBeaconBlock<P: Preset> {
    pub message: BeaconBlock<P>,
    pub signature: BLSSignature,
}

impl<P: Preset> SignedBeaconBlock<P> {
    pub fn signed_header(&self) -> SignedBeaconBlockHeader {
        SignedBeaconBlockHeader {
            message: self.message.block_header(),
            signature: self.signature.clone(),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct BeaconBlock<P: Preset> {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    pub proposer_index: ValidatorIndex,
    pub parent_root: B256,
    pub state_root: B256,
    pub body: BeaconBlockBody<P>,
}

impl<P: Preset> BeaconBlock<P> {
    /// The header committing to this block. Its root equals the block root.
    pub fn block_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }
}
