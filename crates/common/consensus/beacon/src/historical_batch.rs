use alloy_primitives::B256;
use keel_network_spec::preset::Preset;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::FixedVector;
use tree_hash_derive::TreeHash;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct HistoricalBatch<P: Preset> {
    pub block_roots: FixedVector<B256, P::SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<B256, P::SlotsPerHistoricalRoot>,
}
