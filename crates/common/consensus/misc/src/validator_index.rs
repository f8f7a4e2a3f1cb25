use std::fmt;

use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash::{PackedEncoding, TreeHash};

/// Position of a validator in the registry. The same position addresses its balance.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Encode,
    Decode,
)]
#[serde(transparent)]
#[ssz(struct_behaviour = "transparent")]
pub struct ValidatorIndex(#[serde(with = "serde_utils::quoted_u64")] pub u64);

impl ValidatorIndex {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for ValidatorIndex {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<usize> for ValidatorIndex {
    fn from(value: usize) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for ValidatorIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TreeHash for ValidatorIndex {
    fn tree_hash_type() -> tree_hash::TreeHashType {
        u64::tree_hash_type()
    }

    fn tree_hash_packed_encoding(&self) -> PackedEncoding {
        self.0.tree_hash_packed_encoding()
    }

    fn tree_hash_packing_factor() -> usize {
        u64::tree_hash_packing_factor()
    }

    fn tree_hash_root(&self) -> tree_hash::Hash256 {
        self.0.tree_hash_root()
    }
}
