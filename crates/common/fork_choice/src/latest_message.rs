use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

/// The most recent vote seen from a validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatestMessage {
    #[serde(with = "serde_utils::quoted_u64")]
    pub epoch: u64,
    pub root: B256,
}
