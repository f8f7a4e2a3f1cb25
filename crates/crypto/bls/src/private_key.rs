use alloy_primitives::B256;
use serde::{Deserialize, Serialize};

#[derive(Debug, PartialEq, Clone, Default, Eq, Hash, Serialize, Deserialize)]
pub struct PrivateKey {
    pub inner: B256,
}
