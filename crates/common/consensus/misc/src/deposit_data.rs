use alloy_primitives::B256;
use keel_bls::{BLSSignature, PublicKey};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

use crate::deposit_message::DepositMessage;

#[derive(Debug, PartialEq, Eq, Clone, Hash, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct DepositData {
    pub pubkey: PublicKey,
    pub withdrawal_credentials: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub amount: u64,
    /// Signing over ``DepositMessage``
    pub signature: BLSSignature,
}

impl DepositData {
    pub fn to_deposit_message(&self) -> DepositMessage {
        DepositMessage {
            pubkey: self.pubkey.clone(),
            withdrawal_credentials: self.withdrawal_credentials,
            amount: self.amount,
        }
    }
}
