use std::str::FromStr;

use alloy_primitives::hex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ssz_derive::{Decode, Encode};
use ssz_types::{FixedVector, typenum::U48};
use tree_hash_derive::TreeHash;

use crate::{constants::PUBLIC_KEY_BYTES_LEN, errors::BLSError};

/// A compressed BLS12-381 G1 public key.
#[derive(Debug, PartialEq, Clone, Encode, Decode, TreeHash, Default, Eq, Hash)]
pub struct PublicKey {
    pub inner: FixedVector<u8, U48>,
}

impl PublicKey {
    pub fn to_bytes(&self) -> &[u8] {
        self.inner.iter().as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        if bytes.len() != PUBLIC_KEY_BYTES_LEN {
            return Err(BLSError::InvalidByteLength {
                expected: PUBLIC_KEY_BYTES_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            inner: FixedVector::from(bytes.to_vec()),
        })
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let result: String = Deserialize::deserialize(deserializer)?;
        PublicKey::from_str(&result).map_err(serde::de::Error::custom)
    }
}

impl FromStr for PublicKey {
    type Err = BLSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean_str = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean_str).map_err(|_| BLSError::InvalidHexString)?;
        PublicKey::from_bytes(&bytes)
    }
}
