use std::str::FromStr;

use alloy_primitives::hex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ssz_derive::{Decode, Encode};
use ssz_types::{FixedVector, typenum::U96};
use tree_hash_derive::TreeHash;

use crate::{constants::SIGNATURE_BYTES_LEN, errors::BLSError};

/// A compressed BLS12-381 G2 signature.
#[derive(Debug, PartialEq, Clone, Encode, Decode, TreeHash, Default, Eq, Hash)]
pub struct BLSSignature {
    pub inner: FixedVector<u8, U96>,
}

impl BLSSignature {
    /// The compressed encoding of the point at infinity.
    pub fn infinity() -> Self {
        let mut bytes = vec![0; SIGNATURE_BYTES_LEN];
        bytes[0] = 0xc0;
        Self {
            inner: FixedVector::from(bytes),
        }
    }

    pub fn to_bytes(&self) -> &[u8] {
        self.inner.iter().as_slice()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BLSError> {
        if bytes.len() != SIGNATURE_BYTES_LEN {
            return Err(BLSError::InvalidByteLength {
                expected: SIGNATURE_BYTES_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            inner: FixedVector::from(bytes.to_vec()),
        })
    }
}

impl Serialize for BLSSignature {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(self.to_bytes())))
    }
}

impl<'de> Deserialize<'de> for BLSSignature {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let result: String = Deserialize::deserialize(deserializer)?;
        BLSSignature::from_str(&result).map_err(serde::de::Error::custom)
    }
}

impl FromStr for BLSSignature {
    type Err = BLSError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean_str = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(clean_str).map_err(|_| BLSError::InvalidHexString)?;
        BLSSignature::from_bytes(&bytes)
    }
}
