use crate::{BLSSignature, PublicKey};

pub trait Signable {
    type Error;

    fn sign(&self, message: &[u8]) -> Result<BLSSignature, Self::Error>;
}

pub trait Aggregatable<T> {
    type Error;

    fn aggregate(items: &[&T]) -> Result<T, Self::Error>;
}

pub trait Verifiable {
    type Error;

    /// Verifies a BLS signature against a public key and message.
    ///
    /// # Returns
    /// * `Result<bool, BLSError>` - Ok(true) if the signature is valid, Ok(false) if verification
    ///   fails, or Err if there are issues with signature or public key bytes
    fn verify(&self, public_key: &PublicKey, message: &[u8]) -> Result<bool, Self::Error>;

    /// Verifies the signature against a single message signed by every key in `public_keys`.
    fn fast_aggregate_verify<'a, P>(
        &self,
        public_keys: P,
        message: &[u8],
    ) -> Result<bool, Self::Error>
    where
        P: AsRef<[&'a PublicKey]>;

    /// Verifies the signature against distinct `(public_key, message)` pairs.
    fn aggregate_verify(
        &self,
        public_keys: &[&PublicKey],
        messages: &[&[u8]],
    ) -> Result<bool, Self::Error>;
}
