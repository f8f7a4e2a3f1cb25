use thiserror::Error;

#[derive(Error, PartialEq, Eq, Debug)]
pub enum BLSError {
    #[error("blst error: {0}")]
    BlstError(String),
    #[error("invalid public key")]
    InvalidPublicKey,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid private key")]
    InvalidPrivateKey,
    #[error("invalid byte length, expected {expected} got {actual}")]
    InvalidByteLength { expected: usize, actual: usize },
    #[error("invalid hex string")]
    InvalidHexString,
    #[error("cannot aggregate an empty set")]
    EmptyAggregation,
}
