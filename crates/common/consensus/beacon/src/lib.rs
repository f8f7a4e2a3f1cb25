#![warn(clippy::unwrap_used)]

pub mod aggregate_and_proof;
pub mod attestation;
pub mod attester_slashing;
pub mod deposit;
pub mod eth1_vote;
pub mod genesis;
pub mod historical_batch;
pub mod indexed_attestation;
pub mod pending_attestation;
pub mod phase0;
pub mod proposer_slashing;
pub mod validator_signing;
pub mod voluntary_exit;

#[cfg(test)]
pub(crate) mod test_utils;
