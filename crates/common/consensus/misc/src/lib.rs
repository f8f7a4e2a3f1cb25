#![warn(clippy::unwrap_used)]

pub mod attestation_data;
pub mod beacon_block_header;
pub mod checkpoint;
pub mod constants;
pub mod deposit_data;
pub mod deposit_message;
pub mod eth_1_data;
pub mod fork;
pub mod fork_data;
pub mod misc;
pub mod signing_data;
pub mod validator;
pub mod validator_index;
