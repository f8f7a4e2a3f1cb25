#![warn(clippy::unwrap_used)]

pub mod errors;
pub mod handlers;
pub mod latest_message;
pub mod store;
