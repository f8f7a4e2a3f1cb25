pub mod beacon_chain;

pub use keel_fork_choice::errors::ForkChoiceError;
