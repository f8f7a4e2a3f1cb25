use alloy_primitives::B256;

/// Fork choice failures. Lookups of roots the store has never seen are kept apart from messages
/// that were seen and found invalid.
#[derive(thiserror::Error, Debug)]
pub enum ForkChoiceError {
    #[error("Unknown block {0}")]
    UnknownBlock(B256),

    #[error("Unknown parent block {0}")]
    UnknownParent(B256),

    #[error("Missing state for {0}")]
    MissingState(B256),

    #[error("Block slot {block_slot} is ahead of current slot {current_slot}")]
    FutureBlock { block_slot: u64, current_slot: u64 },

    #[error("Attestation for slot {attestation_slot} is premature at slot {current_slot}")]
    FutureAttestation {
        attestation_slot: u64,
        current_slot: u64,
    },

    #[error("Invalid: {0}")]
    Invalid(#[from] anyhow::Error),
}

impl ForkChoiceError {
    /// Whether the message may become acceptable later, once time advances or missing blocks
    /// arrive.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::UnknownBlock(_)
                | Self::UnknownParent(_)
                | Self::FutureBlock { .. }
                | Self::FutureAttestation { .. }
        )
    }
}
