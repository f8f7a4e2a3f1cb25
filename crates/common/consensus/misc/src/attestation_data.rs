use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

use crate::checkpoint::Checkpoint;

#[derive(Debug, PartialEq, Eq, Clone, Hash, Default, Serialize, Deserialize, Encode, Decode, TreeHash)]
pub struct AttestationData {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    #[serde(with = "serde_utils::quoted_u64")]
    pub index: u64,

    /// LMD GHOST vote
    pub beacon_block_root: B256,

    /// FFG vote
    pub source: Checkpoint,
    pub target: Checkpoint,
}

impl AttestationData {
    /// Check if ``self`` and ``other`` are slashable according to Casper FFG rules: a double
    /// vote (same target epoch, different data) or a surround vote (``self`` surrounds
    /// ``other``).
    pub fn is_slashable_attestation_data(&self, other: &AttestationData) -> bool {
        (self != other && self.target.epoch == other.target.epoch)
            || (self.source.epoch < other.source.epoch && other.target.epoch < self.target.epoch)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn data(source_epoch: u64, target_epoch: u64, root_byte: u8) -> AttestationData {
        AttestationData {
            slot: target_epoch * 8,
            index: 0,
            beacon_block_root: B256::repeat_byte(root_byte),
            source: Checkpoint {
                epoch: source_epoch,
                root: B256::repeat_byte(0x11),
            },
            target: Checkpoint {
                epoch: target_epoch,
                root: B256::repeat_byte(0x22),
            },
        }
    }

    #[rstest]
    // Double vote: same target, different head.
    #[case(data(1, 3, 0xaa), data(1, 3, 0xbb), true)]
    // Identical data is never slashable.
    #[case(data(1, 3, 0xaa), data(1, 3, 0xaa), false)]
    // First surrounds second.
    #[case(data(1, 5, 0xaa), data(2, 4, 0xaa), true)]
    // Second surrounds first: only slashable in the other argument order.
    #[case(data(2, 4, 0xaa), data(1, 5, 0xaa), false)]
    // Different targets, no surround.
    #[case(data(1, 3, 0xaa), data(2, 4, 0xbb), false)]
    // Different data and different target epochs, but sources equal: the double vote clause must
    // not combine with the surround clause's source test.
    #[case(data(1, 4, 0xaa), data(1, 3, 0xbb), false)]
    // Source strictly earlier but targets equal and data identical apart from source.
    #[case(data(0, 3, 0xaa), data(1, 3, 0xaa), true)]
    fn test_ffg_rule_precedence(
        #[case] first: AttestationData,
        #[case] second: AttestationData,
        #[case] expected: bool,
    ) {
        assert_eq!(first.is_slashable_attestation_data(&second), expected);
    }

    #[test]
    fn test_left_to_right_reading_differs() {
        // `a && b || c && d` read strictly left to right would be `((a && b) || c) && d`.
        let first = data(1, 3, 0xaa);
        let second = data(2, 3, 0xbb);
        let double_vote = first != second && first.target.epoch == second.target.epoch;
        let surround =
            first.source.epoch < second.source.epoch && second.target.epoch < first.target.epoch;
        let left_to_right = ((first != second && first.target.epoch == second.target.epoch)
            || first.source.epoch < second.source.epoch)
            && second.target.epoch < first.target.epoch;

        assert!(double_vote);
        assert!(!surround);
        assert!(!left_to_right);
        assert!(first.is_slashable_attestation_data(&second));
    }
}
