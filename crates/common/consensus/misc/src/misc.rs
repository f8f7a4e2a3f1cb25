use std::cmp::max;

use alloy_primitives::{B256, aliases::B32};
use anyhow::ensure;
use ethereum_hashing::hash;
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use tree_hash::TreeHash;

use crate::{fork_data::ForkData, signing_data::SigningData, validator_index::ValidatorIndex};

/// Return the largest integer ``x`` such that ``x**2 <= n``.
///
/// ``u64::MAX`` maps to ``u32::MAX``.
pub fn integer_squareroot(n: u64) -> u64 {
    if n == u64::MAX {
        return u32::MAX as u64;
    }
    let mut x = n;
    let mut y = (x + 1) / 2;
    while y < x {
        x = y;
        y = (x + n / x) / 2;
    }
    x
}

/// Return the exclusive-or of two 32-byte strings.
pub fn xor(bytes_1: B256, bytes_2: B256) -> B256 {
    let mut result = B256::ZERO;
    for (i, byte) in result.iter_mut().enumerate() {
        *byte = bytes_1[i] ^ bytes_2[i];
    }
    result
}

/// Return the ``length``-byte little-endian serialization of ``n``.
/// Bytes past the eighth are zero; a ``length`` under eight keeps the low bytes.
pub fn int_to_bytes(n: u64, length: usize) -> Vec<u8> {
    let mut bytes = n.to_le_bytes().to_vec();
    bytes.resize(length, 0);
    bytes
}

/// Return the integer deserialization of ``data`` interpreted as little-endian.
/// Only the first eight bytes are read.
pub fn bytes_to_int(data: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    let len = data.len().min(8);
    bytes[..len].copy_from_slice(&data[..len]);
    u64::from_le_bytes(bytes)
}

/// Return the shuffled index corresponding to ``seed`` (and ``index_count``).
pub fn compute_shuffled_index<P: Preset>(
    mut index: u64,
    index_count: u64,
    seed: B256,
) -> anyhow::Result<u64> {
    ensure!(
        index < index_count,
        "Index {index} must be less than index count {index_count}"
    );

    for round in 0..P::SHUFFLE_ROUND_COUNT {
        let seed_with_round = [seed.as_slice(), &[round]].concat();
        let pivot = bytes_to_int(&hash(&seed_with_round)[..8]) % index_count;
        let flip = (pivot + index_count - index) % index_count;
        let position = max(index, flip);
        let source = hash(&[seed_with_round.as_slice(), &int_to_bytes(position / 256, 4)].concat());
        let byte = source[((position % 256) / 8) as usize];
        let bit = (byte >> (position % 8)) % 2;
        if bit == 1 {
            index = flip;
        }
    }

    Ok(index)
}

/// Return the committee corresponding to ``indices``, ``seed``, ``index``, and committee
/// ``count``.
pub fn compute_committee<P: Preset>(
    indices: &[ValidatorIndex],
    seed: B256,
    index: u64,
    count: u64,
) -> anyhow::Result<Vec<ValidatorIndex>> {
    ensure!(index < count, "Committee index {index} out of range for {count} committees");
    let total = indices.len() as u64;
    let start = (total * index) / count;
    let end = (total * (index + 1)) / count;
    (start..end)
        .map(|i| {
            let shuffled_index = compute_shuffled_index::<P>(i, total, seed)?;
            indices
                .get(shuffled_index as usize)
                .copied()
                .ok_or_else(|| anyhow::anyhow!("Index out of bounds: {shuffled_index}"))
        })
        .collect()
}

/// Return the epoch number at ``slot``.
pub fn compute_epoch_at_slot<P: Preset>(slot: u64) -> u64 {
    slot / P::SLOTS_PER_EPOCH
}

/// Return the start slot of ``epoch``.
pub fn compute_start_slot_at_epoch<P: Preset>(epoch: u64) -> u64 {
    epoch * P::SLOTS_PER_EPOCH
}

/// Return the epoch during which validator activations and exits initiated in ``epoch`` take
/// effect.
pub fn compute_activation_exit_epoch<P: Preset>(epoch: u64) -> u64 {
    epoch + 1 + P::MAX_SEED_LOOKAHEAD
}

pub fn compute_fork_data_root(current_version: B32, genesis_validators_root: B256) -> B256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .compute_fork_data_root()
}

pub fn compute_fork_digest(current_version: B32, genesis_validators_root: B256) -> B32 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .compute_fork_digest()
}

/// Return the domain for the ``domain_type`` and ``fork_version``. Omitted values default to
/// the network's genesis fork version and a zero genesis validators root.
pub fn compute_domain(
    domain_type: B32,
    fork_version: Option<B32>,
    genesis_validators_root: Option<B256>,
    spec: &BeaconNetworkSpec,
) -> B256 {
    let fork_data_root = compute_fork_data_root(
        fork_version.unwrap_or(spec.genesis_fork_version),
        genesis_validators_root.unwrap_or_default(),
    );
    let mut domain = B256::ZERO;
    domain[..4].copy_from_slice(domain_type.as_slice());
    domain[4..].copy_from_slice(&fork_data_root[..28]);
    domain
}

/// Return the signing root for the corresponding signing data.
pub fn compute_signing_root<SSZObject: TreeHash>(ssz_object: &SSZObject, domain: B256) -> B256 {
    SigningData {
        object_root: ssz_object.tree_hash_root(),
        domain,
    }
    .tree_hash_root()
}

pub fn is_sorted_and_unique(indices: &[ValidatorIndex]) -> bool {
    indices.windows(2).all(|w| w[0] < w[1])
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use alloy_primitives::{b256, fixed_bytes};
    use keel_network_spec::preset::{MainnetPreset, MinimalPreset};
    use rstest::rstest;

    use super::*;
    use crate::constants::DOMAIN_BEACON_ATTESTER;

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(3, 1)]
    #[case(4, 2)]
    #[case(15, 3)]
    #[case(16, 4)]
    #[case(1_000_000, 1000)]
    #[case(u64::MAX - 1, u32::MAX as u64)]
    #[case(u64::MAX, u32::MAX as u64)]
    fn test_integer_squareroot(#[case] n: u64, #[case] expected: u64) {
        assert_eq!(integer_squareroot(n), expected);
    }

    #[test]
    fn test_integer_squareroot_bounds() {
        let samples = (0..2000u64)
            .chain((0..64).map(|shift| 1u64 << shift))
            .chain((1..64).map(|shift| (1u64 << shift) - 1))
            .chain([987_654_321_012, 32_000_000_000 * 16384]);
        for n in samples {
            let root = integer_squareroot(n) as u128;
            let n = n as u128;
            assert!(root * root <= n, "{n}");
            assert!(n < (root + 1) * (root + 1), "{n}");
        }
    }

    #[test]
    fn test_xor_is_an_involution() {
        let a = B256::repeat_byte(0x5a);
        let b = b256!("0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef");
        assert_eq!(xor(xor(a, b), b), a);
        assert_eq!(xor(a, a), B256::ZERO);
        assert_eq!(xor(a, B256::ZERO), a);
    }

    #[test]
    fn test_int_bytes_are_little_endian() {
        assert_eq!(int_to_bytes(0x0102, 4), vec![0x02, 0x01, 0, 0]);
        assert_eq!(int_to_bytes(7, 1), vec![7]);
        assert_eq!(int_to_bytes(1, 32).len(), 32);
        assert_eq!(bytes_to_int(&[0x02, 0x01]), 0x0102);
        assert_eq!(bytes_to_int(&int_to_bytes(u64::MAX - 5, 8)), u64::MAX - 5);
    }

    #[rstest]
    #[case(1, 0x01)]
    #[case(2, 0x02)]
    #[case(7, 0x7e)]
    #[case(100, 0xab)]
    #[case(333, 0xff)]
    fn test_shuffle_is_a_bijection(#[case] count: u64, #[case] seed_byte: u8) {
        let seed = B256::repeat_byte(seed_byte);
        let shuffled = (0..count)
            .map(|index| compute_shuffled_index::<MinimalPreset>(index, count, seed).unwrap())
            .collect::<HashSet<_>>();
        assert_eq!(shuffled.len() as u64, count);
        assert!(shuffled.iter().all(|index| *index < count));
    }

    #[test]
    fn test_shuffle_depends_on_round_count() {
        let seed = B256::repeat_byte(0x42);
        let minimal = (0..64)
            .map(|i| compute_shuffled_index::<MinimalPreset>(i, 64, seed).unwrap())
            .collect::<Vec<_>>();
        let mainnet = (0..64)
            .map(|i| compute_shuffled_index::<MainnetPreset>(i, 64, seed).unwrap())
            .collect::<Vec<_>>();
        assert_ne!(minimal, mainnet);
    }

    #[test]
    fn test_shuffle_rejects_out_of_range() {
        assert!(compute_shuffled_index::<MinimalPreset>(5, 5, B256::ZERO).is_err());
        assert!(compute_shuffled_index::<MinimalPreset>(0, 0, B256::ZERO).is_err());
    }

    #[rstest]
    #[case(64, 16)]
    #[case(67, 8)]
    #[case(5, 7)]
    fn test_committees_partition_indices(#[case] total: u64, #[case] count: u64) {
        let indices = (0..total).map(|i| ValidatorIndex(i * 3)).collect::<Vec<_>>();
        let seed = B256::repeat_byte(0x33);
        let committees = (0..count)
            .map(|index| compute_committee::<MinimalPreset>(&indices, seed, index, count).unwrap())
            .collect::<Vec<_>>();

        let sizes = committees.iter().map(Vec::len).collect::<Vec<_>>();
        let smallest = sizes.iter().min().copied().unwrap_or_default();
        let largest = sizes.iter().max().copied().unwrap_or_default();
        assert!(largest - smallest <= 1);

        let members = committees.iter().flatten().copied().collect::<Vec<_>>();
        let unique = members.iter().copied().collect::<HashSet<_>>();
        assert_eq!(members.len() as u64, total);
        assert_eq!(unique, indices.iter().copied().collect::<HashSet<_>>());
    }

    #[test]
    fn test_epoch_slot_math() {
        assert_eq!(compute_epoch_at_slot::<MinimalPreset>(15), 1);
        assert_eq!(compute_epoch_at_slot::<MainnetPreset>(15), 0);
        assert_eq!(compute_start_slot_at_epoch::<MinimalPreset>(3), 24);
        assert_eq!(compute_activation_exit_epoch::<MinimalPreset>(10), 15);
    }

    #[test]
    fn test_compute_domain_layout() {
        let spec = BeaconNetworkSpec::minimal();
        let root = B256::repeat_byte(0x09);
        let domain = compute_domain(DOMAIN_BEACON_ATTESTER, None, Some(root), &spec);
        let fork_data_root = compute_fork_data_root(spec.genesis_fork_version, root);

        assert_eq!(&domain[..4], DOMAIN_BEACON_ATTESTER.as_slice());
        assert_eq!(&domain[4..], &fork_data_root[..28]);
        assert_eq!(
            compute_fork_digest(spec.genesis_fork_version, root).as_slice(),
            &fork_data_root[..4]
        );
        assert_ne!(
            domain,
            compute_domain(
                DOMAIN_BEACON_ATTESTER,
                Some(fixed_bytes!("0x01000001")),
                Some(root),
                &spec
            )
        );
    }

    #[test]
    fn test_signing_root_binds_domain() {
        let object = B256::repeat_byte(0x77);
        let domain_1 = B256::repeat_byte(0x01);
        let domain_2 = B256::repeat_byte(0x02);
        assert_ne!(
            compute_signing_root(&object, domain_1),
            compute_signing_root(&object, domain_2)
        );
        assert_ne!(compute_signing_root(&object, domain_1), object);
    }

    #[test]
    fn test_sorted_and_unique() {
        let indices = |raw: &[u64]| raw.iter().copied().map(ValidatorIndex).collect::<Vec<_>>();
        assert!(is_sorted_and_unique(&indices(&[1, 2, 9])));
        assert!(is_sorted_and_unique(&indices(&[])));
        assert!(!is_sorted_and_unique(&indices(&[1, 1, 9])));
        assert!(!is_sorted_and_unique(&indices(&[3, 2])));
    }
}
