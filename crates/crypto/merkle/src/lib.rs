//! https://ethereum.github.io/consensus-specs/ssz/merkle-proofs

use alloy_primitives::B256;
use anyhow::ensure;

mod hash;
mod index;

use hash::hash_concat;
use index::{generalized_index_child, get_generalized_index_bit, sibling_index};

pub fn merkle_tree(leaves: &[B256], depth: u64) -> anyhow::Result<Vec<B256>> {
    let num_of_leaves = leaves.len();
    let bottom_length = 1 << depth;
    ensure!(
        num_of_leaves <= bottom_length,
        "Number of leaves is greater than the bottom length (depth too small)"
    );

    let mut tree = vec![B256::ZERO; bottom_length];
    tree.extend(leaves);
    tree.extend(vec![B256::ZERO; bottom_length - num_of_leaves]);

    for i in (1..bottom_length).rev() {
        let left = tree[i * 2].as_slice();
        let right = tree[i * 2 + 1].as_slice();
        tree[i] = hash_concat(left, right);
    }

    Ok(tree)
}

pub fn generate_proof(tree: &[B256], index: u64, depth: u64) -> anyhow::Result<Vec<B256>> {
    let bottom_length = 1 << depth;
    ensure!(index < bottom_length, "Index out of bounds");

    let mut proof = vec![];
    let mut current_index = 1;
    let mut current_depth = depth;

    while current_depth > 0 {
        let (left_child_index, right_child_index) = (
            generalized_index_child(current_index, false),
            generalized_index_child(current_index, true),
        );

        if get_generalized_index_bit(index, current_depth - 1) {
            proof.push(tree[left_child_index as usize]);
            current_index = right_child_index;
        } else {
            proof.push(tree[right_child_index as usize]);
            current_index = left_child_index;
        }

        current_depth -= 1;
    }

    proof.reverse();

    Ok(proof)
}

/// Roots of all-zero subtrees, indexed by height.
pub fn zero_hashes(depth: u64) -> Vec<B256> {
    let mut hashes = vec![B256::ZERO; depth as usize + 1];
    for height in 0..depth as usize {
        hashes[height + 1] = hash_concat(hashes[height].as_slice(), hashes[height].as_slice());
    }
    hashes
}

/// Builds the branch for ``index`` and the root of a depth ``depth`` tree holding ``leaves``
/// followed by zero leaves. Only the populated part of each layer is materialized, so deep trees
/// like the deposit contract tree stay cheap.
pub fn sparse_merkle_branch(
    leaves: &[B256],
    index: u64,
    depth: u64,
) -> anyhow::Result<(Vec<B256>, B256)> {
    ensure!(depth < 64, "Depth {depth} is too large");
    ensure!(
        (leaves.len() as u64) <= 1 << depth,
        "Number of leaves is greater than the bottom length (depth too small)"
    );
    ensure!(
        index < leaves.len() as u64,
        "Index {index} out of bounds for {} leaves",
        leaves.len()
    );

    let zero_hashes = zero_hashes(depth);
    let mut layer = leaves.to_vec();
    let mut position = index;
    let mut branch = Vec::with_capacity(depth as usize);

    for height in 0..depth as usize {
        branch.push(
            layer
                .get(sibling_index(position) as usize)
                .copied()
                .unwrap_or(zero_hashes[height]),
        );
        layer = layer
            .chunks(2)
            .map(|pair| {
                let right = pair.get(1).copied().unwrap_or(zero_hashes[height]);
                hash_concat(pair[0].as_slice(), right.as_slice())
            })
            .collect();
        position /= 2;
    }

    let root = layer.first().copied().unwrap_or(zero_hashes[depth as usize]);
    Ok((branch, root))
}

/// Mixes a list length into a root, as SSZ does for variable-length lists.
pub fn mix_in_length(root: B256, length: u64) -> B256 {
    let mut length_bytes = B256::ZERO;
    length_bytes[..8].copy_from_slice(&length.to_le_bytes());
    hash_concat(root.as_slice(), length_bytes.as_slice())
}

/// Check if ``leaf`` at ``index`` verifies against the Merkle ``root`` and ``branch``.
/// Every level is consumed; ``branch`` must hold at least ``depth`` nodes.
pub fn is_valid_merkle_branch(
    leaf: B256,
    branch: &[B256],
    depth: u64,
    index: u64,
    root: B256,
) -> bool {
    if (branch.len() as u64) < depth {
        return false;
    }
    let mut value = leaf;
    for i in 0..depth {
        if get_generalized_index_bit(index, i) {
            value = hash_concat(branch[i as usize].as_slice(), value.as_slice());
        } else {
            value = hash_concat(value.as_slice(), branch[i as usize].as_slice());
        }
    }
    value == root
}
