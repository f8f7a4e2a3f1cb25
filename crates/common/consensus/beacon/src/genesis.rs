use alloy_primitives::B256;
use anyhow::anyhow;
use keel_consensus_misc::{
    beacon_block_header::BeaconBlockHeader,
    checkpoint::Checkpoint,
    constants::{DEPOSIT_CONTRACT_TREE_DEPTH, GENESIS_EPOCH, GENESIS_SLOT},
    deposit_data::DepositData,
    eth_1_data::Eth1Data,
    fork::Fork,
};
use keel_merkle::{mix_in_length, sparse_merkle_branch, zero_hashes};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use ssz_types::{BitVector, FixedVector, VariableList};
use tracing::info;
use tree_hash::TreeHash;

use crate::{
    deposit::Deposit,
    phase0::{beacon_block_body::BeaconBlockBody, beacon_state::BeaconState},
};

/// Root of the deposit contract list holding ``leaves``, with the length mixed in.
pub fn deposit_contract_root(leaves: &[B256]) -> anyhow::Result<B256> {
    let root = match leaves.len() {
        0 => zero_hashes(DEPOSIT_CONTRACT_TREE_DEPTH)
            .last()
            .copied()
            .ok_or_else(|| anyhow!("Missing zero hash for the deposit tree"))?,
        len => sparse_merkle_branch(leaves, len as u64 - 1, DEPOSIT_CONTRACT_TREE_DEPTH)?.1,
    };
    Ok(mix_in_length(root, leaves.len() as u64))
}

/// Wraps ``deposit_data`` into deposits whose proofs verify against the deposit root as it grows
/// one deposit at a time, which is how [`initialize_beacon_state_from_eth1`] consumes them.
pub fn genesis_deposits(deposit_data: &[DepositData]) -> anyhow::Result<Vec<Deposit>> {
    let leaves = deposit_data
        .iter()
        .map(|data| data.tree_hash_root())
        .collect::<Vec<_>>();

    deposit_data
        .iter()
        .enumerate()
        .map(|(index, data)| {
            let (mut proof, _) = sparse_merkle_branch(
                &leaves[..=index],
                index as u64,
                DEPOSIT_CONTRACT_TREE_DEPTH,
            )?;
            let mut length = B256::ZERO;
            length[..8].copy_from_slice(&(index as u64 + 1).to_le_bytes());
            proof.push(length);
            Ok(Deposit {
                proof: FixedVector::new(proof)
                    .map_err(|err| anyhow!("Invalid deposit proof length: {err:?}"))?,
                data: data.clone(),
            })
        })
        .collect()
}

/// Build the genesis state from the eth1 block that triggered genesis and the deposits made up to
/// it.
pub fn initialize_beacon_state_from_eth1<P: Preset>(
    eth1_block_hash: B256,
    eth1_timestamp: u64,
    deposits: &[Deposit],
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BeaconState<P>> {
    let mut state = BeaconState::<P> {
        genesis_time: eth1_timestamp + spec.genesis_delay,
        genesis_validators_root: B256::ZERO,
        slot: GENESIS_SLOT,
        fork: Fork {
            previous_version: spec.genesis_fork_version,
            current_version: spec.genesis_fork_version,
            epoch: GENESIS_EPOCH,
        },
        latest_block_header: BeaconBlockHeader {
            body_root: BeaconBlockBody::<P>::default().tree_hash_root(),
            ..Default::default()
        },
        block_roots: FixedVector::default(),
        state_roots: FixedVector::default(),
        historical_roots: VariableList::default(),
        eth1_data: Eth1Data {
            deposit_root: B256::ZERO,
            deposit_count: deposits.len() as u64,
            block_hash: eth1_block_hash,
        },
        eth1_data_votes: VariableList::default(),
        eth1_deposit_index: 0,
        validators: VariableList::default(),
        balances: VariableList::default(),
        randao_mixes: FixedVector::from_elem(eth1_block_hash),
        slashings: FixedVector::default(),
        previous_epoch_attestations: VariableList::default(),
        current_epoch_attestations: VariableList::default(),
        justification_bits: BitVector::new(),
        previous_justified_checkpoint: Checkpoint::default(),
        current_justified_checkpoint: Checkpoint::default(),
        finalized_checkpoint: Checkpoint::default(),
    };

    // Process deposits
    let mut leaves = Vec::with_capacity(deposits.len());
    for deposit in deposits {
        leaves.push(deposit.data.tree_hash_root());
        state.eth1_data.deposit_root = deposit_contract_root(&leaves)?;
        state.process_deposit(deposit, spec)?;
    }

    // Process activations
    for (validator, &balance) in state.validators.iter_mut().zip(state.balances.iter()) {
        validator.effective_balance = (balance - balance % P::EFFECTIVE_BALANCE_INCREMENT)
            .min(P::MAX_EFFECTIVE_BALANCE);
        if validator.effective_balance == P::MAX_EFFECTIVE_BALANCE {
            validator.activation_eligibility_epoch = GENESIS_EPOCH;
            validator.activation_epoch = GENESIS_EPOCH;
        }
    }

    // Set genesis validators root for domain separation and chain versioning
    state.genesis_validators_root = state.validators.tree_hash_root();

    info!(
        genesis_time = state.genesis_time,
        validators = state.validators.len(),
        active = state.get_active_validator_indices(GENESIS_EPOCH).len(),
        "Initialized genesis state"
    );

    Ok(state)
}
