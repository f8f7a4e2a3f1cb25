use alloy_primitives::B256;
use anyhow::anyhow;
use keel_consensus_beacon::{attestation::Attestation, phase0::beacon_block::SignedBeaconBlock};
use keel_consensus_misc::misc::compute_start_slot_at_epoch;
use keel_network_spec::preset::Preset;
use tracing::{debug, info};
use tree_hash::TreeHash;

use crate::{
    errors::ForkChoiceError,
    store::{Store, get_checkpoint_state},
};

/// Advance the store to ``time``.
///
/// Every slot between the store's time and ``time`` is ticked in turn, so a tick that skips over an
/// epoch boundary still runs the boundary update. A failed tick restores the store's time.
pub fn on_tick<P: Preset>(store: &mut Store<P>, time: u64) -> Result<(), ForkChoiceError> {
    let start_time = store.time;
    let tick_slot = time.saturating_sub(store.genesis_time) / store.spec.seconds_per_slot;
    while store.get_current_slot() < tick_slot {
        let previous_time =
            store.genesis_time + (store.get_current_slot() + 1) * store.spec.seconds_per_slot;
        store
            .on_tick_per_slot(previous_time)
            .inspect_err(|_| store.time = start_time)?;
    }
    store
        .on_tick_per_slot(time)
        .inspect_err(|_| store.time = start_time)
}

/// Run ``on_block`` upon receiving a new block. Returns the root of the accepted block.
///
/// The store is left untouched when the block is rejected.
pub fn on_block<P: Preset>(
    store: &mut Store<P>,
    signed_block: &SignedBeaconBlock<P>,
) -> Result<B256, ForkChoiceError> {
    let block = &signed_block.message;

    // Parent block must be known
    let pre_state = store
        .block_states
        .get(&block.parent_root)
        .ok_or(ForkChoiceError::UnknownParent(block.parent_root))?;

    // Blocks cannot be in the future. If they are, their consideration must be delayed until they
    // are in the past.
    let current_slot = store.get_current_slot();
    if current_slot < block.slot {
        return Err(ForkChoiceError::FutureBlock {
            block_slot: block.slot,
            current_slot,
        });
    }

    // Check that block is later than the finalized epoch slot (optimization to reduce calls to
    // get_ancestor)
    let finalized_slot = compute_start_slot_at_epoch::<P>(store.finalized_checkpoint.epoch);
    if block.slot <= finalized_slot {
        return Err(anyhow!(
            "Block slot {} is not after finalized slot {finalized_slot}",
            block.slot
        )
        .into());
    }

    // Check block is a descendant of the finalized block at the checkpoint finalized slot. The
    // block itself is newer than ``finalized_slot`` so its parent has the same ancestor there.
    if store.get_ancestor(block.parent_root, finalized_slot)? != store.finalized_checkpoint.root {
        return Err(anyhow!("Block does not descend from the finalized checkpoint").into());
    }

    // Check the block is valid and compute the post-state
    let mut state = pre_state.clone();
    state.state_transition(signed_block, true, &store.spec)?;
    let block_root = block.tree_hash_root();

    // Work out checkpoint updates before touching the store
    let state_justified_checkpoint = state.current_justified_checkpoint;
    let state_finalized_checkpoint = state.finalized_checkpoint;
    let mut justified_checkpoint = store.justified_checkpoint;
    let mut best_justified_checkpoint = store.best_justified_checkpoint;
    let mut finalized_checkpoint = store.finalized_checkpoint;

    // Update justified checkpoint
    if state_justified_checkpoint.epoch > justified_checkpoint.epoch {
        if state_justified_checkpoint.epoch > best_justified_checkpoint.epoch {
            best_justified_checkpoint = state_justified_checkpoint;
        }
        if store.should_update_justified_checkpoint(state_justified_checkpoint)? {
            justified_checkpoint = state_justified_checkpoint;
        }
    }

    // Update finalized checkpoint
    if state_finalized_checkpoint.epoch > finalized_checkpoint.epoch {
        finalized_checkpoint = state_finalized_checkpoint;

        // Potentially update justified if different from store
        let finalized_slot = compute_start_slot_at_epoch::<P>(finalized_checkpoint.epoch);
        if state_justified_checkpoint.epoch > justified_checkpoint.epoch
            || store.get_ancestor(justified_checkpoint.root, finalized_slot)?
                != finalized_checkpoint.root
        {
            justified_checkpoint = state_justified_checkpoint;
        }
    }

    let justified_state = if store.checkpoint_states.contains_key(&justified_checkpoint) {
        None
    } else {
        let base_state = store
            .block_states
            .get(&justified_checkpoint.root)
            .ok_or(ForkChoiceError::MissingState(justified_checkpoint.root))?;
        Some(get_checkpoint_state(base_state, justified_checkpoint, &store.spec)?)
    };

    // Add new block and its state to the store
    store.blocks.insert(block_root, block.block_header());
    store.block_states.insert(block_root, state);
    if let Some(justified_state) = justified_state {
        store
            .checkpoint_states
            .insert(justified_checkpoint, justified_state);
    }

    if justified_checkpoint != store.justified_checkpoint {
        info!(
            epoch = justified_checkpoint.epoch,
            root = ?justified_checkpoint.root,
            "Justified checkpoint updated"
        );
    }
    if finalized_checkpoint != store.finalized_checkpoint {
        info!(
            epoch = finalized_checkpoint.epoch,
            root = ?finalized_checkpoint.root,
            "Finalized checkpoint updated"
        );
    }
    store.justified_checkpoint = justified_checkpoint;
    store.best_justified_checkpoint = best_justified_checkpoint;
    store.finalized_checkpoint = finalized_checkpoint;

    debug!(slot = block.slot, root = ?block_root, "Block added to fork choice");

    Ok(block_root)
}

/// Run ``on_attestation`` upon receiving a new ``attestation`` from either within a block or
/// directly on the wire.
///
/// An ``attestation`` that is asserted as invalid may be valid at a later time,
/// consider scheduling it for later processing in such case.
pub fn on_attestation<P: Preset>(
    store: &mut Store<P>,
    attestation: &Attestation<P>,
) -> Result<(), ForkChoiceError> {
    store.validate_on_attestation(attestation)?;

    let target = attestation.data.target;
    store.store_target_checkpoint_state(target)?;

    // Get state at the `target` to fully validate attestation
    let target_state = store
        .checkpoint_states
        .get(&target)
        .ok_or(ForkChoiceError::MissingState(target.root))?;
    let indexed_attestation = target_state.get_indexed_attestation(attestation)?;
    if !target_state.is_valid_indexed_attestation(&indexed_attestation, &store.spec)? {
        return Err(anyhow!("Attestation has an invalid aggregate signature").into());
    }

    // Update latest messages for attesting indices
    store.update_latest_messages(&indexed_attestation.attesting_indices, attestation);

    Ok(())
}
