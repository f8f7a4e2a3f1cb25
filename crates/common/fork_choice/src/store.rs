use std::{collections::hash_map::Entry, sync::Arc};

use alloy_primitives::{B256, map::HashMap};
use anyhow::anyhow;
use keel_consensus_beacon::{attestation::Attestation, phase0::beacon_state::BeaconState};
use keel_consensus_misc::{
    beacon_block_header::BeaconBlockHeader,
    checkpoint::Checkpoint,
    constants::{GENESIS_EPOCH, GENESIS_SLOT},
    misc::{compute_epoch_at_slot, compute_start_slot_at_epoch},
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use tracing::info;
use tree_hash::TreeHash;

use crate::{errors::ForkChoiceError, latest_message::LatestMessage};

/// Everything fork choice knows: a block tree keyed by root, the post-state of every block, the
/// latest vote of every validator, and the checkpoints the head is anchored to.
#[derive(Debug, Clone)]
pub struct Store<P: Preset> {
    pub time: u64,
    pub genesis_time: u64,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub best_justified_checkpoint: Checkpoint,
    pub blocks: HashMap<B256, BeaconBlockHeader>,
    pub block_states: HashMap<B256, BeaconState<P>>,
    pub checkpoint_states: HashMap<Checkpoint, BeaconState<P>>,
    pub latest_messages: HashMap<ValidatorIndex, LatestMessage>,
    pub spec: Arc<BeaconNetworkSpec>,
}

impl<P: Preset> Store<P> {
    pub fn get_slots_since_genesis(&self) -> u64 {
        self.time.saturating_sub(self.genesis_time) / self.spec.seconds_per_slot
    }

    pub fn get_current_slot(&self) -> u64 {
        GENESIS_SLOT + self.get_slots_since_genesis()
    }

    pub fn get_current_store_epoch(&self) -> u64 {
        compute_epoch_at_slot::<P>(self.get_current_slot())
    }

    pub fn get_block(&self, root: B256) -> Result<&BeaconBlockHeader, ForkChoiceError> {
        self.blocks
            .get(&root)
            .ok_or(ForkChoiceError::UnknownBlock(root))
    }

    /// Walk parent links from ``root`` back to the latest block at or before ``slot``.
    /// If ``slot`` is empty the result is the closest block before it.
    pub fn get_ancestor(&self, root: B256, slot: u64) -> Result<B256, ForkChoiceError> {
        let mut root = root;
        loop {
            let block = self.get_block(root)?;
            if block.slot <= slot {
                return Ok(root);
            }
            root = block.parent_root;
        }
    }

    pub fn get_latest_attesting_balance(&self, root: B256) -> Result<u64, ForkChoiceError> {
        let state = self
            .checkpoint_states
            .get(&self.justified_checkpoint)
            .ok_or(ForkChoiceError::MissingState(self.justified_checkpoint.root))?;
        let block_slot = self.get_block(root)?.slot;

        let mut balance = 0;
        for index in state.get_active_validator_indices(state.get_current_epoch()) {
            let Some(latest_message) = self.latest_messages.get(&index) else {
                continue;
            };
            if self.get_ancestor(latest_message.root, block_slot)? == root {
                balance += state.validators[index.as_usize()].effective_balance;
            }
        }
        Ok(balance)
    }

    /// Keep the subtree under ``block_root`` if any of its leaves carries a post-state that agrees
    /// with the store's justified and finalized checkpoints.
    pub fn filter_block_tree(
        &self,
        block_root: B256,
        blocks: &mut HashMap<B256, BeaconBlockHeader>,
    ) -> Result<bool, ForkChoiceError> {
        let block = self.get_block(block_root)?;

        let children: Vec<B256> = self
            .blocks
            .iter()
            .filter(|(_, candidate)| candidate.parent_root == block_root)
            .map(|(root, _)| *root)
            .collect();

        if !children.is_empty() {
            let mut any_viable = false;
            for child in children {
                // Every child is visited so that each viable branch is recorded
                if self.filter_block_tree(child, blocks)? {
                    any_viable = true;
                }
            }
            if any_viable {
                blocks.insert(block_root, block.clone());
            }
            return Ok(any_viable);
        }

        // A leaf: only keep it if its justified and finalized checkpoints match the store
        let head_state = self
            .block_states
            .get(&block_root)
            .ok_or(ForkChoiceError::MissingState(block_root))?;

        let correct_justified = self.justified_checkpoint.epoch == GENESIS_EPOCH
            || head_state.current_justified_checkpoint == self.justified_checkpoint;
        let correct_finalized = self.finalized_checkpoint.epoch == GENESIS_EPOCH
            || head_state.finalized_checkpoint == self.finalized_checkpoint;

        if correct_justified && correct_finalized {
            blocks.insert(block_root, block.clone());
            return Ok(true);
        }

        Ok(false)
    }

    /// The block tree rooted at the justified checkpoint, restricted to viable branches.
    pub fn get_filtered_block_tree(
        &self,
    ) -> Result<HashMap<B256, BeaconBlockHeader>, ForkChoiceError> {
        let mut blocks = HashMap::default();
        self.filter_block_tree(self.justified_checkpoint.root, &mut blocks)?;
        Ok(blocks)
    }

    pub fn get_head(&self) -> Result<B256, ForkChoiceError> {
        let blocks = self.get_filtered_block_tree()?;

        // Execute the LMD-GHOST fork choice
        let mut head = self.justified_checkpoint.root;
        let justified_slot = compute_start_slot_at_epoch::<P>(self.justified_checkpoint.epoch);
        loop {
            let children = blocks
                .iter()
                .filter(|(_, block)| block.parent_root == head && block.slot > justified_slot)
                .map(|(root, _)| *root)
                .collect::<Vec<_>>();

            if children.is_empty() {
                return Ok(head);
            }

            // Sort by latest attesting balance with ties broken lexicographically
            let mut best = None;
            for root in children {
                let key = (self.get_latest_attesting_balance(root)?, root);
                if best.is_none_or(|best_key| key > best_key) {
                    best = Some(key);
                }
            }
            head = match best {
                Some((_, root)) => root,
                None => return Ok(head),
            };
        }
    }

    /// To address the bouncing attack, only update conflicting justified checkpoints in the fork
    /// choice if in the early slots of the epoch. Otherwise, delay incorporation of new justified
    /// checkpoint until next epoch boundary.
    pub fn should_update_justified_checkpoint(
        &self,
        new_justified_checkpoint: Checkpoint,
    ) -> Result<bool, ForkChoiceError> {
        if compute_slots_since_epoch_start::<P>(self.get_current_slot())
            < P::SAFE_SLOTS_TO_UPDATE_JUSTIFIED
        {
            return Ok(true);
        }

        let justified_slot = compute_start_slot_at_epoch::<P>(self.justified_checkpoint.epoch);
        Ok(
            self.get_ancestor(new_justified_checkpoint.root, justified_slot)?
                == self.justified_checkpoint.root,
        )
    }

    pub fn validate_on_attestation(
        &self,
        attestation: &Attestation<P>,
    ) -> Result<(), ForkChoiceError> {
        let data = &attestation.data;
        let target = data.target;

        // Attestations must be from the current or previous epoch
        let current_epoch = self.get_current_store_epoch();
        // Use GENESIS_EPOCH for previous when genesis to avoid underflow
        let previous_epoch = current_epoch.saturating_sub(1).max(GENESIS_EPOCH);
        if ![current_epoch, previous_epoch].contains(&target.epoch) {
            return Err(anyhow!(
                "Attestation target epoch {} is neither the current nor the previous epoch",
                target.epoch
            )
            .into());
        }

        // Use target epoch that matches the attestation slot
        if target.epoch != compute_epoch_at_slot::<P>(data.slot) {
            return Err(anyhow!(
                "Attestation target epoch {} does not match slot {}",
                target.epoch,
                data.slot
            )
            .into());
        }

        // Attestation target must be for a known block. If target block is unknown, delay
        // consideration until the block is found
        self.get_block(target.root)?;

        // Attestations must be for a known block. If block is unknown, delay consideration until
        // the block is found
        let attested_block = self.get_block(data.beacon_block_root)?;

        // Attestations must not be for blocks in the future
        if attested_block.slot > data.slot {
            return Err(anyhow!(
                "Attestation votes for block at slot {} from slot {}",
                attested_block.slot,
                data.slot
            )
            .into());
        }

        // Attestations can only affect the fork choice of subsequent slots
        let current_slot = self.get_current_slot();
        if current_slot < data.slot + 1 {
            return Err(ForkChoiceError::FutureAttestation {
                attestation_slot: data.slot,
                current_slot,
            });
        }

        Ok(())
    }

    /// Memoize the state of ``target.root`` advanced to the start of ``target.epoch``.
    pub fn store_target_checkpoint_state(
        &mut self,
        target: Checkpoint,
    ) -> Result<(), ForkChoiceError> {
        if let Entry::Vacant(entry) = self.checkpoint_states.entry(target) {
            let base_state = self
                .block_states
                .get(&target.root)
                .ok_or(ForkChoiceError::MissingState(target.root))?;
            entry.insert(get_checkpoint_state(base_state, target, &self.spec)?);
        }
        Ok(())
    }

    pub fn update_latest_messages(
        &mut self,
        attesting_indices: &[ValidatorIndex],
        attestation: &Attestation<P>,
    ) {
        let target = attestation.data.target;
        let beacon_block_root = attestation.data.beacon_block_root;
        for &index in attesting_indices {
            let is_newer = self
                .latest_messages
                .get(&index)
                .is_none_or(|latest_message| target.epoch > latest_message.epoch);
            if is_newer {
                self.latest_messages.insert(
                    index,
                    LatestMessage {
                        epoch: target.epoch,
                        root: beacon_block_root,
                    },
                );
            }
        }
    }

    /// Advance ``time`` by at most one slot, promoting ``best_justified_checkpoint`` when the
    /// new slot starts an epoch. ``time`` only moves once the promotion has succeeded.
    pub fn on_tick_per_slot(&mut self, time: u64) -> Result<(), ForkChoiceError> {
        let previous_slot = self.get_current_slot();
        let current_slot =
            GENESIS_SLOT + time.saturating_sub(self.genesis_time) / self.spec.seconds_per_slot;

        // Update store.justified_checkpoint if a better checkpoint on the
        // store.finalized_checkpoint chain
        if current_slot > previous_slot
            && compute_slots_since_epoch_start::<P>(current_slot) == 0
            && self.best_justified_checkpoint.epoch > self.justified_checkpoint.epoch
        {
            let best_justified_checkpoint = self.best_justified_checkpoint;
            self.store_target_checkpoint_state(best_justified_checkpoint)?;
            self.justified_checkpoint = best_justified_checkpoint;
            info!(
                epoch = best_justified_checkpoint.epoch,
                root = ?best_justified_checkpoint.root,
                "Promoted best justified checkpoint at epoch boundary"
            );
        }

        // Update store time
        self.time = time;
        Ok(())
    }
}

/// ``base_state`` advanced through empty slots to the first slot of ``target.epoch``.
pub fn get_checkpoint_state<P: Preset>(
    base_state: &BeaconState<P>,
    target: Checkpoint,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BeaconState<P>> {
    let mut state = base_state.clone();
    let target_slot = compute_start_slot_at_epoch::<P>(target.epoch);
    if state.slot < target_slot {
        state.process_slots(target_slot, spec)?;
    }
    Ok(state)
}

/// Start fork choice from a trusted ``anchor_state``, usually the genesis state.
pub fn get_forkchoice_store<P: Preset>(
    anchor_state: BeaconState<P>,
    spec: Arc<BeaconNetworkSpec>,
) -> Store<P> {
    let mut anchor_block_header = anchor_state.latest_block_header.clone();
    if anchor_block_header.state_root == B256::ZERO {
        anchor_block_header.state_root = anchor_state.tree_hash_root();
    }
    let anchor_root = anchor_block_header.tree_hash_root();
    let anchor_epoch = anchor_state.get_current_epoch();
    let justified_checkpoint = Checkpoint {
        epoch: anchor_epoch,
        root: anchor_root,
    };
    let finalized_checkpoint = justified_checkpoint;

    Store {
        time: anchor_state.genesis_time + spec.seconds_per_slot * anchor_state.slot,
        genesis_time: anchor_state.genesis_time,
        justified_checkpoint,
        finalized_checkpoint,
        best_justified_checkpoint: justified_checkpoint,
        blocks: HashMap::from_iter([(anchor_root, anchor_block_header)]),
        block_states: HashMap::from_iter([(anchor_root, anchor_state.clone())]),
        checkpoint_states: HashMap::from_iter([(justified_checkpoint, anchor_state)]),
        latest_messages: HashMap::default(),
        spec,
    }
}

pub fn compute_slots_since_epoch_start<P: Preset>(slot: u64) -> u64 {
    slot - compute_start_slot_at_epoch::<P>(compute_epoch_at_slot::<P>(slot))
}

#[cfg(test)]
pub(crate) mod tests {
    use alloy_primitives::B256;
    use keel_bls::{BLSSignature, PrivateKey, traits::Signable};
    use keel_consensus_beacon::genesis::{genesis_deposits, initialize_beacon_state_from_eth1};
    use keel_consensus_misc::{
        attestation_data::AttestationData,
        constants::DOMAIN_DEPOSIT,
        deposit_data::DepositData,
        misc::{compute_domain, compute_signing_root},
    };
    use keel_network_spec::preset::MinimalPreset;
    use rstest::rstest;
    use ssz_types::BitList;

    use super::*;

    pub(crate) fn private_key(index: u64) -> PrivateKey {
        let mut ikm = [0x17u8; 32];
        ikm[..8].copy_from_slice(&index.to_le_bytes());
        PrivateKey::key_gen(&ikm).expect("key")
    }

    pub(crate) fn genesis_state(count: u64) -> BeaconState<MinimalPreset> {
        let spec = BeaconNetworkSpec::minimal();
        let data = (0..count)
            .map(|index| {
                let key = private_key(index);
                let mut data = DepositData {
                    pubkey: key.public_key().expect("public key"),
                    withdrawal_credentials: B256::ZERO,
                    amount: MinimalPreset::MAX_EFFECTIVE_BALANCE,
                    signature: BLSSignature::infinity(),
                };
                let signing_root = compute_signing_root(
                    &data.to_deposit_message(),
                    compute_domain(DOMAIN_DEPOSIT, None, None, &spec),
                );
                data.signature = key.sign(signing_root.as_slice()).expect("signature");
                data
            })
            .collect::<Vec<_>>();
        let deposits = genesis_deposits(&data).expect("proofs");
        initialize_beacon_state_from_eth1(B256::ZERO, spec.min_genesis_time, &deposits, &spec)
            .expect("genesis")
    }

    pub(crate) fn genesis_store() -> Store<MinimalPreset> {
        get_forkchoice_store(genesis_state(8), BeaconNetworkSpec::minimal())
    }

    /// Insert a block on ``parent`` whose post-state is the parent's state unchanged.
    fn add_block(store: &mut Store<MinimalPreset>, parent: B256, slot: u64, tag: u8) -> B256 {
        let header = BeaconBlockHeader {
            slot,
            proposer_index: ValidatorIndex(0),
            parent_root: parent,
            state_root: B256::repeat_byte(tag),
            body_root: B256::repeat_byte(tag),
        };
        let root = header.tree_hash_root();
        let state = store.block_states[&parent].clone();
        store.blocks.insert(root, header);
        store.block_states.insert(root, state);
        root
    }

    fn vote(store: &mut Store<MinimalPreset>, validators: std::ops::Range<u64>, root: B256) {
        for index in validators {
            store
                .latest_messages
                .insert(ValidatorIndex(index), LatestMessage { epoch: 0, root });
        }
    }

    #[test]
    fn test_anchor_is_head_of_fresh_store() {
        let store = genesis_store();
        assert_eq!(store.get_current_slot(), 0);
        assert_eq!(store.get_head().expect("head"), store.justified_checkpoint.root);
        assert_eq!(
            store.blocks[&store.justified_checkpoint.root].state_root,
            store.block_states[&store.justified_checkpoint.root].tree_hash_root()
        );
    }

    #[test]
    fn test_get_ancestor() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let a = add_block(&mut store, anchor, 1, 0xa1);
        let b = add_block(&mut store, a, 3, 0xb3);

        assert_eq!(store.get_ancestor(b, 3).expect("known"), b);
        // Slot 2 is empty so the walk stops at the closest earlier block
        assert_eq!(store.get_ancestor(b, 2).expect("known"), a);
        assert_eq!(store.get_ancestor(b, 0).expect("known"), anchor);
        assert!(matches!(
            store.get_ancestor(B256::repeat_byte(0xff), 0),
            Err(ForkChoiceError::UnknownBlock(_))
        ));
    }

    #[test]
    fn test_head_follows_heavier_branch() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let x = add_block(&mut store, anchor, 1, 0x01);
        let y = add_block(&mut store, anchor, 1, 0x02);
        vote(&mut store, 0..4, x);
        vote(&mut store, 4..5, y);
        assert_eq!(store.get_head().expect("head"), x);

        vote(&mut store, 0..4, y);
        assert_eq!(store.get_head().expect("head"), y);
    }

    #[test]
    fn test_head_tie_breaks_on_greater_root() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let x = add_block(&mut store, anchor, 1, 0x01);
        let y = add_block(&mut store, anchor, 1, 0x02);
        vote(&mut store, 0..1, x);
        vote(&mut store, 1..2, y);
        assert_eq!(store.get_head().expect("head"), x.max(y));
    }

    #[test]
    fn test_votes_for_descendants_count_for_ancestors() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let x = add_block(&mut store, anchor, 1, 0x01);
        let x2 = add_block(&mut store, x, 2, 0x03);
        let y = add_block(&mut store, anchor, 1, 0x02);
        vote(&mut store, 0..3, x2);
        vote(&mut store, 3..5, y);

        assert_eq!(store.get_latest_attesting_balance(x).expect("weight"), 3 * 32_000_000_000);
        assert_eq!(store.get_head().expect("head"), x2);
    }

    #[test]
    fn test_filter_drops_leaves_disagreeing_with_store_checkpoints() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let x = add_block(&mut store, anchor, 9, 0x01);
        let y = add_block(&mut store, anchor, 9, 0x02);
        let justified = Checkpoint {
            epoch: 1,
            root: anchor,
        };
        store.justified_checkpoint = justified;
        store
            .checkpoint_states
            .insert(justified, store.block_states[&anchor].clone());
        store
            .block_states
            .get_mut(&x)
            .expect("inserted")
            .current_justified_checkpoint = justified;
        // y carries more weight but its state never saw the justification
        vote(&mut store, 0..5, y);

        let tree = store.get_filtered_block_tree().expect("tree");
        assert!(tree.contains_key(&x));
        assert!(!tree.contains_key(&y));
        assert_eq!(store.get_head().expect("head"), x);
    }

    #[test]
    fn test_bouncing_protection_outside_safe_slots() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let fork = add_block(&mut store, anchor, 1, 0x01);
        let canonical = add_block(&mut store, fork, 8, 0x02);
        let conflicting = add_block(&mut store, anchor, 8, 0x03);
        store.justified_checkpoint = Checkpoint {
            epoch: 1,
            root: canonical,
        };

        let descendant = add_block(&mut store, canonical, 17, 0x04);
        let new_descendant = Checkpoint {
            epoch: 2,
            root: descendant,
        };
        let new_conflicting = Checkpoint {
            epoch: 2,
            root: conflicting,
        };

        // Slot 16 is the first slot of epoch 2, inside the safe window
        store.time = store.genesis_time + 16 * store.spec.seconds_per_slot;
        assert!(store.should_update_justified_checkpoint(new_conflicting).expect("known"));

        // Slot 20 is past the safe window
        store.time = store.genesis_time + 20 * store.spec.seconds_per_slot;
        assert!(!store.should_update_justified_checkpoint(new_conflicting).expect("known"));
        assert!(store.should_update_justified_checkpoint(new_descendant).expect("known"));
    }

    fn attestation(slot: u64, target_epoch: u64, root: B256) -> Attestation<MinimalPreset> {
        Attestation {
            aggregation_bits: BitList::with_capacity(1).expect("bits"),
            data: AttestationData {
                slot,
                index: 0,
                beacon_block_root: root,
                source: Checkpoint::default(),
                target: Checkpoint {
                    epoch: target_epoch,
                    root,
                },
            },
            signature: BLSSignature::infinity(),
        }
    }

    #[test]
    fn test_validate_on_attestation() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let block = add_block(&mut store, anchor, 2, 0x01);

        assert!(matches!(
            store.validate_on_attestation(&attestation(2, 0, block)),
            Err(ForkChoiceError::FutureAttestation { .. })
        ));

        store.time = store.genesis_time + 3 * store.spec.seconds_per_slot;
        store
            .validate_on_attestation(&attestation(2, 0, block))
            .expect("valid");
        assert!(matches!(
            store.validate_on_attestation(&attestation(2, 0, B256::repeat_byte(0xee))),
            Err(ForkChoiceError::UnknownBlock(_))
        ));
        // Vote for a block from before its own slot
        assert!(matches!(
            store.validate_on_attestation(&attestation(1, 0, block)),
            Err(ForkChoiceError::Invalid(_))
        ));

        store.time = store.genesis_time + 17 * store.spec.seconds_per_slot;
        assert!(matches!(
            store.validate_on_attestation(&attestation(2, 0, block)),
            Err(ForkChoiceError::Invalid(_))
        ));
    }

    #[test]
    fn test_latest_messages_only_move_forward() {
        let mut store = genesis_store();
        let indices = [ValidatorIndex(1), ValidatorIndex(2)];
        store.update_latest_messages(&indices, &attestation(9, 1, B256::repeat_byte(0x01)));
        store.update_latest_messages(&indices, &attestation(3, 0, B256::repeat_byte(0x02)));
        assert_eq!(
            store.latest_messages[&ValidatorIndex(1)],
            LatestMessage {
                epoch: 1,
                root: B256::repeat_byte(0x01)
            }
        );

        store.update_latest_messages(&indices[..1], &attestation(17, 2, B256::repeat_byte(0x03)));
        assert_eq!(store.latest_messages[&ValidatorIndex(1)].epoch, 2);
        assert_eq!(store.latest_messages[&ValidatorIndex(2)].epoch, 1);
    }

    #[test]
    fn test_checkpoint_state_is_memoized_at_epoch_start() {
        let mut store = genesis_store();
        let anchor = store.justified_checkpoint.root;
        let target = Checkpoint {
            epoch: 1,
            root: anchor,
        };
        store.store_target_checkpoint_state(target).expect("state");
        assert_eq!(store.checkpoint_states[&target].slot, 8);

        assert!(matches!(
            store.store_target_checkpoint_state(Checkpoint {
                epoch: 1,
                root: B256::repeat_byte(0xee),
            }),
            Err(ForkChoiceError::MissingState(_))
        ));
    }

    #[rstest]
    #[case(0, 0)]
    #[case(7, 7)]
    #[case(13, 5)]
    #[case(16, 0)]
    fn test_slots_since_epoch_start(#[case] slot: u64, #[case] expected: u64) {
        assert_eq!(compute_slots_since_epoch_start::<MinimalPreset>(slot), expected);
    }
}
