//! Deterministic building blocks for driving a chain end to end: validator keys, a genesis state
//! made from real deposits, and signed blocks and attestations from the right validators.

use std::{marker::PhantomData, sync::Arc};

use alloy_primitives::B256;
use anyhow::{anyhow, ensure};
use keel_bls::{BLSSignature, PrivateKey, traits::Signable};
use keel_consensus_beacon::{
    attestation::Attestation,
    deposit::Deposit,
    genesis::{genesis_deposits, initialize_beacon_state_from_eth1},
    phase0::{
        beacon_block::{BeaconBlock, SignedBeaconBlock},
        beacon_block_body::BeaconBlockBody,
        beacon_state::BeaconState,
    },
    proposer_slashing::ProposerSlashing,
    validator_signing::{
        get_aggregate_signature, get_attestation_signature, get_epoch_signature, sign_beacon_block,
    },
};
use keel_consensus_misc::{
    attestation_data::AttestationData,
    beacon_block_header::{BeaconBlockHeader, SignedBeaconBlockHeader},
    checkpoint::Checkpoint,
    constants::{DOMAIN_BEACON_PROPOSER, DOMAIN_DEPOSIT},
    deposit_data::DepositData,
    misc::{
        compute_domain, compute_epoch_at_slot, compute_signing_root, compute_start_slot_at_epoch,
    },
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use ssz_types::{BitList, VariableList};
use tree_hash::TreeHash;

/// Eth1 block hash the harness genesis is built on.
pub const GENESIS_ETH1_BLOCK_HASH: B256 = B256::repeat_byte(0x42);

/// Deterministic key for validator ``index``.
pub fn private_key(index: u64) -> anyhow::Result<PrivateKey> {
    let mut ikm = [0x5eu8; 32];
    ikm[..8].copy_from_slice(&index.to_le_bytes());
    Ok(PrivateKey::key_gen(&ikm)?)
}

/// Root of the block a state was last advanced past, with the state root filled in the way
/// ``process_slot`` would.
pub fn latest_block_root<P: Preset>(state: &BeaconState<P>) -> B256 {
    let mut header = state.latest_block_header.clone();
    if header.state_root == B256::ZERO {
        header.state_root = state.tree_hash_root();
    }
    header.tree_hash_root()
}

pub struct Harness<P: Preset> {
    pub spec: Arc<BeaconNetworkSpec>,
    pub validator_count: u64,
    _preset: PhantomData<P>,
}

impl<P: Preset> Harness<P> {
    pub fn new(spec: Arc<BeaconNetworkSpec>, validator_count: u64) -> Self {
        Self {
            spec,
            validator_count,
            _preset: PhantomData,
        }
    }

    /// A deposit of ``amount`` for validator ``index``, signed with its own key.
    pub fn deposit_data(&self, index: u64, amount: u64) -> anyhow::Result<DepositData> {
        let key = private_key(index)?;
        let mut data = DepositData {
            pubkey: key.public_key()?,
            withdrawal_credentials: B256::left_padding_from(&index.to_be_bytes()),
            amount,
            signature: BLSSignature::infinity(),
        };
        let signing_root = compute_signing_root(
            &data.to_deposit_message(),
            compute_domain(DOMAIN_DEPOSIT, None, None, &self.spec),
        );
        data.signature = key.sign(signing_root.as_slice())?;
        Ok(data)
    }

    pub fn genesis_deposit_data(&self) -> anyhow::Result<Vec<DepositData>> {
        (0..self.validator_count)
            .map(|index| self.deposit_data(index, P::MAX_EFFECTIVE_BALANCE))
            .collect()
    }

    pub fn genesis_deposits(&self) -> anyhow::Result<Vec<Deposit>> {
        genesis_deposits(&self.genesis_deposit_data()?)
    }

    /// Genesis state with every harness validator active from epoch 0.
    pub fn genesis_state(&self) -> anyhow::Result<BeaconState<P>> {
        let state = initialize_beacon_state_from_eth1(
            GENESIS_ETH1_BLOCK_HASH,
            self.spec.min_genesis_time,
            &self.genesis_deposits()?,
            &self.spec,
        )?;
        ensure!(
            state.validators.len() as u64 == self.validator_count,
            "Genesis holds {} validators, expected {}",
            state.validators.len(),
            self.validator_count
        );
        Ok(state)
    }

    pub fn time_at_slot(&self, state: &BeaconState<P>, slot: u64) -> u64 {
        state.genesis_time + slot * self.spec.seconds_per_slot
    }

    /// An empty block on top of ``parent_state`` at ``slot``.
    pub fn build_block(
        &self,
        parent_state: &BeaconState<P>,
        slot: u64,
    ) -> anyhow::Result<(SignedBeaconBlock<P>, BeaconState<P>)> {
        self.build_block_with_body(parent_state, slot, BeaconBlockBody::default())
    }

    /// A block carrying ``attestations`` on top of ``parent_state`` at ``slot``.
    pub fn build_block_with_attestations(
        &self,
        parent_state: &BeaconState<P>,
        slot: u64,
        attestations: Vec<Attestation<P>>,
    ) -> anyhow::Result<(SignedBeaconBlock<P>, BeaconState<P>)> {
        let body = BeaconBlockBody {
            attestations: VariableList::new(attestations)
                .map_err(|err| anyhow!("Too many attestations: {err:?}"))?,
            ..Default::default()
        };
        self.build_block_with_body(parent_state, slot, body)
    }

    /// Signs a block with ``body`` the way its proposer would: randao reveal, the parent's eth1
    /// vote unless ``body`` already carries one, the post-state root and the block signature.
    /// Returns the block with its post-state.
    pub fn build_block_with_body(
        &self,
        parent_state: &BeaconState<P>,
        slot: u64,
        body: BeaconBlockBody<P>,
    ) -> anyhow::Result<(SignedBeaconBlock<P>, BeaconState<P>)> {
        let mut state = parent_state.clone();
        state.process_slots(slot, &self.spec)?;
        let proposer_index = state.get_beacon_proposer_index()?;
        let key = private_key(proposer_index.0)?;

        let mut block = BeaconBlock {
            slot,
            proposer_index,
            parent_root: latest_block_root(&state),
            state_root: B256::ZERO,
            body,
        };
        if block.body.eth1_data.block_hash == B256::ZERO {
            block.body.eth1_data = state.eth1_data.clone();
        }
        block.body.randao_reveal = get_epoch_signature(&state, &block, &key, &self.spec)?;
        block.state_root = parent_state.compute_new_state_root(&block, &self.spec)?;
        let signed_block = sign_beacon_block(&state, block, &key, &self.spec)?;

        let mut post_state = parent_state.clone();
        post_state.state_transition(&signed_block, true, &self.spec)?;
        Ok((signed_block, post_state))
    }

    /// Attestations of every committee at ``slot`` voting for ``head_root``, signed by the members
    /// ``participates`` selects. ``state`` is the post-state of the head block, at ``slot``.
    pub fn build_attestations(
        &self,
        state: &BeaconState<P>,
        slot: u64,
        head_root: B256,
        participates: impl Fn(ValidatorIndex) -> bool,
    ) -> anyhow::Result<Vec<Attestation<P>>> {
        let epoch = compute_epoch_at_slot::<P>(slot);
        let epoch_start_slot = compute_start_slot_at_epoch::<P>(epoch);
        let target_root = if epoch_start_slot == slot {
            head_root
        } else {
            state.get_block_root_at_slot(epoch_start_slot)?
        };
        let source = if epoch == state.get_current_epoch() {
            state.current_justified_checkpoint
        } else {
            state.previous_justified_checkpoint
        };

        let mut attestations = vec![];
        for index in 0..state.get_committee_count_at_slot(slot) {
            let data = AttestationData {
                slot,
                index,
                beacon_block_root: head_root,
                source,
                target: Checkpoint {
                    epoch,
                    root: target_root,
                },
            };
            let committee = state.get_beacon_committee(slot, index)?;
            let mut aggregation_bits = BitList::with_capacity(committee.len())
                .map_err(|err| anyhow!("Invalid committee size: {err:?}"))?;
            let mut singles: Vec<Attestation<P>> = vec![];
            for (position, validator_index) in committee.into_iter().enumerate() {
                if !participates(validator_index) {
                    continue;
                }
                aggregation_bits
                    .set(position, true)
                    .map_err(|err| anyhow!("Invalid committee position: {err:?}"))?;
                singles.push(Attestation {
                    aggregation_bits: BitList::with_capacity(1)
                        .map_err(|err| anyhow!("Invalid bitlist: {err:?}"))?,
                    data: data.clone(),
                    signature: get_attestation_signature(
                        state,
                        &data,
                        &private_key(validator_index.0)?,
                        &self.spec,
                    )?,
                });
            }
            if singles.is_empty() {
                continue;
            }
            attestations.push(Attestation {
                aggregation_bits,
                signature: get_aggregate_signature(&singles)?,
                data,
            });
        }
        Ok(attestations)
    }

    /// A pair of conflicting headers for ``proposer_index`` at ``slot``, both signed.
    pub fn build_proposer_slashing(
        &self,
        state: &BeaconState<P>,
        proposer_index: ValidatorIndex,
        slot: u64,
    ) -> anyhow::Result<ProposerSlashing> {
        let key = private_key(proposer_index.0)?;
        let domain = state.get_domain(
            DOMAIN_BEACON_PROPOSER,
            Some(compute_epoch_at_slot::<P>(slot)),
            &self.spec,
        );
        let sign_header = |body_byte: u8| -> anyhow::Result<SignedBeaconBlockHeader> {
            let message = BeaconBlockHeader {
                slot,
                proposer_index,
                parent_root: B256::repeat_byte(0x01),
                state_root: B256::repeat_byte(0x02),
                body_root: B256::repeat_byte(body_byte),
            };
            let signature = key.sign(compute_signing_root(&message, domain).as_slice())?;
            Ok(SignedBeaconBlockHeader { message, signature })
        };
        Ok(ProposerSlashing {
            signed_header_1: sign_header(0x03)?,
            signed_header_2: sign_header(0x04)?,
        })
    }
}
