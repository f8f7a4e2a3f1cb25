use alloy_primitives::B256;
use keel_bls::{BLSSignature, PrivateKey, traits::Signable};
use keel_consensus_misc::{
    beacon_block_header::BeaconBlockHeader, checkpoint::Checkpoint, eth_1_data::Eth1Data,
    fork::Fork, validator::Validator,
};
use keel_network_spec::{
    networks::BeaconNetworkSpec,
    preset::{MinimalPreset, Preset},
};
use ssz_types::{BitVector, FixedVector, VariableList};

use crate::phase0::beacon_state::BeaconState;

/// Deterministic key for validator ``index``.
pub fn private_key(index: u64) -> PrivateKey {
    let mut ikm = [0x42u8; 32];
    ikm[..8].copy_from_slice(&index.to_le_bytes());
    PrivateKey::key_gen(&ikm).expect("key generation from 32 bytes of ikm")
}

pub fn sign(index: u64, signing_root: B256) -> BLSSignature {
    private_key(index)
        .sign(signing_root.as_slice())
        .expect("signing with a valid key")
}

/// A state at slot 0 holding ``count`` validators active since genesis, each with the maximum
/// effective balance and a key from [`private_key`].
pub fn state_with_validators<P: Preset>(count: usize) -> BeaconState<P> {
    let spec = BeaconNetworkSpec::minimal();
    let validators = (0..count as u64)
        .map(|index| Validator {
            pubkey: private_key(index)
                .public_key()
                .expect("public key of a valid secret"),
            withdrawal_credentials: B256::repeat_byte(index as u8),
            effective_balance: P::MAX_EFFECTIVE_BALANCE,
            slashed: false,
            activation_eligibility_epoch: 0,
            activation_epoch: 0,
            exit_epoch: u64::MAX,
            withdrawable_epoch: u64::MAX,
        })
        .collect::<Vec<_>>();

    BeaconState {
        genesis_time: spec.min_genesis_time,
        genesis_validators_root: B256::repeat_byte(0x99),
        slot: 0,
        fork: Fork {
            previous_version: spec.genesis_fork_version,
            current_version: spec.genesis_fork_version,
            epoch: 0,
        },
        latest_block_header: BeaconBlockHeader::default(),
        block_roots: FixedVector::default(),
        state_roots: FixedVector::default(),
        historical_roots: VariableList::default(),
        eth1_data: Eth1Data::default(),
        eth1_data_votes: VariableList::default(),
        eth1_deposit_index: 0,
        validators: VariableList::new(validators).expect("registry limit"),
        balances: VariableList::new(vec![P::MAX_EFFECTIVE_BALANCE; count])
            .expect("registry limit"),
        randao_mixes: FixedVector::from_elem(B256::repeat_byte(0x5a)),
        slashings: FixedVector::default(),
        previous_epoch_attestations: VariableList::default(),
        current_epoch_attestations: VariableList::default(),
        justification_bits: BitVector::new(),
        previous_justified_checkpoint: Checkpoint::default(),
        current_justified_checkpoint: Checkpoint::default(),
        finalized_checkpoint: Checkpoint::default(),
    }
}

pub fn minimal_state(count: usize) -> BeaconState<MinimalPreset> {
    state_with_validators::<MinimalPreset>(count)
}
