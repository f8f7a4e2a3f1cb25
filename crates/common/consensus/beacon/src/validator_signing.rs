use std::cmp::max;

use anyhow::ensure;
use ethereum_hashing::hash;
use keel_bls::{
    BLSSignature, PrivateKey,
    traits::{Aggregatable, Signable},
};
use keel_consensus_misc::{
    attestation_data::AttestationData,
    constants::{
        DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER, DOMAIN_RANDAO, DOMAIN_SELECTION_PROOF,
        TARGET_AGGREGATORS_PER_COMMITTEE,
    },
    misc::{
        bytes_to_int, compute_epoch_at_slot, compute_signing_root, compute_start_slot_at_epoch,
    },
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};

use crate::{
    attestation::Attestation,
    phase0::{
        beacon_block::{BeaconBlock, SignedBeaconBlock},
        beacon_state::BeaconState,
    },
};

/// Where a validator attests during an epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitteeAssignment {
    pub committee: Vec<ValidatorIndex>,
    pub committee_index: u64,
    pub slot: u64,
}

pub fn check_if_validator_active<P: Preset>(
    state: &BeaconState<P>,
    validator_index: ValidatorIndex,
) -> bool {
    state
        .validators
        .get(validator_index.as_usize())
        .is_some_and(|validator| validator.is_active_validator(state.get_current_epoch()))
}

/// Return the committee assignment in the ``epoch`` for ``validator_index``, or ``None`` if the
/// validator is not assigned. ``epoch`` must be at most one past the state's current epoch.
pub fn get_committee_assignment<P: Preset>(
    state: &BeaconState<P>,
    epoch: u64,
    validator_index: ValidatorIndex,
) -> anyhow::Result<Option<CommitteeAssignment>> {
    let next_epoch = state.get_current_epoch() + 1;
    ensure!(
        epoch <= next_epoch,
        "Committee assignment requested for epoch {epoch} beyond next epoch {next_epoch}"
    );

    let start_slot = compute_start_slot_at_epoch::<P>(epoch);
    let committee_count_per_slot = state.get_committee_count_per_slot(epoch);
    for slot in start_slot..start_slot + P::SLOTS_PER_EPOCH {
        for committee_index in 0..committee_count_per_slot {
            let committee = state.get_beacon_committee(slot, committee_index)?;
            if committee.contains(&validator_index) {
                return Ok(Some(CommitteeAssignment {
                    committee,
                    committee_index,
                    slot,
                }));
            }
        }
    }

    Ok(None)
}

pub fn is_proposer<P: Preset>(
    state: &BeaconState<P>,
    validator_index: ValidatorIndex,
) -> anyhow::Result<bool> {
    Ok(state.get_beacon_proposer_index()? == validator_index)
}

pub fn compute_time_at_slot<P: Preset>(
    state: &BeaconState<P>,
    slot: u64,
    spec: &BeaconNetworkSpec,
) -> u64 {
    state.genesis_time + slot * spec.seconds_per_slot
}

/// The RANDAO reveal for the epoch of ``block``.
pub fn get_epoch_signature<P: Preset>(
    state: &BeaconState<P>,
    block: &BeaconBlock<P>,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BLSSignature> {
    let epoch = compute_epoch_at_slot::<P>(block.slot);
    let domain = state.get_domain(DOMAIN_RANDAO, Some(epoch), spec);
    let signing_root = compute_signing_root(&epoch, domain);
    Ok(private_key.sign(signing_root.as_slice())?)
}

pub fn get_block_signature<P: Preset>(
    state: &BeaconState<P>,
    block: &BeaconBlock<P>,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BLSSignature> {
    let domain = state.get_domain(
        DOMAIN_BEACON_PROPOSER,
        Some(compute_epoch_at_slot::<P>(block.slot)),
        spec,
    );
    let signing_root = compute_signing_root(block, domain);
    Ok(private_key.sign(signing_root.as_slice())?)
}

pub fn sign_beacon_block<P: Preset>(
    state: &BeaconState<P>,
    block: BeaconBlock<P>,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<SignedBeaconBlock<P>> {
    let signature = get_block_signature(state, &block, private_key, spec)?;
    Ok(SignedBeaconBlock {
        message: block,
        signature,
    })
}

pub fn get_attestation_signature<P: Preset>(
    state: &BeaconState<P>,
    attestation_data: &AttestationData,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BLSSignature> {
    let domain = state.get_domain(
        DOMAIN_BEACON_ATTESTER,
        Some(attestation_data.target.epoch),
        spec,
    );
    let signing_root = compute_signing_root(attestation_data, domain);
    Ok(private_key.sign(signing_root.as_slice())?)
}

/// The selection proof used to decide whether a validator aggregates for ``slot``.
pub fn get_slot_signature<P: Preset>(
    state: &BeaconState<P>,
    slot: u64,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BLSSignature> {
    let domain = state.get_domain(
        DOMAIN_SELECTION_PROOF,
        Some(compute_epoch_at_slot::<P>(slot)),
        spec,
    );
    let signing_root = compute_signing_root(&slot, domain);
    Ok(private_key.sign(signing_root.as_slice())?)
}

pub fn is_aggregator<P: Preset>(
    state: &BeaconState<P>,
    slot: u64,
    committee_index: u64,
    slot_signature: &BLSSignature,
) -> anyhow::Result<bool> {
    let committee = state.get_beacon_committee(slot, committee_index)?;
    let modulo = max(
        1,
        committee.len() as u64 / TARGET_AGGREGATORS_PER_COMMITTEE,
    );
    Ok(bytes_to_int(&hash(slot_signature.to_bytes())[..8]) % modulo == 0)
}

pub fn get_aggregate_signature<P: Preset>(
    attestations: &[Attestation<P>],
) -> anyhow::Result<BLSSignature> {
    let signatures = attestations
        .iter()
        .map(|attestation| &attestation.signature)
        .collect::<Vec<_>>();
    Ok(BLSSignature::aggregate(&signatures)?)
}
