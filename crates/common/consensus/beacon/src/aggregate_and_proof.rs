use keel_bls::{BLSSignature, PrivateKey, traits::Signable};
use keel_consensus_misc::{
    constants::DOMAIN_AGGREGATE_AND_PROOF,
    misc::{compute_epoch_at_slot, compute_signing_root},
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use tree_hash_derive::TreeHash;

use crate::{
    attestation::Attestation, phase0::beacon_state::BeaconState,
    validator_signing::get_slot_signature,
};

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct AggregateAndProof<P: Preset> {
    pub aggregator_index: ValidatorIndex,
    pub aggregate: Attestation<P>,
    pub selection_proof: BLSSignature,
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct SignedAggregateAndProof<P: Preset> {
    pub message: AggregateAndProof<P>,
    pub signature: BLSSignature,
}

pub fn get_aggregate_and_proof<P: Preset>(
    state: &BeaconState<P>,
    aggregator_index: ValidatorIndex,
    aggregate: Attestation<P>,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<AggregateAndProof<P>> {
    Ok(AggregateAndProof {
        selection_proof: get_slot_signature(state, aggregate.data.slot, private_key, spec)?,
        aggregator_index,
        aggregate,
    })
}

pub fn get_aggregate_and_proof_signature<P: Preset>(
    state: &BeaconState<P>,
    aggregate_and_proof: &AggregateAndProof<P>,
    private_key: &PrivateKey,
    spec: &BeaconNetworkSpec,
) -> anyhow::Result<BLSSignature> {
    let domain = state.get_domain(
        DOMAIN_AGGREGATE_AND_PROOF,
        Some(compute_epoch_at_slot::<P>(
            aggregate_and_proof.aggregate.data.slot,
        )),
        spec,
    );
    let signing_root = compute_signing_root(aggregate_and_proof, domain);
    Ok(private_key.sign(signing_root.as_slice())?)
}
