use keel_bls::BLSSignature;
use keel_consensus_misc::{attestation_data::AttestationData, validator_index::ValidatorIndex};
use keel_network_spec::preset::Preset;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::VariableList;
use tree_hash_derive::TreeHash;

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct IndexedAttestation<P: Preset> {
    pub attesting_indices: VariableList<ValidatorIndex, P::MaxValidatorsPerCommittee>,
    pub data: AttestationData,
    pub signature: BLSSignature,
}
