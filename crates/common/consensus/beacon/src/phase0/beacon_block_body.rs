use alloy_primitives::B256;
use keel_bls::BLSSignature;
use keel_consensus_misc::eth_1_data::Eth1Data;
use keel_network_spec::preset::Preset;
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::VariableList;
use tree_hash_derive::TreeHash;

use crate::{
    attestation::Attestation, attester_slashing::AttesterSlashing, deposit::Deposit,
    proposer_slashing::ProposerSlashing, voluntary_exit::SignedVoluntaryExit,
};

#[derive(
    Debug, PartialEq, Eq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash, Default,
)]
#[serde(bound = "P: Preset")]
pub struct BeaconBlockBody<P: Preset> {
    pub randao_reveal: BLSSignature,

    /// Eth1 data vote
    pub eth1_data: Eth1Data,

    /// Arbitrary data
    pub graffiti: B256,

    // Operations
    pub proposer_slashings: VariableList<ProposerSlashing, P::MaxProposerSlashings>,
    pub attester_slashings: VariableList<AttesterSlashing<P>, P::MaxAttesterSlashings>,
    pub attestations: VariableList<Attestation<P>, P::MaxAttestations>,
    pub deposits: VariableList<Deposit, P::MaxDeposits>,
    pub voluntary_exits: VariableList<SignedVoluntaryExit, P::MaxVoluntaryExits>,
}

/// A single operation carried by a block body.
#[derive(Debug, Clone, Copy)]
pub enum BlockOperation<'a, P: Preset> {
    ProposerSlashing(&'a ProposerSlashing),
    AttesterSlashing(&'a AttesterSlashing<P>),
    Attestation(&'a Attestation<P>),
    Deposit(&'a Deposit),
    VoluntaryExit(&'a SignedVoluntaryExit),
}

impl<P: Preset> BeaconBlockBody<P> {
    /// Operations in processing order: proposer slashings, attester slashings, attestations,
    /// deposits, then voluntary exits. Within a kind, list order is kept.
    pub fn operations(&self) -> impl Iterator<Item = BlockOperation<'_, P>> {
        self.proposer_slashings
            .iter()
            .map(BlockOperation::ProposerSlashing)
            .chain(
                self.attester_slashings
                    .iter()
                    .map(BlockOperation::AttesterSlashing),
            )
            .chain(self.attestations.iter().map(BlockOperation::Attestation))
            .chain(self.deposits.iter().map(BlockOperation::Deposit))
            .chain(self.voluntary_exits.iter().map(BlockOperation::VoluntaryExit))
    }
}

#[cfg(test)]
mod tests {
    use keel_consensus_misc::{
        attestation_data::AttestationData, beacon_block_header::SignedBeaconBlockHeader,
        validator_index::ValidatorIndex,
    };
    use keel_network_spec::preset::MinimalPreset;
    use ssz_types::BitList;

    use super::*;
    use crate::voluntary_exit::VoluntaryExit;

    fn kind(operation: &BlockOperation<'_, MinimalPreset>) -> &'static str {
        match operation {
            BlockOperation::ProposerSlashing(_) => "proposer_slashing",
            BlockOperation::AttesterSlashing(_) => "attester_slashing",
            BlockOperation::Attestation(_) => "attestation",
            BlockOperation::Deposit(_) => "deposit",
            BlockOperation::VoluntaryExit(_) => "voluntary_exit",
        }
    }

    #[test]
    fn test_operations_follow_processing_order() {
        let header = SignedBeaconBlockHeader {
            message: Default::default(),
            signature: BLSSignature::infinity(),
        };
        let exit = SignedVoluntaryExit {
            message: VoluntaryExit {
                epoch: 0,
                validator_index: ValidatorIndex(3),
            },
            signature: BLSSignature::infinity(),
        };
        let attestation = Attestation::<MinimalPreset> {
            aggregation_bits: BitList::with_capacity(4).expect("capacity within bounds"),
            data: AttestationData::default(),
            signature: BLSSignature::infinity(),
        };

        let body = BeaconBlockBody::<MinimalPreset> {
            proposer_slashings: vec![ProposerSlashing {
                signed_header_1: header.clone(),
                signed_header_2: header,
            }]
            .into(),
            attestations: vec![attestation.clone(), attestation].into(),
            voluntary_exits: vec![exit].into(),
            ..Default::default()
        };

        let kinds = body.operations().map(|op| kind(&op)).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![
                "proposer_slashing",
                "attestation",
                "attestation",
                "voluntary_exit"
            ]
        );
    }

    #[test]
    fn test_empty_body_has_no_operations() {
        let body = BeaconBlockBody::<MinimalPreset>::default();
        assert_eq!(body.operations().count(), 0);
    }
}
