use std::collections::HashSet;

use alloy_primitives::B256;
use anyhow::{anyhow, bail, ensure};
use ethereum_hashing::hash_fixed;
use itertools::Itertools;
use keel_bls::traits::Verifiable;
use keel_consensus_misc::{
    beacon_block_header::BeaconBlockHeader,
    constants::{
        DEPOSIT_CONTRACT_TREE_DEPTH, DOMAIN_BEACON_PROPOSER, DOMAIN_DEPOSIT, DOMAIN_RANDAO,
        DOMAIN_VOLUNTARY_EXIT, FAR_FUTURE_EPOCH,
    },
    deposit_data::DepositData,
    misc::{compute_domain, compute_epoch_at_slot, compute_signing_root, xor},
    validator::Validator,
    validator_index::ValidatorIndex,
};
use keel_merkle::is_valid_merkle_branch;
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use tracing::warn;
use tree_hash::TreeHash;

use super::{
    beacon_block::BeaconBlock,
    beacon_block_body::{BeaconBlockBody, BlockOperation},
    beacon_state::BeaconState,
};
use crate::{
    attestation::Attestation, attester_slashing::AttesterSlashing, deposit::Deposit,
    pending_attestation::PendingAttestation, proposer_slashing::ProposerSlashing,
    voluntary_exit::SignedVoluntaryExit,
};

/// What applying a deposit did to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositOutcome {
    /// A new validator was appended at this index.
    Added(ValidatorIndex),
    /// The deposit topped up the balance of an existing validator.
    ToppedUp(ValidatorIndex),
    /// The proof of possession of a new public key did not verify. The deposit is consumed
    /// without touching the registry.
    RejectedSignature,
}

impl<P: Preset> BeaconState<P> {
    pub fn process_block(
        &mut self,
        block: &BeaconBlock<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        self.process_block_header(block)?;
        self.process_randao(&block.body, spec)?;
        self.process_eth1_data(&block.body)?;
        self.process_operations(&block.body, spec)?;
        Ok(())
    }

    pub fn process_block_header(&mut self, block: &BeaconBlock<P>) -> anyhow::Result<()> {
        // Verify that the slots match
        ensure!(
            self.slot == block.slot,
            "State slot {} must be equal to block slot {}",
            self.slot,
            block.slot
        );
        // Verify that proposer index is the correct index
        ensure!(
            block.proposer_index == self.get_beacon_proposer_index()?,
            "Block proposer index must be equal to beacon proposer index"
        );
        // Verify that the parent matches
        ensure!(
            block.parent_root == self.latest_block_header.tree_hash_root(),
            "Block parent root must be equal to the root of the latest block header"
        );

        // Cache current block as the new latest block
        self.latest_block_header = BeaconBlockHeader {
            slot: block.slot,
            proposer_index: block.proposer_index,
            parent_root: block.parent_root,
            // Overwritten in the next process_slot call
            state_root: B256::ZERO,
            body_root: block.body.tree_hash_root(),
        };

        // Verify proposer is not slashed
        let Some(proposer) = self.validators.get(block.proposer_index.as_usize()) else {
            bail!("Block proposer {} not found", block.proposer_index)
        };
        ensure!(!proposer.slashed, "Block proposer must not be slashed");

        Ok(())
    }

    pub fn process_randao(
        &mut self,
        body: &BeaconBlockBody<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let epoch = self.get_current_epoch();

        // Verify RANDAO reveal
        let proposer_index = self.get_beacon_proposer_index()?;
        let Some(proposer) = self.validators.get(proposer_index.as_usize()) else {
            bail!("Proposer {proposer_index} not found")
        };
        let signing_root =
            compute_signing_root(&epoch, self.get_domain(DOMAIN_RANDAO, Some(epoch), spec));
        ensure!(
            body.randao_reveal
                .verify(&proposer.pubkey, signing_root.as_slice())
                .unwrap_or(false),
            "RANDAO reveal verification failed"
        );

        // Mix in RANDAO reveal
        let mix = xor(
            self.get_randao_mix(epoch),
            B256::from(hash_fixed(body.randao_reveal.to_bytes())),
        );
        self.randao_mixes[(epoch % P::epochs_per_historical_vector()) as usize] = mix;

        Ok(())
    }

    pub fn process_eth1_data(&mut self, body: &BeaconBlockBody<P>) -> anyhow::Result<()> {
        self.eth1_data_votes
            .push(body.eth1_data.clone())
            .map_err(|err| anyhow!("Can't push eth1_data {err:?}"))?;

        let count = self
            .eth1_data_votes
            .iter()
            .filter(|data| **data == body.eth1_data)
            .count() as u64;

        if count * 2 > P::EPOCHS_PER_ETH1_VOTING_PERIOD * P::SLOTS_PER_EPOCH {
            self.eth1_data = body.eth1_data.clone();
        }

        Ok(())
    }

    pub fn process_operations(
        &mut self,
        body: &BeaconBlockBody<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        // Verify that outstanding deposits are processed up to the maximum number of deposits
        let outstanding_deposits = self
            .eth1_data
            .deposit_count
            .saturating_sub(self.eth1_deposit_index);
        ensure!(
            body.deposits.len() as u64 == P::max_deposits().min(outstanding_deposits),
            "Block must include {} deposits, found {}",
            P::max_deposits().min(outstanding_deposits),
            body.deposits.len()
        );

        for operation in body.operations() {
            self.process_operation(operation, spec)?;
        }

        Ok(())
    }

    pub fn process_operation(
        &mut self,
        operation: BlockOperation<'_, P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        match operation {
            BlockOperation::ProposerSlashing(proposer_slashing) => {
                self.process_proposer_slashing(proposer_slashing, spec)
            }
            BlockOperation::AttesterSlashing(attester_slashing) => {
                self.process_attester_slashing(attester_slashing, spec)
            }
            BlockOperation::Attestation(attestation) => {
                self.process_attestation(attestation, spec)
            }
            BlockOperation::Deposit(deposit) => self.process_deposit(deposit, spec).map(|_| ()),
            BlockOperation::VoluntaryExit(voluntary_exit) => {
                self.process_voluntary_exit(voluntary_exit, spec)
            }
        }
    }

    pub fn process_proposer_slashing(
        &mut self,
        proposer_slashing: &ProposerSlashing,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let header_1 = &proposer_slashing.signed_header_1.message;
        let header_2 = &proposer_slashing.signed_header_2.message;

        // Verify header slots match
        ensure!(header_1.slot == header_2.slot, "Header slots must match");

        // Verify header proposer indices match
        ensure!(
            header_1.proposer_index == header_2.proposer_index,
            "Proposer indices must match"
        );

        // Verify the headers are different
        ensure!(header_1 != header_2, "Headers must be different");

        // Verify the proposer is slashable
        let proposer_index = header_1.proposer_index;
        let Some(proposer) = self.validators.get(proposer_index.as_usize()) else {
            bail!("Proposer {proposer_index} not found")
        };
        ensure!(
            proposer.is_slashable_validator(self.get_current_epoch()),
            "Proposer {proposer_index} is not slashable"
        );

        // Verify signatures
        for signed_header in [
            &proposer_slashing.signed_header_1,
            &proposer_slashing.signed_header_2,
        ] {
            let domain = self.get_domain(
                DOMAIN_BEACON_PROPOSER,
                Some(compute_epoch_at_slot::<P>(signed_header.message.slot)),
                spec,
            );
            let signing_root = compute_signing_root(&signed_header.message, domain);
            ensure!(
                signed_header
                    .signature
                    .verify(&proposer.pubkey, signing_root.as_slice())
                    .unwrap_or(false),
                "Proposer slashing header signature verification failed"
            );
        }

        self.slash_validator(proposer_index, None, spec)
    }

    pub fn process_attester_slashing(
        &mut self,
        attester_slashing: &AttesterSlashing<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let attestation_1 = &attester_slashing.attestation_1;
        let attestation_2 = &attester_slashing.attestation_2;

        // Ensure the two attestations are slashable
        ensure!(
            attestation_1
                .data
                .is_slashable_attestation_data(&attestation_2.data),
            "Attestations are not slashable"
        );

        // Validate both attestations
        ensure!(
            self.is_valid_indexed_attestation(attestation_1, spec)?,
            "First attestation is invalid"
        );
        ensure!(
            self.is_valid_indexed_attestation(attestation_2, spec)?,
            "Second attestation is invalid"
        );

        let current_epoch = self.get_current_epoch();
        let indices_1: HashSet<_> = attestation_1.attesting_indices.iter().copied().collect();
        let indices_2: HashSet<_> = attestation_2.attesting_indices.iter().copied().collect();

        let mut slashed_any = false;

        // Find common attesting indices and process slashing
        for &index in indices_1.intersection(&indices_2).sorted() {
            let slashable = self
                .validators
                .get(index.as_usize())
                .is_some_and(|validator| validator.is_slashable_validator(current_epoch));
            if slashable {
                self.slash_validator(index, None, spec)?;
                slashed_any = true;
            }
        }

        ensure!(slashed_any, "No validator was slashed");

        Ok(())
    }

    pub fn process_attestation(
        &mut self,
        attestation: &Attestation<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let data = &attestation.data;
        ensure!(
            data.index < self.get_committee_count_at_slot(data.slot),
            "Committee index {} out of range for slot {}",
            data.index,
            data.slot
        );
        ensure!(
            data.target.epoch == self.get_previous_epoch()
                || data.target.epoch == self.get_current_epoch(),
            "Target epoch must be the previous or current epoch"
        );
        ensure!(
            data.target.epoch == compute_epoch_at_slot::<P>(data.slot),
            "Target epoch must match the epoch of the attested slot"
        );
        ensure!(
            data.slot + P::MIN_ATTESTATION_INCLUSION_DELAY <= self.slot,
            "Attestation for slot {} included too early at slot {}",
            data.slot,
            self.slot
        );
        ensure!(
            self.slot <= data.slot + P::SLOTS_PER_EPOCH,
            "Attestation for slot {} included too late at slot {}",
            data.slot,
            self.slot
        );

        let committee = self.get_beacon_committee(data.slot, data.index)?;
        ensure!(
            attestation.aggregation_bits.len() == committee.len(),
            "Aggregation bits length {} must equal committee size {}",
            attestation.aggregation_bits.len(),
            committee.len()
        );

        let pending_attestation = PendingAttestation {
            aggregation_bits: attestation.aggregation_bits.clone(),
            data: data.clone(),
            inclusion_delay: self.slot - data.slot,
            proposer_index: self.get_beacon_proposer_index()?,
        };

        if data.target.epoch == self.get_current_epoch() {
            ensure!(
                data.source == self.current_justified_checkpoint,
                "Attestation source must be the current justified checkpoint"
            );
            self.current_epoch_attestations
                .push(pending_attestation)
                .map_err(|err| anyhow!("Couldn't push to current_epoch_attestations {err:?}"))?;
        } else {
            ensure!(
                data.source == self.previous_justified_checkpoint,
                "Attestation source must be the previous justified checkpoint"
            );
            self.previous_epoch_attestations
                .push(pending_attestation)
                .map_err(|err| anyhow!("Couldn't push to previous_epoch_attestations {err:?}"))?;
        }

        // Verify signature
        ensure!(
            self.is_valid_indexed_attestation(&self.get_indexed_attestation(attestation)?, spec)?,
            "Attestation signature is invalid"
        );

        Ok(())
    }

    pub fn process_deposit(
        &mut self,
        deposit: &Deposit,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<DepositOutcome> {
        // Verify the Merkle branch
        ensure!(
            is_valid_merkle_branch(
                deposit.data.tree_hash_root(),
                &deposit.proof,
                // Add 1 for the List length mix-in
                DEPOSIT_CONTRACT_TREE_DEPTH + 1,
                self.eth1_deposit_index,
                self.eth1_data.deposit_root,
            ),
            "Deposit {} has an invalid Merkle proof",
            self.eth1_deposit_index
        );

        // Deposits must be processed in order
        self.eth1_deposit_index += 1;

        self.apply_deposit(&deposit.data, spec)
    }

    pub fn apply_deposit(
        &mut self,
        deposit_data: &DepositData,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<DepositOutcome> {
        if let Some(index) = self
            .validators
            .iter()
            .position(|validator| validator.pubkey == deposit_data.pubkey)
        {
            let index = ValidatorIndex::from(index);
            self.increase_balance(index, deposit_data.amount)?;
            return Ok(DepositOutcome::ToppedUp(index));
        }

        // Verify the deposit signature (proof of possession) which is not checked by the deposit
        // contract. Deposits are valid across forks, thus the genesis fork version is used.
        let signing_root = compute_signing_root(
            &deposit_data.to_deposit_message(),
            compute_domain(DOMAIN_DEPOSIT, None, None, spec),
        );
        if !deposit_data
            .signature
            .verify(&deposit_data.pubkey, signing_root.as_slice())
            .unwrap_or(false)
        {
            warn!(
                deposit_index = self.eth1_deposit_index.saturating_sub(1),
                "Skipping deposit with invalid proof of possession"
            );
            return Ok(DepositOutcome::RejectedSignature);
        }

        let index = self.add_validator_to_registry(
            Validator::from_deposit::<P>(
                deposit_data.pubkey.clone(),
                deposit_data.withdrawal_credentials,
                deposit_data.amount,
            ),
            deposit_data.amount,
        )?;
        Ok(DepositOutcome::Added(index))
    }

    pub fn process_voluntary_exit(
        &mut self,
        signed_voluntary_exit: &SignedVoluntaryExit,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let voluntary_exit = &signed_voluntary_exit.message;
        let validator_index = voluntary_exit.validator_index;
        let current_epoch = self.get_current_epoch();

        let Some(validator) = self.validators.get(validator_index.as_usize()) else {
            bail!("Validator {validator_index} not found")
        };

        // Verify the validator is active
        ensure!(
            validator.is_active_validator(current_epoch),
            "Validator {validator_index} is not active"
        );

        // Verify exit has not been initiated
        ensure!(
            validator.exit_epoch == FAR_FUTURE_EPOCH,
            "Exit has already been initiated for validator {validator_index}"
        );

        // Exits must specify an epoch when they become valid; they are not valid before then
        ensure!(
            current_epoch >= voluntary_exit.epoch,
            "Exit is not valid until epoch {}",
            voluntary_exit.epoch
        );

        // Verify the validator has been active long enough
        let earliest_exit_epoch = validator
            .activation_epoch
            .checked_add(spec.shard_committee_period)
            .ok_or_else(|| anyhow!("Failed to calculate earliest exit epoch"))?;
        ensure!(
            current_epoch >= earliest_exit_epoch,
            "Validator {validator_index} has not been active long enough"
        );

        // Verify signature
        let domain = self.get_domain(DOMAIN_VOLUNTARY_EXIT, Some(voluntary_exit.epoch), spec);
        let signing_root = compute_signing_root(voluntary_exit, domain);
        ensure!(
            signed_voluntary_exit
                .signature
                .verify(&validator.pubkey, signing_root.as_slice())
                .unwrap_or(false),
            "Voluntary exit signature verification failed"
        );

        // Initiate exit
        self.initiate_validator_exit(validator_index, spec)
    }

    /// The root of the state produced by applying ``block`` on top of this state, used by
    /// proposers to fill in ``block.state_root``. The block signature is not checked.
    pub fn compute_new_state_root(
        &self,
        block: &BeaconBlock<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<B256> {
        let mut state = self.clone();
        if state.slot < block.slot {
            state.process_slots(block.slot, spec)?;
        }
        state.process_block(block, spec)?;
        Ok(state.tree_hash_root())
    }
}
