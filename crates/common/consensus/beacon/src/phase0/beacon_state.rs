use std::{
    cmp::max,
    collections::HashSet,
};

use alloy_primitives::{B256, aliases::B32};
use anyhow::{anyhow, bail, ensure};
use ethereum_hashing::{hash, hash_fixed};
use itertools::Itertools;
use keel_bls::traits::Verifiable;
use keel_consensus_misc::{
    attestation_data::AttestationData,
    beacon_block_header::BeaconBlockHeader,
    checkpoint::Checkpoint,
    constants::{
        DOMAIN_BEACON_ATTESTER, DOMAIN_BEACON_PROPOSER, FAR_FUTURE_EPOCH, GENESIS_EPOCH,
        MAX_RANDOM_BYTE,
    },
    eth_1_data::Eth1Data,
    fork::Fork,
    misc::{
        compute_activation_exit_epoch, compute_committee, compute_domain, compute_epoch_at_slot,
        compute_shuffled_index, compute_signing_root, compute_start_slot_at_epoch, int_to_bytes,
        is_sorted_and_unique,
    },
    validator::Validator,
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{
    BitList, BitVector, FixedVector, VariableList,
    serde_utils::{quoted_u64_fixed_vec, quoted_u64_var_list},
    typenum::U4,
};
use tracing::debug;
use tree_hash::TreeHash;
use tree_hash_derive::TreeHash;

use super::beacon_block::SignedBeaconBlock;
use crate::{
    attestation::Attestation, indexed_attestation::IndexedAttestation,
    pending_attestation::PendingAttestation,
};

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize, Encode, Decode, TreeHash)]
#[serde(bound = "P: Preset")]
pub struct BeaconState<P: Preset> {
    // Versioning
    #[serde(with = "serde_utils::quoted_u64")]
    pub genesis_time: u64,
    pub genesis_validators_root: B256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: u64,
    pub fork: Fork,

    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: FixedVector<B256, P::SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<B256, P::SlotsPerHistoricalRoot>,
    pub historical_roots: VariableList<B256, P::HistoricalRootsLimit>,

    // Eth1
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: VariableList<Eth1Data, P::SlotsPerEth1VotingPeriod>,
    #[serde(with = "serde_utils::quoted_u64")]
    pub eth1_deposit_index: u64,

    // Registry
    pub validators: VariableList<Validator, P::ValidatorRegistryLimit>,
    #[serde(with = "quoted_u64_var_list")]
    pub balances: VariableList<u64, P::ValidatorRegistryLimit>,

    // Randomness
    pub randao_mixes: FixedVector<B256, P::EpochsPerHistoricalVector>,

    // Slashings
    #[serde(with = "quoted_u64_fixed_vec")]
    pub slashings: FixedVector<u64, P::EpochsPerSlashingsVector>,

    // Attestations
    pub previous_epoch_attestations: VariableList<PendingAttestation<P>, P::MaxPendingAttestations>,
    pub current_epoch_attestations: VariableList<PendingAttestation<P>, P::MaxPendingAttestations>,

    // Finality
    pub justification_bits: BitVector<U4>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

impl<P: Preset> BeaconState<P> {
    /// Return the current epoch.
    pub fn get_current_epoch(&self) -> u64 {
        compute_epoch_at_slot::<P>(self.slot)
    }

    /// Return the previous epoch (unless the current epoch is ``GENESIS_EPOCH``).
    pub fn get_previous_epoch(&self) -> u64 {
        let current_epoch = self.get_current_epoch();
        if current_epoch == GENESIS_EPOCH {
            GENESIS_EPOCH
        } else {
            current_epoch - 1
        }
    }

    /// Return the block root at the start of a recent ``epoch``.
    pub fn get_block_root(&self, epoch: u64) -> anyhow::Result<B256> {
        self.get_block_root_at_slot(compute_start_slot_at_epoch::<P>(epoch))
    }

    /// Return the block root at a recent ``slot``.
    pub fn get_block_root_at_slot(&self, slot: u64) -> anyhow::Result<B256> {
        ensure!(
            slot < self.slot && self.slot <= slot + P::slots_per_historical_root(),
            "Slot {slot} is outside of the block_roots range at slot {}",
            self.slot
        );
        Ok(self.block_roots[(slot % P::slots_per_historical_root()) as usize])
    }

    /// Return the randao mix at a recent ``epoch``.
    pub fn get_randao_mix(&self, epoch: u64) -> B256 {
        self.randao_mixes[(epoch % P::epochs_per_historical_vector()) as usize]
    }

    /// Return the sequence of active validator indices at ``epoch``.
    pub fn get_active_validator_indices(&self, epoch: u64) -> Vec<ValidatorIndex> {
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| validator.is_active_validator(epoch))
            .map(|(index, _)| ValidatorIndex::from(index))
            .collect()
    }

    /// Return the validator churn limit for the current epoch.
    pub fn get_validator_churn_limit(&self, spec: &BeaconNetworkSpec) -> u64 {
        let active_validator_indices = self.get_active_validator_indices(self.get_current_epoch());
        max(
            spec.min_per_epoch_churn_limit,
            active_validator_indices.len() as u64 / spec.churn_limit_quotient,
        )
    }

    /// Return the seed at ``epoch``.
    pub fn get_seed(&self, epoch: u64, domain_type: B32) -> B256 {
        let mix = self.get_randao_mix(
            epoch + P::epochs_per_historical_vector() - P::MIN_SEED_LOOKAHEAD - 1,
        );
        B256::from(hash_fixed(
            &[
                domain_type.as_slice(),
                &int_to_bytes(epoch, 8),
                mix.as_slice(),
            ]
            .concat(),
        ))
    }

    /// Return the number of committees in each slot for the given ``epoch``.
    pub fn get_committee_count_per_slot(&self, epoch: u64) -> u64 {
        (self.get_active_validator_indices(epoch).len() as u64
            / P::SLOTS_PER_EPOCH
            / P::TARGET_COMMITTEE_SIZE)
            .clamp(1, P::MAX_COMMITTEES_PER_SLOT)
    }

    /// Return the number of committees at ``slot``.
    pub fn get_committee_count_at_slot(&self, slot: u64) -> u64 {
        self.get_committee_count_per_slot(compute_epoch_at_slot::<P>(slot))
    }

    /// Return the beacon committee at ``slot`` for ``index``.
    pub fn get_beacon_committee(&self, slot: u64, index: u64) -> anyhow::Result<Vec<ValidatorIndex>> {
        let epoch = compute_epoch_at_slot::<P>(slot);
        let committees_per_slot = self.get_committee_count_per_slot(epoch);
        compute_committee::<P>(
            &self.get_active_validator_indices(epoch),
            self.get_seed(epoch, DOMAIN_BEACON_ATTESTER),
            (slot % P::SLOTS_PER_EPOCH) * committees_per_slot + index,
            committees_per_slot * P::SLOTS_PER_EPOCH,
        )
    }

    /// Return from ``indices`` a random index sampled by effective balance.
    pub fn compute_proposer_index(
        &self,
        indices: &[ValidatorIndex],
        seed: B256,
    ) -> anyhow::Result<ValidatorIndex> {
        ensure!(!indices.is_empty(), "Cannot pick a proposer from no candidates");

        let total = indices.len() as u64;
        let mut i = 0;
        loop {
            let candidate_index =
                indices[compute_shuffled_index::<P>(i % total, total, seed)? as usize];
            let random_byte =
                hash(&[seed.as_slice(), &int_to_bytes(i / 32, 8)].concat())[(i % 32) as usize];
            let effective_balance = self
                .validators
                .get(candidate_index.as_usize())
                .ok_or_else(|| anyhow!("Validator {candidate_index} not found"))?
                .effective_balance;

            if effective_balance * MAX_RANDOM_BYTE >= P::MAX_EFFECTIVE_BALANCE * random_byte as u64
            {
                return Ok(candidate_index);
            }

            i += 1;
        }
    }

    /// Return the beacon proposer index at the current slot.
    pub fn get_beacon_proposer_index(&self) -> anyhow::Result<ValidatorIndex> {
        let epoch = self.get_current_epoch();
        let seed = B256::from(hash_fixed(
            &[
                self.get_seed(epoch, DOMAIN_BEACON_PROPOSER).as_slice(),
                &int_to_bytes(self.slot, 8),
            ]
            .concat(),
        ));
        let indices = self.get_active_validator_indices(epoch);
        self.compute_proposer_index(&indices, seed)
    }

    /// Return the combined effective balance of the ``indices``.
    /// ``EFFECTIVE_BALANCE_INCREMENT`` Gwei minimum to avoid divisions by zero.
    pub fn get_total_balance(&self, indices: &HashSet<ValidatorIndex>) -> u64 {
        max(
            P::EFFECTIVE_BALANCE_INCREMENT,
            indices
                .iter()
                .filter_map(|index| self.validators.get(index.as_usize()))
                .map(|validator| validator.effective_balance)
                .sum(),
        )
    }

    /// Return the combined effective balance of the active validators.
    pub fn get_total_active_balance(&self) -> u64 {
        self.get_total_balance(
            &self
                .get_active_validator_indices(self.get_current_epoch())
                .into_iter()
                .collect(),
        )
    }

    /// Return the signature domain (fork version concatenated with domain type) of a message.
    pub fn get_domain(
        &self,
        domain_type: B32,
        epoch: Option<u64>,
        spec: &BeaconNetworkSpec,
    ) -> B256 {
        let epoch = epoch.unwrap_or_else(|| self.get_current_epoch());
        compute_domain(
            domain_type,
            Some(self.fork.version_at(epoch)),
            Some(self.genesis_validators_root),
            spec,
        )
    }

    /// Return the set of attesting indices corresponding to ``data`` and ``bits``.
    pub fn get_attesting_indices(
        &self,
        data: &AttestationData,
        bits: &BitList<P::MaxValidatorsPerCommittee>,
    ) -> anyhow::Result<HashSet<ValidatorIndex>> {
        let committee = self.get_beacon_committee(data.slot, data.index)?;
        let mut output = HashSet::new();
        for (i, validator_index) in committee.into_iter().enumerate() {
            if bits
                .get(i)
                .map_err(|err| anyhow!("Failed to get aggregation bit {i}: {err:?}"))?
            {
                output.insert(validator_index);
            }
        }
        Ok(output)
    }

    /// Return the indexed attestation corresponding to ``attestation``.
    pub fn get_indexed_attestation(
        &self,
        attestation: &Attestation<P>,
    ) -> anyhow::Result<IndexedAttestation<P>> {
        let attesting_indices = self
            .get_attesting_indices(&attestation.data, &attestation.aggregation_bits)?
            .into_iter()
            .sorted()
            .collect::<Vec<_>>();
        Ok(IndexedAttestation {
            attesting_indices: VariableList::new(attesting_indices)
                .map_err(|err| anyhow!("Too many attesting indices: {err:?}"))?,
            data: attestation.data.clone(),
            signature: attestation.signature.clone(),
        })
    }

    /// Check if ``indexed_attestation`` is not empty, has sorted and unique indices and has a valid
    /// aggregate signature.
    pub fn is_valid_indexed_attestation(
        &self,
        indexed_attestation: &IndexedAttestation<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<bool> {
        let indices = &indexed_attestation.attesting_indices;
        // Verify indices are sorted and unique
        if indices.is_empty() || !is_sorted_and_unique(indices) {
            return Ok(false);
        }

        let public_keys = indices
            .iter()
            .map(|index| {
                self.validators
                    .get(index.as_usize())
                    .map(|validator| &validator.pubkey)
                    .ok_or_else(|| anyhow!("Attesting validator {index} not found"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let domain = self.get_domain(
            DOMAIN_BEACON_ATTESTER,
            Some(indexed_attestation.data.target.epoch),
            spec,
        );
        let signing_root = compute_signing_root(&indexed_attestation.data, domain);

        Ok(indexed_attestation
            .signature
            .fast_aggregate_verify(public_keys, signing_root.as_slice())
            .unwrap_or(false))
    }

    /// Increase the validator balance at index ``index`` by ``delta``.
    pub fn increase_balance(&mut self, index: ValidatorIndex, delta: u64) -> anyhow::Result<()> {
        let Some(balance) = self.balances.get_mut(index.as_usize()) else {
            bail!("Failed to increase balance of unknown validator {index}")
        };
        *balance += delta;
        Ok(())
    }

    /// Decrease the validator balance at index ``index`` by ``delta`` with underflow protection.
    pub fn decrease_balance(&mut self, index: ValidatorIndex, delta: u64) -> anyhow::Result<()> {
        let Some(balance) = self.balances.get_mut(index.as_usize()) else {
            bail!("Failed to decrease balance of unknown validator {index}")
        };
        *balance = balance.saturating_sub(delta);
        Ok(())
    }

    /// Initiate the exit of the validator with index ``index``.
    pub fn initiate_validator_exit(
        &mut self,
        index: ValidatorIndex,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        // Return if validator already initiated exit
        let Some(validator) = self.validators.get(index.as_usize()) else {
            bail!("Validator {index} not found")
        };
        if validator.exit_epoch != FAR_FUTURE_EPOCH {
            return Ok(());
        }

        // Compute exit queue epoch
        let mut exit_queue_epoch = self
            .validators
            .iter()
            .map(|validator| validator.exit_epoch)
            .filter(|&exit_epoch| exit_epoch != FAR_FUTURE_EPOCH)
            .fold(
                compute_activation_exit_epoch::<P>(self.get_current_epoch()),
                max,
            );
        let exit_queue_churn = self
            .validators
            .iter()
            .filter(|validator| validator.exit_epoch == exit_queue_epoch)
            .count() as u64;
        if exit_queue_churn >= self.get_validator_churn_limit(spec) {
            exit_queue_epoch += 1;
        }

        // Set validator exit epoch and withdrawable epoch
        let Some(validator) = self.validators.get_mut(index.as_usize()) else {
            bail!("Validator {index} not found")
        };
        validator.exit_epoch = exit_queue_epoch;
        validator.withdrawable_epoch = exit_queue_epoch
            .checked_add(spec.min_validator_withdrawability_delay)
            .ok_or_else(|| anyhow!("Withdrawable epoch overflows for validator {index}"))?;

        Ok(())
    }

    /// Slash the validator with index ``slashed_index``.
    pub fn slash_validator(
        &mut self,
        slashed_index: ValidatorIndex,
        whistleblower_index: Option<ValidatorIndex>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let epoch = self.get_current_epoch();
        self.initiate_validator_exit(slashed_index, spec)?;

        let Some(validator) = self.validators.get_mut(slashed_index.as_usize()) else {
            bail!("Validator {slashed_index} not found")
        };
        validator.slashed = true;
        validator.withdrawable_epoch = max(
            validator.withdrawable_epoch,
            epoch + P::epochs_per_slashings_vector(),
        );
        let effective_balance = validator.effective_balance;

        self.slashings[(epoch % P::epochs_per_slashings_vector()) as usize] += effective_balance;
        self.decrease_balance(
            slashed_index,
            effective_balance / P::MIN_SLASHING_PENALTY_QUOTIENT,
        )?;

        // Apply proposer and whistleblower rewards
        let proposer_index = self.get_beacon_proposer_index()?;
        let whistleblower_index = whistleblower_index.unwrap_or(proposer_index);
        let whistleblower_reward = effective_balance / P::WHISTLEBLOWER_REWARD_QUOTIENT;
        let proposer_reward = whistleblower_reward / P::PROPOSER_REWARD_QUOTIENT;
        self.increase_balance(proposer_index, proposer_reward)?;
        self.increase_balance(whistleblower_index, whistleblower_reward - proposer_reward)?;

        debug!(
            validator_index = %slashed_index,
            %whistleblower_index,
            epoch,
            "Slashed validator"
        );
        Ok(())
    }

    /// Append a validator and its balance, keeping both lists index-aligned.
    pub fn add_validator_to_registry(
        &mut self,
        validator: Validator,
        balance: u64,
    ) -> anyhow::Result<ValidatorIndex> {
        ensure!(
            self.validators.len() == self.balances.len(),
            "Validator registry and balances are out of step"
        );
        let index = ValidatorIndex::from(self.validators.len());
        self.validators
            .push(validator)
            .map_err(|err| anyhow!("Failed to add validator: {err:?}"))?;
        self.balances
            .push(balance)
            .map_err(|err| anyhow!("Failed to add balance: {err:?}"))?;
        Ok(index)
    }

    pub fn is_valid_genesis_state(&self, spec: &BeaconNetworkSpec) -> bool {
        if self.genesis_time < spec.min_genesis_time {
            return false;
        }
        if (self.get_active_validator_indices(GENESIS_EPOCH).len() as u64)
            < spec.min_genesis_active_validator_count
        {
            return false;
        }
        true
    }

    pub fn verify_block_signature(
        &self,
        signed_block: &SignedBeaconBlock<P>,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<bool> {
        let proposer_index = signed_block.message.proposer_index;
        let Some(proposer) = self.validators.get(proposer_index.as_usize()) else {
            bail!("Block proposer {proposer_index} not found")
        };
        let signing_root = compute_signing_root(
            &signed_block.message,
            self.get_domain(DOMAIN_BEACON_PROPOSER, None, spec),
        );

        Ok(signed_block
            .signature
            .verify(&proposer.pubkey, signing_root.as_slice())
            .unwrap_or(false))
    }

    /// Apply ``signed_block`` on top of this state. On failure the state is left untouched.
    pub fn state_transition(
        &mut self,
        signed_block: &SignedBeaconBlock<P>,
        validate_result: bool,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let mut state = self.clone();
        state.apply_signed_block(signed_block, validate_result, spec)?;
        *self = state;
        Ok(())
    }

    fn apply_signed_block(
        &mut self,
        signed_block: &SignedBeaconBlock<P>,
        validate_result: bool,
        spec: &BeaconNetworkSpec,
    ) -> anyhow::Result<()> {
        let block = &signed_block.message;

        // Process slots (including those with no blocks) since block
        self.process_slots(block.slot, spec)?;

        // Verify signature
        if validate_result {
            ensure!(
                self.verify_block_signature(signed_block, spec)?,
                "Block signature is invalid"
            );
        }

        // Process block
        self.process_block(block, spec)?;

        // Verify state root
        if validate_result {
            ensure!(
                block.state_root == self.tree_hash_root(),
                "Block state root does not match the post-state root"
            );
        }

        Ok(())
    }

    pub fn process_slots(&mut self, slot: u64, spec: &BeaconNetworkSpec) -> anyhow::Result<()> {
        ensure!(
            self.slot < slot,
            "Target slot {slot} must be after state slot {}",
            self.slot
        );

        while self.slot < slot {
            self.process_slot();
            // Process epoch on the start slot of the next epoch
            if (self.slot + 1) % P::SLOTS_PER_EPOCH == 0 {
                self.process_epoch(spec)?;
            }
            self.slot += 1;
        }

        Ok(())
    }

    pub fn process_slot(&mut self) {
        // Cache state root
        let previous_state_root = self.tree_hash_root();
        let index = (self.slot % P::slots_per_historical_root()) as usize;
        self.state_roots[index] = previous_state_root;
        // Cache latest block header state root
        if self.latest_block_header.state_root == B256::ZERO {
            self.latest_block_header.state_root = previous_state_root;
        }
        // Cache block root
        self.block_roots[index] = self.latest_block_header.tree_hash_root();
    }
}
