use std::collections::HashSet;

use anyhow::{anyhow, ensure};
use itertools::Itertools;
use keel_consensus_misc::{
    checkpoint::Checkpoint,
    constants::{BASE_REWARDS_PER_EPOCH, GENESIS_EPOCH, JUSTIFICATION_BITS_LENGTH},
    misc::{compute_activation_exit_epoch, integer_squareroot},
    validator_index::ValidatorIndex,
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use ssz_types::VariableList;
use tracing::debug;
use tree_hash::TreeHash;

use super::beacon_state::BeaconState;
use crate::{historical_batch::HistoricalBatch, pending_attestation::PendingAttestation};

/// Per-validator rewards and penalties, index-aligned with the registry.
pub type Deltas = (Vec<u64>, Vec<u64>);

impl<P: Preset> BeaconState<P> {
    pub fn process_epoch(&mut self, spec: &BeaconNetworkSpec) -> anyhow::Result<()> {
        debug!(epoch = self.get_current_epoch(), slot = self.slot, "Processing epoch");

        self.process_justification_and_finalization()?;
        self.process_rewards_and_penalties()?;
        self.process_registry_updates(spec)?;
        self.process_slashings()?;
        self.process_final_updates()?;

        Ok(())
    }

    pub fn get_matching_source_attestations(
        &self,
        epoch: u64,
    ) -> anyhow::Result<&[PendingAttestation<P>]> {
        ensure!(
            epoch == self.get_previous_epoch() || epoch == self.get_current_epoch(),
            "Epoch {epoch} is neither the previous nor the current epoch"
        );
        Ok(if epoch == self.get_current_epoch() {
            &self.current_epoch_attestations
        } else {
            &self.previous_epoch_attestations
        })
    }

    pub fn get_matching_target_attestations(
        &self,
        epoch: u64,
    ) -> anyhow::Result<Vec<&PendingAttestation<P>>> {
        let block_root = self.get_block_root(epoch)?;
        Ok(self
            .get_matching_source_attestations(epoch)?
            .iter()
            .filter(|attestation| attestation.data.target.root == block_root)
            .collect())
    }

    pub fn get_matching_head_attestations(
        &self,
        epoch: u64,
    ) -> anyhow::Result<Vec<&PendingAttestation<P>>> {
        let mut matching = vec![];
        for attestation in self.get_matching_target_attestations(epoch)? {
            if attestation.data.beacon_block_root
                == self.get_block_root_at_slot(attestation.data.slot)?
            {
                matching.push(attestation);
            }
        }
        Ok(matching)
    }

    pub fn get_unslashed_attesting_indices<'a>(
        &self,
        attestations: impl IntoIterator<Item = &'a PendingAttestation<P>>,
    ) -> anyhow::Result<HashSet<ValidatorIndex>> {
        let mut output = HashSet::new();
        for attestation in attestations {
            output.extend(
                self.get_attesting_indices(&attestation.data, &attestation.aggregation_bits)?,
            );
        }
        output.retain(|index| {
            self.validators
                .get(index.as_usize())
                .is_some_and(|validator| !validator.slashed)
        });
        Ok(output)
    }

    /// Return the combined effective balance of the set of unslashed validators participating in
    /// ``attestations``.
    pub fn get_attesting_balance<'a>(
        &self,
        attestations: impl IntoIterator<Item = &'a PendingAttestation<P>>,
    ) -> anyhow::Result<u64> {
        Ok(self.get_total_balance(&self.get_unslashed_attesting_indices(attestations)?))
    }

    pub fn process_justification_and_finalization(&mut self) -> anyhow::Result<()> {
        // Initial FFG checkpoint values have a `0x00` stub for `root`.
        // Skip FFG updates in the first two epochs to avoid corner cases that might result in
        // modifying this stub.
        if self.get_current_epoch() <= GENESIS_EPOCH + 1 {
            return Ok(());
        }

        let previous_target_balance = self.get_attesting_balance(
            self.get_matching_target_attestations(self.get_previous_epoch())?,
        )?;
        let current_target_balance = self.get_attesting_balance(
            self.get_matching_target_attestations(self.get_current_epoch())?,
        )?;
        let total_active_balance = self.get_total_active_balance();

        self.weigh_justification_and_finalization(
            total_active_balance,
            previous_target_balance,
            current_target_balance,
        )
    }

    pub fn weigh_justification_and_finalization(
        &mut self,
        total_active_balance: u64,
        previous_epoch_target_balance: u64,
        current_epoch_target_balance: u64,
    ) -> anyhow::Result<()> {
        let previous_epoch = self.get_previous_epoch();
        let current_epoch = self.get_current_epoch();
        let old_previous_justified_checkpoint = self.previous_justified_checkpoint;
        let old_current_justified_checkpoint = self.current_justified_checkpoint;

        // Process justifications
        self.previous_justified_checkpoint = self.current_justified_checkpoint;
        for i in (1..JUSTIFICATION_BITS_LENGTH).rev() {
            let bit = self
                .justification_bits
                .get(i - 1)
                .map_err(|err| anyhow!("Failed to get justification bit {err:?}"))?;
            self.justification_bits
                .set(i, bit)
                .map_err(|err| anyhow!("Failed to set justification bit {err:?}"))?;
        }
        self.justification_bits
            .set(0, false)
            .map_err(|err| anyhow!("Failed to set justification bit 0: {err:?}"))?;

        if previous_epoch_target_balance * 3 >= total_active_balance * 2 {
            self.current_justified_checkpoint = Checkpoint {
                epoch: previous_epoch,
                root: self.get_block_root(previous_epoch)?,
            };
            self.justification_bits
                .set(1, true)
                .map_err(|err| anyhow!("Failed to set justification bit 1: {err:?}"))?;
        }
        if current_epoch_target_balance * 3 >= total_active_balance * 2 {
            self.current_justified_checkpoint = Checkpoint {
                epoch: current_epoch,
                root: self.get_block_root(current_epoch)?,
            };
            self.justification_bits
                .set(0, true)
                .map_err(|err| anyhow!("Failed to set justification bit 0: {err:?}"))?;
        }

        // Process finalizations
        let bits: Vec<bool> = self.justification_bits.iter().collect();

        // The 2nd/3rd/4th most recent epochs are justified, the 2nd using the 4th as source
        if bits[1..4].iter().all(|&b| b)
            && old_previous_justified_checkpoint.epoch + 3 == current_epoch
        {
            self.finalized_checkpoint = old_previous_justified_checkpoint;
        }
        // The 2nd/3rd most recent epochs are justified, the 2nd using the 3rd as source
        if bits[1..3].iter().all(|&b| b)
            && old_previous_justified_checkpoint.epoch + 2 == current_epoch
        {
            self.finalized_checkpoint = old_previous_justified_checkpoint;
        }
        // The 1st/2nd/3rd most recent epochs are justified, the 1st using the 3rd as source
        if bits[0..3].iter().all(|&b| b)
            && old_current_justified_checkpoint.epoch + 2 == current_epoch
        {
            self.finalized_checkpoint = old_current_justified_checkpoint;
        }
        // The 1st/2nd most recent epochs are justified, the 1st using the 2nd as source
        if bits[0..2].iter().all(|&b| b)
            && old_current_justified_checkpoint.epoch + 1 == current_epoch
        {
            self.finalized_checkpoint = old_current_justified_checkpoint;
        }

        if self.current_justified_checkpoint != old_current_justified_checkpoint {
            debug!(
                epoch = self.current_justified_checkpoint.epoch,
                root = ?self.current_justified_checkpoint.root,
                "Justified checkpoint updated"
            );
        }

        Ok(())
    }

    pub fn get_base_reward(
        &self,
        index: ValidatorIndex,
        total_active_balance: u64,
    ) -> anyhow::Result<u64> {
        let effective_balance = self
            .validators
            .get(index.as_usize())
            .ok_or_else(|| anyhow!("Validator {index} not found"))?
            .effective_balance;
        Ok(effective_balance * P::BASE_REWARD_FACTOR
            / integer_squareroot(total_active_balance)
            / BASE_REWARDS_PER_EPOCH)
    }

    pub fn get_proposer_reward(
        &self,
        attesting_index: ValidatorIndex,
        total_active_balance: u64,
    ) -> anyhow::Result<u64> {
        Ok(self.get_base_reward(attesting_index, total_active_balance)?
            / P::PROPOSER_REWARD_QUOTIENT)
    }

    pub fn get_finality_delay(&self) -> u64 {
        self.get_previous_epoch()
            .saturating_sub(self.finalized_checkpoint.epoch)
    }

    pub fn is_in_inactivity_leak(&self) -> bool {
        self.get_finality_delay() > P::MIN_EPOCHS_TO_INACTIVITY_PENALTY
    }

    pub fn get_eligible_validator_indices(&self) -> Vec<ValidatorIndex> {
        let previous_epoch = self.get_previous_epoch();
        self.validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| {
                validator.is_active_validator(previous_epoch)
                    || (validator.slashed && previous_epoch + 1 < validator.withdrawable_epoch)
            })
            .map(|(index, _)| ValidatorIndex::from(index))
            .collect()
    }

    /// Helper with shared logic for use by get source, target, and head deltas functions.
    pub fn get_attestation_component_deltas<'a>(
        &self,
        attestations: impl IntoIterator<Item = &'a PendingAttestation<P>>,
    ) -> anyhow::Result<Deltas> {
        let mut rewards = vec![0; self.validators.len()];
        let mut penalties = vec![0; self.validators.len()];
        let total_balance = self.get_total_active_balance();
        let unslashed_attesting_indices = self.get_unslashed_attesting_indices(attestations)?;
        let attesting_balance = self.get_total_balance(&unslashed_attesting_indices);
        let increment = P::EFFECTIVE_BALANCE_INCREMENT;

        for index in self.get_eligible_validator_indices() {
            let base_reward = self.get_base_reward(index, total_balance)?;
            if unslashed_attesting_indices.contains(&index) {
                // Factored out from balance totals to avoid uint64 overflow
                let reward_numerator = base_reward * (attesting_balance / increment);
                rewards[index.as_usize()] += reward_numerator / (total_balance / increment);
            } else {
                penalties[index.as_usize()] += base_reward;
            }
        }

        Ok((rewards, penalties))
    }

    /// Return attester micro-rewards/penalties for source-vote for each validator.
    pub fn get_source_deltas(&self) -> anyhow::Result<Deltas> {
        let matching_source_attestations =
            self.get_matching_source_attestations(self.get_previous_epoch())?;
        self.get_attestation_component_deltas(matching_source_attestations)
    }

    /// Return attester micro-rewards/penalties for target-vote for each validator.
    pub fn get_target_deltas(&self) -> anyhow::Result<Deltas> {
        let matching_target_attestations =
            self.get_matching_target_attestations(self.get_previous_epoch())?;
        self.get_attestation_component_deltas(matching_target_attestations)
    }

    /// Return attester micro-rewards/penalties for head-vote for each validator.
    pub fn get_head_deltas(&self) -> anyhow::Result<Deltas> {
        let matching_head_attestations =
            self.get_matching_head_attestations(self.get_previous_epoch())?;
        self.get_attestation_component_deltas(matching_head_attestations)
    }

    /// Return proposer and inclusion delay micro-rewards/penalties for each validator.
    pub fn get_inclusion_delay_deltas(&self) -> anyhow::Result<Deltas> {
        let mut rewards = vec![0; self.validators.len()];
        let total_balance = self.get_total_active_balance();
        let matching_source_attestations =
            self.get_matching_source_attestations(self.get_previous_epoch())?;

        let attesters = matching_source_attestations
            .iter()
            .map(|attestation| {
                Ok((
                    attestation,
                    self.get_attesting_indices(&attestation.data, &attestation.aggregation_bits)?,
                ))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        for index in self.get_unslashed_attesting_indices(matching_source_attestations)? {
            let Some((attestation, _)) = attesters
                .iter()
                .filter(|(_, indices)| indices.contains(&index))
                .min_by_key(|(attestation, _)| attestation.inclusion_delay)
            else {
                continue;
            };
            let base_reward = self.get_base_reward(index, total_balance)?;
            let proposer_reward = self.get_proposer_reward(index, total_balance)?;
            *rewards
                .get_mut(attestation.proposer_index.as_usize())
                .ok_or_else(|| {
                    anyhow!("Including proposer {} not found", attestation.proposer_index)
                })? += proposer_reward;
            let max_attester_reward = base_reward - proposer_reward;
            rewards[index.as_usize()] += max_attester_reward / attestation.inclusion_delay;
        }

        // No penalties associated with inclusion delay
        let penalties = vec![0; self.validators.len()];
        Ok((rewards, penalties))
    }

    /// Return inactivity reward/penalty deltas for each validator.
    pub fn get_inactivity_penalty_deltas(&self) -> anyhow::Result<Deltas> {
        let mut penalties = vec![0; self.validators.len()];
        if self.is_in_inactivity_leak() {
            let total_balance = self.get_total_active_balance();
            let matching_target_attesting_indices = self.get_unslashed_attesting_indices(
                self.get_matching_target_attestations(self.get_previous_epoch())?,
            )?;
            let finality_delay = self.get_finality_delay();
            for index in self.get_eligible_validator_indices() {
                penalties[index.as_usize()] +=
                    BASE_REWARDS_PER_EPOCH * self.get_base_reward(index, total_balance)?;
                if !matching_target_attesting_indices.contains(&index) {
                    let effective_balance = self.validators[index.as_usize()].effective_balance;
                    penalties[index.as_usize()] +=
                        effective_balance * finality_delay / P::INACTIVITY_PENALTY_QUOTIENT;
                }
            }
        }

        // No rewards associated with inactivity penalties
        let rewards = vec![0; self.validators.len()];
        Ok((rewards, penalties))
    }

    /// Return attestation reward/penalty deltas for each validator.
    pub fn get_attestation_deltas(&self) -> anyhow::Result<Deltas> {
        let (source_rewards, source_penalties) = self.get_source_deltas()?;
        let (target_rewards, target_penalties) = self.get_target_deltas()?;
        let (head_rewards, head_penalties) = self.get_head_deltas()?;
        let (inclusion_delay_rewards, _) = self.get_inclusion_delay_deltas()?;
        let (_, inactivity_penalties) = self.get_inactivity_penalty_deltas()?;

        let rewards = (0..self.validators.len())
            .map(|i| {
                source_rewards[i] + target_rewards[i] + head_rewards[i] + inclusion_delay_rewards[i]
            })
            .collect();
        let penalties = (0..self.validators.len())
            .map(|i| {
                source_penalties[i]
                    + target_penalties[i]
                    + head_penalties[i]
                    + inactivity_penalties[i]
            })
            .collect();
        Ok((rewards, penalties))
    }

    pub fn process_rewards_and_penalties(&mut self) -> anyhow::Result<()> {
        // No rewards are applied at the end of `GENESIS_EPOCH` because rewards are for work done
        // in the previous epoch
        if self.get_current_epoch() == GENESIS_EPOCH {
            return Ok(());
        }

        let (rewards, penalties) = self.get_attestation_deltas()?;
        for (index, (reward, penalty)) in rewards.into_iter().zip(penalties).enumerate() {
            self.increase_balance(ValidatorIndex::from(index), reward)?;
            self.decrease_balance(ValidatorIndex::from(index), penalty)?;
        }

        Ok(())
    }

    pub fn process_registry_updates(&mut self, spec: &BeaconNetworkSpec) -> anyhow::Result<()> {
        let current_epoch = self.get_current_epoch();

        // Process activation eligibility and ejections
        for index in 0..self.validators.len() {
            let validator = &mut self.validators[index];
            if validator.is_eligible_for_activation_queue::<P>() {
                validator.activation_eligibility_epoch = current_epoch + 1;
            }
            if validator.is_active_validator(current_epoch)
                && validator.effective_balance <= spec.ejection_balance
            {
                self.initiate_validator_exit(ValidatorIndex::from(index), spec)?;
            }
        }

        // Queue validators eligible for activation and not yet dequeued for activation
        let finalized_epoch = self.finalized_checkpoint.epoch;
        let activation_queue = self
            .validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| validator.is_eligible_for_activation(finalized_epoch))
            .sorted_by_key(|(index, validator)| (validator.activation_eligibility_epoch, *index))
            .map(|(index, _)| index)
            .collect::<Vec<_>>();

        // Dequeued validators for activation up to churn limit
        let churn_limit = self.get_validator_churn_limit(spec) as usize;
        let activation_epoch = compute_activation_exit_epoch::<P>(current_epoch);
        for index in activation_queue.into_iter().take(churn_limit) {
            self.validators[index].activation_epoch = activation_epoch;
        }

        Ok(())
    }

    pub fn process_slashings(&mut self) -> anyhow::Result<()> {
        let epoch = self.get_current_epoch();
        let total_balance = self.get_total_active_balance();
        let adjusted_total_slashing_balance = (self.slashings.iter().sum::<u64>()
            * P::PROPORTIONAL_SLASHING_MULTIPLIER)
            .min(total_balance);
        let increment = P::EFFECTIVE_BALANCE_INCREMENT;

        let penalized = self
            .validators
            .iter()
            .enumerate()
            .filter(|(_, validator)| {
                validator.slashed
                    && epoch + P::epochs_per_slashings_vector() / 2 == validator.withdrawable_epoch
            })
            .map(|(index, validator)| {
                // Factored out from penalty numerator to avoid uint64 overflow
                let penalty_numerator =
                    validator.effective_balance / increment * adjusted_total_slashing_balance;
                (index, penalty_numerator / total_balance * increment)
            })
            .collect::<Vec<_>>();

        for (index, penalty) in penalized {
            self.decrease_balance(ValidatorIndex::from(index), penalty)?;
        }

        Ok(())
    }

    pub fn process_final_updates(&mut self) -> anyhow::Result<()> {
        self.process_eth1_data_reset();
        self.process_effective_balance_updates();
        self.process_slashings_reset();
        self.process_randao_mixes_reset();
        self.process_historical_roots_update()?;
        self.process_participation_record_updates();

        Ok(())
    }

    pub fn process_eth1_data_reset(&mut self) {
        let next_epoch = self.get_current_epoch() + 1;
        // Reset eth1 data votes
        if next_epoch % P::EPOCHS_PER_ETH1_VOTING_PERIOD == 0 {
            self.eth1_data_votes = VariableList::default();
        }
    }

    pub fn process_effective_balance_updates(&mut self) {
        // Update effective balances with hysteresis
        let hysteresis_increment = P::EFFECTIVE_BALANCE_INCREMENT / P::HYSTERESIS_QUOTIENT;
        let downward_threshold = hysteresis_increment * P::HYSTERESIS_DOWNWARD_MULTIPLIER;
        let upward_threshold = hysteresis_increment * P::HYSTERESIS_UPWARD_MULTIPLIER;
        for (validator, &balance) in self.validators.iter_mut().zip(self.balances.iter()) {
            if balance + downward_threshold < validator.effective_balance
                || validator.effective_balance + upward_threshold < balance
            {
                validator.effective_balance = (balance - balance % P::EFFECTIVE_BALANCE_INCREMENT)
                    .min(P::MAX_EFFECTIVE_BALANCE);
            }
        }
    }

    pub fn process_slashings_reset(&mut self) {
        let next_epoch = self.get_current_epoch() + 1;
        // Reset slashings
        self.slashings[(next_epoch % P::epochs_per_slashings_vector()) as usize] = 0;
    }

    pub fn process_randao_mixes_reset(&mut self) {
        let current_epoch = self.get_current_epoch();
        let next_epoch = current_epoch + 1;
        // Set randao mix
        self.randao_mixes[(next_epoch % P::epochs_per_historical_vector()) as usize] =
            self.get_randao_mix(current_epoch);
    }

    pub fn process_historical_roots_update(&mut self) -> anyhow::Result<()> {
        // Set historical root accumulator
        let next_epoch = self.get_current_epoch() + 1;
        if next_epoch % (P::slots_per_historical_root() / P::SLOTS_PER_EPOCH) == 0 {
            let historical_batch = HistoricalBatch::<P> {
                block_roots: self.block_roots.clone(),
                state_roots: self.state_roots.clone(),
            };
            self.historical_roots
                .push(historical_batch.tree_hash_root())
                .map_err(|err| anyhow!("Failed to push historical root: {err:?}"))?;
        }
        Ok(())
    }

    pub fn process_participation_record_updates(&mut self) {
        // Rotate current/previous epoch attestations
        self.previous_epoch_attestations = std::mem::take(&mut self.current_epoch_attestations);
    }
}
