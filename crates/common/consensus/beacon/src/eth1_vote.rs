use std::cmp::Reverse;

use keel_consensus_misc::eth_1_data::Eth1Data;
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};

use crate::{phase0::beacon_state::BeaconState, validator_signing::compute_time_at_slot};

/// A block of the eth1 chain as seen by the validator's eth1 node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eth1Block {
    pub timestamp: u64,
    pub eth1_data: Eth1Data,
}

/// Time at the first slot of the eth1 voting period ``state`` is in.
pub fn voting_period_start_time<P: Preset>(
    state: &BeaconState<P>,
    spec: &BeaconNetworkSpec,
) -> u64 {
    let slots_per_period = P::EPOCHS_PER_ETH1_VOTING_PERIOD * P::SLOTS_PER_EPOCH;
    let eth1_voting_period_start_slot = state.slot - state.slot % slots_per_period;
    compute_time_at_slot(state, eth1_voting_period_start_slot, spec)
}

/// Whether ``block`` lies between one and two follow distances before ``period_start``, both
/// ends included.
pub fn is_candidate_block(block: &Eth1Block, period_start: u64, spec: &BeaconNetworkSpec) -> bool {
    let follow_time = spec.seconds_per_eth1_block * spec.eth1_follow_distance;
    block.timestamp + follow_time <= period_start
        && block.timestamp + 2 * follow_time >= period_start
}

/// The eth1 vote for a block proposed on ``state``.
///
/// Picks the most frequent vote already in the state that is also a candidate of ``eth1_chain``,
/// the earliest on a tie. Without such a vote falls back to the latest candidate, then to the
/// state's current ``eth1_data``.
pub fn get_eth1_vote<P: Preset>(
    state: &BeaconState<P>,
    eth1_chain: &[Eth1Block],
    spec: &BeaconNetworkSpec,
) -> Eth1Data {
    let period_start = voting_period_start_time(state, spec);
    let votes_to_consider = eth1_chain
        .iter()
        .filter(|block| is_candidate_block(block, period_start, spec))
        .map(|block| &block.eth1_data)
        .collect::<Vec<_>>();

    let valid_votes = state
        .eth1_data_votes
        .iter()
        .filter(|vote| votes_to_consider.contains(vote))
        .collect::<Vec<_>>();

    valid_votes
        .iter()
        .enumerate()
        .max_by_key(|(index, vote)| {
            let count = valid_votes.iter().filter(|other| other == vote).count();
            let first = valid_votes
                .iter()
                .position(|other| other == *vote)
                .unwrap_or(*index);
            (count, Reverse(first))
        })
        .map(|(_, vote)| *vote)
        .or_else(|| votes_to_consider.last().copied())
        .unwrap_or(&state.eth1_data)
        .clone()
}
