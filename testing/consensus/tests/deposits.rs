use keel_consensus_beacon::{
    genesis::{deposit_contract_root, genesis_deposits},
    phase0::beacon_block_body::BeaconBlockBody,
};
use keel_consensus_tests::Harness;
use keel_network_spec::{
    networks::BeaconNetworkSpec,
    preset::{MinimalPreset, Preset},
};
use rstest::rstest;
use ssz_types::VariableList;
use tree_hash::TreeHash;

const VALIDATOR_COUNT: u64 = 64;

#[rstest]
#[case::valid_signature(true, VALIDATOR_COUNT as usize + 1)]
#[case::invalid_signature(false, VALIDATOR_COUNT as usize)]
fn test_new_deposit_in_block(#[case] signed_by_owner: bool, #[case] registry_size: usize) {
    let harness = Harness::<MinimalPreset>::new(BeaconNetworkSpec::minimal(), VALIDATOR_COUNT);
    let genesis = harness.genesis_state().expect("genesis");

    let mut deposit_data = harness.genesis_deposit_data().expect("deposit data");
    let mut new_deposit = harness
        .deposit_data(VALIDATOR_COUNT, MinimalPreset::MAX_EFFECTIVE_BALANCE)
        .expect("deposit data");
    if !signed_by_owner {
        // A real signature, but from another validator over another message
        new_deposit.signature = deposit_data[0].signature.clone();
    }
    deposit_data.push(new_deposit);
    let deposits = genesis_deposits(&deposit_data).expect("proofs");

    // The eth1 chain has seen one more deposit than genesis consumed
    let mut parent_state = genesis.clone();
    let leaves = deposit_data
        .iter()
        .map(|data| data.tree_hash_root())
        .collect::<Vec<_>>();
    parent_state.eth1_data.deposit_root = deposit_contract_root(&leaves).expect("root");
    parent_state.eth1_data.deposit_count = leaves.len() as u64;

    let body = BeaconBlockBody {
        deposits: VariableList::new(vec![deposits[VALIDATOR_COUNT as usize].clone()])
            .expect("within limit"),
        ..Default::default()
    };
    let (_, state) = harness
        .build_block_with_body(&parent_state, 1, body)
        .expect("the block is valid either way");

    assert_eq!(state.eth1_deposit_index, VALIDATOR_COUNT + 1);
    assert_eq!(state.validators.len(), registry_size);
    assert_eq!(state.balances.len(), registry_size);
}

#[test]
fn test_block_must_include_pending_deposits() {
    let harness = Harness::<MinimalPreset>::new(BeaconNetworkSpec::minimal(), VALIDATOR_COUNT);
    let mut state = harness.genesis_state().expect("genesis");
    state.eth1_data.deposit_count += 1;

    assert!(harness.build_block(&state, 1).is_err());
}
