use alloy_primitives::B256;
use keel_consensus_beacon::phase0::{
    beacon_block::SignedBeaconBlock, beacon_block_body::BeaconBlockBody, beacon_state::BeaconState,
};
use keel_consensus_misc::{checkpoint::Checkpoint, validator_index::ValidatorIndex};
use keel_consensus_tests::{Harness, latest_block_root};
use keel_fork_choice::{
    errors::ForkChoiceError,
    handlers::{on_attestation, on_block, on_tick},
    store::{Store, get_forkchoice_store},
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::MinimalPreset};
use tree_hash::TreeHash;

const VALIDATOR_COUNT: u64 = 64;

struct Fixture {
    harness: Harness<MinimalPreset>,
    genesis: BeaconState<MinimalPreset>,
    store: Store<MinimalPreset>,
}

impl Fixture {
    fn new() -> Self {
        let harness = Harness::new(BeaconNetworkSpec::minimal(), VALIDATOR_COUNT);
        let genesis = harness.genesis_state().expect("genesis");
        let store = get_forkchoice_store(genesis.clone(), harness.spec.clone());
        Self {
            harness,
            genesis,
            store,
        }
    }

    fn tick(&mut self, slot: u64) {
        on_tick(&mut self.store, self.harness.time_at_slot(&self.genesis, slot)).expect("tick");
    }

    /// A block at ``slot`` on ``parent`` told apart from its siblings by ``graffiti``.
    fn block(
        &self,
        parent: B256,
        slot: u64,
        graffiti: u8,
    ) -> (SignedBeaconBlock<MinimalPreset>, BeaconState<MinimalPreset>) {
        let body = BeaconBlockBody {
            graffiti: B256::repeat_byte(graffiti),
            ..Default::default()
        };
        self.harness
            .build_block_with_body(&self.store.block_states[&parent], slot, body)
            .expect("block")
    }

    fn add_block(&mut self, parent: B256, slot: u64, graffiti: u8) -> B256 {
        let (block, _) = self.block(parent, slot, graffiti);
        on_block(&mut self.store, &block).expect("valid block")
    }

    /// Votes at ``slot`` for ``head`` from every member of committee ``index`` that ``participates``
    /// selects.
    fn vote(
        &mut self,
        head: B256,
        slot: u64,
        committee_index: u64,
        participates: impl Fn(ValidatorIndex) -> bool,
    ) {
        let state = self.store.block_states[&head].clone();
        let attestations = self
            .harness
            .build_attestations(&state, slot, head, participates)
            .expect("attestations");
        for attestation in attestations
            .iter()
            .filter(|attestation| attestation.data.index == committee_index)
        {
            on_attestation(&mut self.store, attestation).expect("valid attestation");
        }
    }
}

#[test]
fn test_head_follows_attesting_weight() {
    let mut fixture = Fixture::new();
    let anchor = fixture.store.justified_checkpoint.root;
    assert_eq!(anchor, latest_block_root(&fixture.genesis));
    fixture.tick(1);

    let left = fixture.add_block(anchor, 1, 0x01);
    let right = fixture.add_block(anchor, 1, 0x02);
    assert_ne!(left, right);

    fixture.tick(2);
    // Three members of one committee against a single member of the other
    let committee_0 = fixture.store.block_states[&left]
        .get_beacon_committee(1, 0)
        .expect("committee");
    let committee_1 = fixture.store.block_states[&right]
        .get_beacon_committee(1, 1)
        .expect("committee");
    fixture.vote(left, 1, 0, |index| committee_0[..3].contains(&index));
    fixture.vote(right, 1, 1, |index| committee_1[..1].contains(&index));

    let left_weight = fixture.store.get_latest_attesting_balance(left).expect("weight");
    let right_weight = fixture.store.get_latest_attesting_balance(right).expect("weight");
    assert_eq!(left_weight, 3 * right_weight);
    assert_eq!(fixture.store.get_head().expect("head"), left);

    // Later votes move the same validators over
    fixture.tick(9);
    let right_child = fixture.add_block(right, 9, 0x03);
    fixture.tick(10);
    let state = fixture.store.block_states[&right_child].clone();
    let attestations = fixture
        .harness
        .build_attestations(&state, 9, right_child, |_| true)
        .expect("attestations");
    for attestation in &attestations {
        on_attestation(&mut fixture.store, attestation).expect("valid attestation");
    }
    assert_eq!(fixture.store.get_head().expect("head"), right_child);
}

#[test]
fn test_equal_weight_breaks_ties_toward_greater_root() {
    let mut fixture = Fixture::new();
    let anchor = fixture.store.justified_checkpoint.root;
    fixture.tick(1);

    let left = fixture.add_block(anchor, 1, 0x01);
    let right = fixture.add_block(anchor, 1, 0x02);
    assert_eq!(fixture.store.get_head().expect("head"), left.max(right));

    fixture.tick(2);
    let committee_0 = fixture.store.block_states[&left]
        .get_beacon_committee(1, 0)
        .expect("committee");
    let committee_1 = fixture.store.block_states[&right]
        .get_beacon_committee(1, 1)
        .expect("committee");
    fixture.vote(left, 1, 0, |index| committee_0[..2].contains(&index));
    fixture.vote(right, 1, 1, |index| committee_1[..2].contains(&index));

    assert_eq!(
        fixture.store.get_latest_attesting_balance(left).expect("weight"),
        fixture.store.get_latest_attesting_balance(right).expect("weight")
    );
    assert_eq!(fixture.store.get_head().expect("head"), left.max(right));
}

#[test]
fn test_late_conflicting_justification_waits_for_epoch_boundary() {
    let mut fixture = Fixture::new();
    let anchor = fixture.store.justified_checkpoint.root;
    fixture.tick(16);

    let canonical = fixture.add_block(anchor, 8, 0x01);
    let fork = fixture.add_block(anchor, 8, 0x02);
    let canonical_child = fixture.add_block(canonical, 16, 0x03);
    let fork_child = fixture.add_block(fork, 16, 0x04);
    fixture.store.justified_checkpoint = Checkpoint {
        epoch: 1,
        root: canonical,
    };

    let descendant = Checkpoint {
        epoch: 2,
        root: canonical_child,
    };
    let conflicting = Checkpoint {
        epoch: 2,
        root: fork_child,
    };

    // Slot 17 is within the first SAFE_SLOTS_TO_UPDATE_JUSTIFIED slots of epoch 2
    fixture.tick(17);
    assert!(
        fixture
            .store
            .should_update_justified_checkpoint(conflicting)
            .expect("known roots")
    );

    fixture.tick(20);
    assert!(
        !fixture
            .store
            .should_update_justified_checkpoint(conflicting)
            .expect("known roots")
    );
    assert!(
        fixture
            .store
            .should_update_justified_checkpoint(descendant)
            .expect("known roots")
    );

    // Held back as the best justified checkpoint, then adopted on the next epoch boundary
    fixture.store.best_justified_checkpoint = conflicting;
    fixture.tick(23);
    assert_eq!(fixture.store.justified_checkpoint.root, canonical);
    fixture.tick(24);
    assert_eq!(fixture.store.justified_checkpoint, conflicting);
}

#[test]
fn test_unknown_roots_are_not_invalid() {
    let mut fixture = Fixture::new();
    let anchor = fixture.store.justified_checkpoint.root;
    fixture.tick(2);

    // Votes for a block the store has not received yet
    let (block, post_state) = fixture.block(anchor, 1, 0x01);
    let attestations = fixture
        .harness
        .build_attestations(&post_state, 1, block.message.tree_hash_root(), |_| true)
        .expect("attestations");

    let err = on_attestation(&mut fixture.store, &attestations[0]).expect_err("unknown block");
    assert!(matches!(err, ForkChoiceError::UnknownBlock(_)));
    assert!(err.is_retryable());
    assert!(fixture.store.latest_messages.is_empty());

    // Once the block arrives the same votes are accepted
    on_block(&mut fixture.store, &block).expect("valid block");
    on_attestation(&mut fixture.store, &attestations[0]).expect("valid attestation");
    assert!(!fixture.store.latest_messages.is_empty());
}
