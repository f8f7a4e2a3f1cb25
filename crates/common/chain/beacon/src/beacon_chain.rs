use std::sync::Arc;

use alloy_primitives::B256;
use keel_consensus_beacon::{
    attestation::Attestation,
    phase0::{beacon_block::SignedBeaconBlock, beacon_state::BeaconState},
};
use keel_consensus_misc::checkpoint::Checkpoint;
use keel_fork_choice::{
    errors::ForkChoiceError,
    handlers::{on_attestation, on_block, on_tick},
    store::{Store, get_forkchoice_store},
};
use keel_network_spec::{networks::BeaconNetworkSpec, preset::Preset};
use tokio::sync::RwLock;
use tracing::warn;

/// Head and checkpoints read together under a single lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainSnapshot {
    pub head: B256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
    pub time: u64,
}

/// BeaconChain is the main struct which manages the nodes local beacon chain.
///
/// Blocks, attestations and ticks are applied one at a time through the write lock. Readers share
/// the read lock and never see a half-applied message.
pub struct BeaconChain<P: Preset> {
    pub store: RwLock<Store<P>>,
}

impl<P: Preset> BeaconChain<P> {
    /// Creates a new instance of `BeaconChain` anchored at `anchor_state`.
    ///
    /// Fails when `spec` was written for a different preset than `P`.
    pub fn new(
        anchor_state: BeaconState<P>,
        spec: Arc<BeaconNetworkSpec>,
    ) -> anyhow::Result<Self> {
        spec.ensure_preset::<P>()?;
        Ok(Self {
            store: RwLock::new(get_forkchoice_store(anchor_state, spec)),
        })
    }

    pub async fn process_block(
        &self,
        signed_block: &SignedBeaconBlock<P>,
    ) -> Result<B256, ForkChoiceError> {
        let mut store = self.store.write().await;
        on_block(&mut store, signed_block).inspect_err(|err| {
            warn!(
                slot = signed_block.message.slot,
                parent_root = ?signed_block.message.parent_root,
                "Rejected block: {err}"
            )
        })
    }

    pub async fn process_attestation(
        &self,
        attestation: &Attestation<P>,
    ) -> Result<(), ForkChoiceError> {
        let mut store = self.store.write().await;
        on_attestation(&mut store, attestation).inspect_err(|err| {
            warn!(
                slot = attestation.data.slot,
                target_epoch = attestation.data.target.epoch,
                "Rejected attestation: {err}"
            )
        })
    }

    pub async fn process_tick(&self, time: u64) -> Result<(), ForkChoiceError> {
        let mut store = self.store.write().await;
        on_tick(&mut store, time)
    }

    pub async fn head(&self) -> Result<B256, ForkChoiceError> {
        self.store.read().await.get_head()
    }

    pub async fn snapshot(&self) -> Result<ChainSnapshot, ForkChoiceError> {
        let store = self.store.read().await;
        Ok(ChainSnapshot {
            head: store.get_head()?,
            justified_checkpoint: store.justified_checkpoint,
            finalized_checkpoint: store.finalized_checkpoint,
            time: store.time,
        })
    }

    pub async fn justified_checkpoint(&self) -> Checkpoint {
        self.store.read().await.justified_checkpoint
    }

    pub async fn finalized_checkpoint(&self) -> Checkpoint {
        self.store.read().await.finalized_checkpoint
    }

    /// Post-state of the block with ``root``, if the chain has accepted it.
    pub async fn block_state(&self, root: B256) -> Option<BeaconState<P>> {
        self.store.read().await.block_states.get(&root).cloned()
    }
}
