//! The chain engine: single authoritative mutator over chain state.
//!
//! Block acceptance (index insert + UTXO application + archive store) runs as
//! one logical transaction under the write half of a reader/writer lock.
//! Queries take the read half and therefore always observe a consistent
//! snapshot: height, digest, and totals from the same tip. Verification and
//! pruning both run under the write lock, which is what serializes eviction
//! against an in-flight verification task.
//!
//! There is no ambient global: every engine is constructed explicitly and
//! torn down by drop, so tests can run isolated instances side by side.

use parking_lot::{RwLock, RwLockReadGuard};

use tracing::info;

use keel_chain::block_index::BlockIndex;
use keel_chain::prune::{PruneManager, RetentionMode};
use keel_chain::utxo_set::UtxoSet;
use keel_chain::verifier::ChainVerifier;
use keel_core::archive::{BlockArchive, MemoryArchive};
use keel_core::error::{ArchiveError, ConsensusError, KeelError, VerifyError};
use keel_core::genesis;
use keel_core::types::{Block, BlockUndo, Hash256};

use crate::archive::RocksArchive;
use crate::config::EngineConfig;

/// Result of a successful block acceptance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AcceptedBlock {
    /// Hash of the accepted block.
    pub hash: Hash256,
    /// Height it was connected at.
    pub height: u64,
    /// Unspent outputs the block created.
    pub utxos_created: usize,
    /// Pre-existing unspent outputs the block consumed.
    pub utxos_spent: usize,
}

/// Everything behind the lock.
pub(crate) struct ChainState {
    pub(crate) index: BlockIndex,
    pub(crate) utxo: UtxoSet,
    pub(crate) archive: Box<dyn BlockArchive>,
    pub(crate) prune: PruneManager,
}

/// The pruned chain-state and verification engine.
pub struct ChainEngine {
    state: RwLock<ChainState>,
}

impl ChainEngine {
    /// Open an engine with a persistent archive at the configured path.
    pub fn open(config: &EngineConfig) -> Result<Self, KeelError> {
        let archive = RocksArchive::open(config.db_path())?;
        Self::bootstrap(Box::new(archive), config.retention())
    }

    /// Build an ephemeral engine over an in-memory archive.
    pub fn in_memory(mode: RetentionMode) -> Result<Self, KeelError> {
        Self::bootstrap(Box::new(MemoryArchive::new()), mode)
    }

    fn bootstrap(
        mut archive: Box<dyn BlockArchive>,
        mode: RetentionMode,
    ) -> Result<Self, KeelError> {
        let mut index = BlockIndex::new();
        let mut utxo = UtxoSet::new();
        let prune = PruneManager::new(mode);

        match archive.highest_stored() {
            None => {
                let g = genesis::genesis_block();
                index.insert(g.header.clone())?;
                archive.store(0, g, &BlockUndo::empty())?;
                info!(hash = %genesis::genesis_hash(), "connected genesis block");
            }
            Some(top) => {
                // Rebuilding in-memory state needs the full body history; a
                // pruned archive would also need a persisted chain-state
                // snapshot, which is the startup collaborator's concern.
                if archive.lowest_retained() > 0 {
                    return Err(ArchiveError::Storage(
                        "pruned archive cannot be replayed without a chain-state snapshot"
                            .into(),
                    )
                    .into());
                }
                for height in 0..=top {
                    let block = archive.block(height)?.ok_or_else(|| {
                        ArchiveError::Storage(format!("missing block {height} during replay"))
                    })?;
                    index.insert(block.header.clone())?;
                    if height > 0 {
                        utxo.apply_block(&block, height)?;
                    }
                }
                info!(height = top, "replayed chain from archive");
            }
        }

        Ok(Self {
            state: RwLock::new(ChainState {
                index,
                utxo,
                archive,
                prune,
            }),
        })
    }

    pub(crate) fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read()
    }

    /// Accept a block extending the best tip.
    ///
    /// Index insertion, UTXO application, and archive storage succeed or
    /// fail together; on any failure the chain state is exactly as before.
    /// A successful acceptance then lets the prune manager re-evaluate
    /// eviction for the new tip.
    pub fn accept_block(&self, block: &Block) -> Result<AcceptedBlock, KeelError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let (tip_hash, tip_height) = match state.index.best_tip() {
            Some(tip) => (tip.hash, tip.height),
            None => {
                return Err(ArchiveError::Storage("engine has no genesis".into()).into());
            }
        };
        if block.header.prev_hash != tip_hash {
            return Err(ConsensusError::NotExtendingTip {
                expected: tip_hash.to_string(),
                got: block.header.prev_hash.to_string(),
            }
            .into());
        }

        state.index.validate(&block.header)?;

        let height = tip_height + 1;
        let undo = state.utxo.apply_block(block, height)?;
        let utxos_created = undo.created.len();
        let utxos_spent = undo.spent.len();

        if let Err(e) = state.archive.store(height, block, &undo) {
            state.utxo.undo_block(&undo)?;
            return Err(e.into());
        }
        let hash = match state.index.insert(block.header.clone()) {
            Ok(hash) => hash,
            Err(e) => {
                state.utxo.undo_block(&undo)?;
                return Err(e.into());
            }
        };

        state.prune.on_new_tip(height, state.archive.as_mut())?;

        info!(
            height,
            %hash,
            txs = block.transactions.len(),
            utxos_created,
            utxos_spent,
            "accepted block"
        );
        Ok(AcceptedBlock {
            hash,
            height,
            utxos_created,
            utxos_spent,
        })
    }

    /// Re-verify the most recent `block_count` blocks at `checklevel`.
    ///
    /// Runs under the write lock: levels 3 and 4 transiently mutate the UTXO
    /// set, and holding the writer also keeps eviction from racing the task.
    pub fn verify_chain(&self, checklevel: i64, block_count: i64) -> Result<bool, VerifyError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let floor = state.prune.prune_height();
        ChainVerifier::new(&state.index, &mut state.utxo, state.archive.as_ref(), floor)
            .verify(checklevel, block_count)
    }

    /// Operator-requested manual prune of bodies up to and including `height`.
    pub fn prune_to(&self, height: u64) -> Result<u64, KeelError> {
        let mut guard = self.state.write();
        let state = &mut *guard;
        let tip_height = state.index.best_tip().map(|t| t.height).unwrap_or(0);
        let freed = state
            .prune
            .request_manual_prune(height, tip_height, state.archive.as_mut())?;
        Ok(freed)
    }

    /// Current best tip as `(height, hash)`.
    pub fn tip(&self) -> Option<(u64, Hash256)> {
        let state = self.state.read();
        state.index.best_tip().map(|tip| (tip.height, tip.hash))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::constants::COIN;
    use keel_core::merkle;
    use keel_core::types::{BlockHeader, OutPoint, Transaction, TxInput, TxOutput};

    fn lk(seed: u8) -> Hash256 {
        Hash256([seed; 32])
    }

    fn coinbase(value: u64, key: Hash256, height: u64) -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev_out: OutPoint::null(),
                signature: height.to_le_bytes().to_vec(),
                public_key: vec![],
            }],
            outputs: vec![TxOutput { value, locking_key: key }],
            lock_time: height,
        }
    }

    fn next_block(engine: &ChainEngine, txs: Vec<Transaction>) -> Block {
        let (height, prev) = engine.tip().unwrap();
        let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: prev,
                merkle_root: merkle::merkle_root(&txids),
                timestamp: genesis::GENESIS_TIMESTAMP + (height + 1) * 60,
                bits: genesis::GENESIS_BITS,
                nonce: 0,
            },
            transactions: txs,
        }
    }

    fn grow(engine: &ChainEngine, blocks: u64) {
        for _ in 0..blocks {
            let height = engine.tip().unwrap().0 + 1;
            let block = next_block(engine, vec![coinbase(50 * COIN, lk(0xAA), height)]);
            engine.accept_block(&block).unwrap();
        }
    }

    #[test]
    fn fresh_engine_sits_on_genesis() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        let (height, hash) = engine.tip().unwrap();
        assert_eq!(height, 0);
        assert_eq!(hash, genesis::genesis_hash());
        // Genesis output never enters the set.
        assert_eq!(engine.read_state().utxo.len(), 0);
    }

    #[test]
    fn accept_extends_tip_and_set() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        let block = next_block(&engine, vec![coinbase(50 * COIN, lk(1), 1)]);
        let accepted = engine.accept_block(&block).unwrap();

        assert_eq!(accepted.height, 1);
        assert_eq!(accepted.utxos_created, 1);
        assert_eq!(accepted.utxos_spent, 0);
        assert_eq!(engine.tip().unwrap(), (1, block.header.hash()));
        assert_eq!(engine.read_state().utxo.len(), 1);
    }

    #[test]
    fn non_tip_block_rejected() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        grow(&engine, 2);

        let mut stale = next_block(&engine, vec![coinbase(50 * COIN, lk(2), 3)]);
        stale.header.prev_hash = genesis::genesis_hash();
        let err = engine.accept_block(&stale).unwrap_err();
        assert!(matches!(
            err,
            KeelError::Consensus(ConsensusError::NotExtendingTip { .. })
        ));
        assert_eq!(engine.tip().unwrap().0, 2);
    }

    #[test]
    fn failed_application_leaves_state_unchanged() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        grow(&engine, 1);
        let before = engine.read_state().utxo.summary().unwrap();

        // Block spending an unknown output: UTXO application fails.
        let bad_spend = Transaction {
            version: 1,
            inputs: vec![TxInput {
                prev_out: OutPoint { txid: lk(0x7E), vout: 0 },
                signature: vec![0; 64],
                public_key: vec![0; 32],
            }],
            outputs: vec![TxOutput { value: 1, locking_key: lk(3) }],
            lock_time: 0,
        };
        let block = next_block(&engine, vec![coinbase(50 * COIN, lk(2), 2), bad_spend]);
        assert!(engine.accept_block(&block).is_err());

        assert_eq!(engine.tip().unwrap().0, 1);
        assert_eq!(engine.read_state().utxo.summary().unwrap(), before);
        assert!(engine.read_state().archive.block(2).unwrap().is_none());
    }

    #[test]
    fn verify_chain_full_depth_passes() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        grow(&engine, 12);
        for level in 0..=4 {
            assert!(engine.verify_chain(level, 0).unwrap(), "level {level}");
        }
    }

    #[test]
    fn verify_chain_rejects_bad_arguments() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        assert!(matches!(
            engine.verify_chain(-1, 0),
            Err(VerifyError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.verify_chain(5, 0),
            Err(VerifyError::InvalidArgument(_))
        ));
        assert!(matches!(
            engine.verify_chain(0, -1),
            Err(VerifyError::InvalidArgument(_))
        ));
    }

    #[test]
    fn automatic_pruning_kicks_in_as_chain_grows() {
        // Tiny byte budget so eviction starts as soon as the safety margin
        // allows.
        let engine =
            ChainEngine::in_memory(RetentionMode::Automatic { target_bytes: 4096 }).unwrap();
        grow(&engine, 320);

        let state = engine.read_state();
        assert!(state.prune.prune_height() > 0);
        assert!(state.archive.block(0).unwrap().is_none());
        // The retained window near the tip is intact.
        let tip = state.index.best_tip().unwrap().height;
        assert!(state.archive.block(tip).unwrap().is_some());
        drop(state);

        // Deep verification now hard-fails for levels needing evicted data.
        assert!(matches!(
            engine.verify_chain(3, 0),
            Err(VerifyError::PrunedDataUnavailable { .. })
        ));
        assert!(engine.verify_chain(0, 0).unwrap());
    }

    #[test]
    fn manual_prune_only_on_request() {
        let engine = ChainEngine::in_memory(RetentionMode::Manual).unwrap();
        grow(&engine, 310);
        assert_eq!(engine.read_state().prune.prune_height(), 0);

        let freed = engine.prune_to(10).unwrap();
        assert!(freed > 0);
        let state = engine.read_state();
        assert_eq!(state.prune.prune_height(), 11);
        assert!(state.archive.block(10).unwrap().is_none());
        assert!(state.archive.block(11).unwrap().is_some());
    }

    #[test]
    fn disabled_mode_rejects_manual_prune() {
        let engine = ChainEngine::in_memory(RetentionMode::Disabled).unwrap();
        grow(&engine, 1);
        assert!(engine.prune_to(0).is_err());
    }
}
