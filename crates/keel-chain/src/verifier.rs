//! Multi-level chain re-verification.
//!
//! A verification task re-derives the validity of the most recent
//! `block_count` blocks at a chosen strictness level. Levels are strictly
//! cumulative; each one runs everything below it first:
//!
//! - **0**: header linkage against the index, with no archive or UTXO access.
//! - **1**: block bodies decode, their headers match the index, and the
//!   merkle root commits to the recomputed transaction ids.
//! - **2**: the stored undo record mirrors the block's own spends and
//!   creations (detects undo corruption).
//! - **3**: the live UTXO set is rolled backward through the range and
//!   forward again; the digest must return to its pre-task value. The set is
//!   restored from a snapshot on every exit path, including unwinding.
//! - **4**: while rolling forward, every spend is fully re-executed:
//!   existence, coinbase maturity, signature against the locking key, and
//!   value conservation.
//!
//! When the requested depth reaches below the retention floor, levels 0 and 1
//! clamp to what is retained; levels 2 and above fail with
//! `PrunedDataUnavailable` instead of silently weakening the check.

use tracing::{debug, warn};

use keel_core::archive::BlockArchive;
use keel_core::constants::MAX_BLOCK_SIZE;
use keel_core::crypto;
use keel_core::error::VerifyError;
use keel_core::merkle;
use keel_core::types::{Block, BlockUndo, Hash256, OutPoint, UtxoEntry};

use crate::block_index::BlockIndex;
use crate::utxo_set::UtxoSet;

/// Verification strictness. Each level supersets the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum CheckLevel {
    /// Header linkage only.
    Headers,
    /// Plus transaction-id / merkle commitment.
    Merkle,
    /// Plus undo-record symmetry.
    Undo,
    /// Plus UTXO rollback round trip.
    Rollback,
    /// Plus full spend re-execution.
    Spends,
}

impl CheckLevel {
    /// Parse the caller-supplied level, rejecting anything outside 0..=4.
    pub fn from_arg(level: i64) -> Result<Self, VerifyError> {
        match level {
            0 => Ok(Self::Headers),
            1 => Ok(Self::Merkle),
            2 => Ok(Self::Undo),
            3 => Ok(Self::Rollback),
            4 => Ok(Self::Spends),
            _ => Err(VerifyError::InvalidArgument(
                "checklevel must be >= 0 and <= 4".into(),
            )),
        }
    }
}

/// A single verification pass over the chain state.
///
/// Borrows the index and archive read-only; the UTXO set is borrowed mutably
/// because levels 3 and 4 roll it back transiently. Whatever happens, the set
/// is bit-for-bit identical before and after [`verify`](Self::verify).
pub struct ChainVerifier<'a> {
    index: &'a BlockIndex,
    utxo: &'a mut UtxoSet,
    archive: &'a dyn BlockArchive,
    prune_floor: u64,
}

impl<'a> ChainVerifier<'a> {
    pub fn new(
        index: &'a BlockIndex,
        utxo: &'a mut UtxoSet,
        archive: &'a dyn BlockArchive,
        prune_floor: u64,
    ) -> Self {
        Self {
            index,
            utxo,
            archive,
            prune_floor,
        }
    }

    /// Run a verification task.
    ///
    /// `block_count == 0` means the whole chain. A count deeper than the
    /// chain is clamped to genesis. Returns `Ok(false)` when the chain fails
    /// a check; `Err` only for bad arguments, evicted data at level >= 2, or
    /// archive faults.
    pub fn verify(mut self, checklevel: i64, block_count: i64) -> Result<bool, VerifyError> {
        let level = CheckLevel::from_arg(checklevel)?;
        if block_count < 0 {
            return Err(VerifyError::InvalidArgument("nblocks must be >= 0".into()));
        }

        let Some(tip) = self.index.best_tip() else {
            return Ok(true);
        };
        let tip_height = tip.height;

        let requested = if block_count == 0 {
            tip_height + 1
        } else {
            (block_count as u64).min(tip_height + 1)
        };
        let naive_start = tip_height + 1 - requested;

        let start = if naive_start < self.prune_floor {
            if level >= CheckLevel::Undo {
                return Err(VerifyError::PrunedDataUnavailable {
                    height: naive_start,
                });
            }
            debug!(
                naive_start,
                floor = self.prune_floor,
                "clamping verification range to retained data"
            );
            self.prune_floor
        } else {
            naive_start
        };

        debug!(?level, start, tip_height, "verifying chain");

        if !self.check_headers(start, tip_height) {
            return Ok(false);
        }
        if level >= CheckLevel::Merkle && !self.check_bodies(start, tip_height)? {
            return Ok(false);
        }
        if level >= CheckLevel::Undo && !self.check_undo_records(start, tip_height)? {
            return Ok(false);
        }
        if level >= CheckLevel::Rollback {
            return self.check_rollback(level, start, tip_height);
        }
        Ok(true)
    }

    /// Level 0: every height resolves on the best chain and links to its
    /// parent.
    fn check_headers(&self, start: u64, tip_height: u64) -> bool {
        for height in start..=tip_height {
            let Some(entry) = self.index.entry_at(height) else {
                warn!(height, "no best-chain entry at height");
                return false;
            };
            if entry.header.hash() != entry.hash {
                warn!(height, "indexed hash does not match header");
                return false;
            }
            if height > 0 {
                let Some(parent) = self.index.entry(&entry.header.prev_hash) else {
                    warn!(height, "parent missing from index");
                    return false;
                };
                if parent.height + 1 != height || !self.index.is_on_best_chain(&parent.hash) {
                    warn!(height, "broken parent linkage");
                    return false;
                }
            }
        }
        true
    }

    /// Level 1: bodies decode, match their headers, are structurally sound,
    /// and the merkle root commits to the recomputed txids.
    fn check_bodies(&self, start: u64, tip_height: u64) -> Result<bool, VerifyError> {
        for height in start..=tip_height {
            let block = self.load_block(height)?;
            let Some(entry) = self.index.entry_at(height) else {
                return Ok(false);
            };
            if block.header.hash() != entry.hash {
                warn!(height, "archived body does not match indexed header");
                return Ok(false);
            }
            if !Self::check_block_structure(&block, height) {
                return Ok(false);
            }
            let mut txids = Vec::with_capacity(block.transactions.len());
            for tx in &block.transactions {
                txids.push(tx.txid()?);
            }
            if merkle::merkle_root(&txids) != block.header.merkle_root {
                warn!(height, "merkle root does not commit to transactions");
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_block_structure(block: &Block, height: u64) -> bool {
        let Some(first) = block.transactions.first() else {
            warn!(height, "empty block body");
            return false;
        };
        if !first.is_coinbase() {
            warn!(height, "first transaction is not coinbase");
            return false;
        }
        if block.transactions.iter().skip(1).any(|tx| tx.is_coinbase()) {
            warn!(height, "multiple coinbase transactions");
            return false;
        }
        match block.serialized_size() {
            Ok(size) if size <= MAX_BLOCK_SIZE => true,
            Ok(size) => {
                warn!(height, size, "oversized block body");
                false
            }
            Err(e) => {
                warn!(height, error = %e, "block body failed to serialize");
                false
            }
        }
    }

    /// Level 2: the stored undo record mirrors what the block itself says it
    /// spent and created.
    fn check_undo_records(&self, start: u64, tip_height: u64) -> Result<bool, VerifyError> {
        for height in start..=tip_height {
            let block = self.load_block(height)?;
            let undo = self.load_undo(height)?;
            if height == 0 {
                // Genesis is archived with an empty undo by convention.
                if !undo.spent.is_empty() || !undo.created.is_empty() {
                    warn!("genesis undo record is not empty");
                    return Ok(false);
                }
                continue;
            }
            let (expected_spent, expected_created) = Self::undo_shape(&block)?;
            let actual_spent: Vec<OutPoint> = undo.spent.iter().map(|(op, _)| *op).collect();
            if actual_spent != expected_spent {
                warn!(height, "undo spend list does not match block inputs");
                return Ok(false);
            }
            if undo.created != expected_created {
                warn!(height, "undo creation list does not match block outputs");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Recompute the outpoint shape of a block's undo record: which
    /// outpoints it must have consumed from the pre-block set, and which it
    /// must have inserted. In-block creation/spend pairs cancel, matching
    /// [`UtxoSet::apply_block`].
    fn undo_shape(block: &Block) -> Result<(Vec<OutPoint>, Vec<OutPoint>), VerifyError> {
        let mut created = std::collections::BTreeSet::new();
        let mut spent = Vec::new();
        for tx in &block.transactions {
            if !tx.is_coinbase() {
                for input in &tx.inputs {
                    if !created.remove(&input.prev_out) {
                        spent.push(input.prev_out);
                    }
                }
            }
            let txid = tx.txid()?;
            for vout in 0..tx.outputs.len() {
                created.insert(OutPoint {
                    txid,
                    vout: vout as u32,
                });
            }
        }
        Ok((spent, created.into_iter().collect()))
    }

    /// Levels 3 and 4: roll the set back through the range, then forward,
    /// and require the digest to land exactly where it started.
    ///
    /// The set is restored from a snapshot when the guard drops, so every
    /// exit path (success, check failure, error, panic) leaves it in the
    /// pre-task state.
    fn check_rollback(
        &mut self,
        level: CheckLevel,
        start: u64,
        tip_height: u64,
    ) -> Result<bool, VerifyError> {
        struct Restore<'u> {
            set: &'u mut UtxoSet,
            snapshot: Option<UtxoSet>,
        }
        impl Drop for Restore<'_> {
            fn drop(&mut self) {
                if let Some(snapshot) = self.snapshot.take() {
                    *self.set = snapshot;
                }
            }
        }

        let baseline = self.utxo.summary()?.digest;

        let guard = Restore {
            snapshot: Some(self.utxo.clone()),
            set: &mut *self.utxo,
        };

        // Backward pass, tip first.
        for height in (start..=tip_height).rev() {
            if height == 0 {
                continue; // genesis never entered the set
            }
            let undo = match self.archive.undo(height)? {
                Some(undo) => undo,
                None => return Err(VerifyError::PrunedDataUnavailable { height }),
            };
            if let Err(e) = guard.set.undo_block(&undo) {
                warn!(height, error = %e, "undo data does not revert cleanly");
                return Ok(false);
            }
        }

        // Forward pass, re-deriving what acceptance did.
        for height in start..=tip_height {
            if height == 0 {
                continue;
            }
            let block = match self.archive.block(height)? {
                Some(block) => block,
                None => return Err(VerifyError::PrunedDataUnavailable { height }),
            };
            if level >= CheckLevel::Spends && !Self::check_spends(guard.set, &block, height)? {
                return Ok(false);
            }
            if let Err(e) = guard.set.apply_block(&block, height) {
                warn!(height, error = %e, "block does not reapply cleanly");
                return Ok(false);
            }
        }

        let final_digest = guard.set.summary()?.digest;
        drop(guard);

        if final_digest != baseline {
            warn!("rollback round trip did not restore the digest");
            return Ok(false);
        }
        Ok(true)
    }

    /// Level 4: re-execute each spend against the rolled-back set state.
    fn check_spends(set: &UtxoSet, block: &Block, height: u64) -> Result<bool, VerifyError> {
        // Outputs created earlier in this block, spendable by later txs.
        let mut in_block: std::collections::HashMap<OutPoint, UtxoEntry> =
            std::collections::HashMap::new();

        for tx in &block.transactions {
            if !tx.is_coinbase() {
                let mut in_value: u64 = 0;
                for (i, input) in tx.inputs.iter().enumerate() {
                    let entry = match in_block
                        .get(&input.prev_out)
                        .or_else(|| set.lookup(&input.prev_out))
                    {
                        Some(entry) => entry.clone(),
                        None => {
                            warn!(height, outpoint = %input.prev_out, "spend of unknown output");
                            return Ok(false);
                        }
                    };
                    if !entry.is_mature(height) {
                        warn!(height, outpoint = %input.prev_out, "immature coinbase spend");
                        return Ok(false);
                    }
                    if let Err(e) = crypto::verify_input(tx, i, &entry.locking_key) {
                        warn!(height, input = i, error = %e, "spend authorization failed");
                        return Ok(false);
                    }
                    in_value = match in_value.checked_add(entry.value) {
                        Some(v) => v,
                        None => {
                            warn!(height, "input value overflow");
                            return Ok(false);
                        }
                    };
                }
                let Some(out_value) = tx.total_output_value() else {
                    warn!(height, "output value overflow");
                    return Ok(false);
                };
                if out_value > in_value {
                    warn!(height, in_value, out_value, "outputs exceed inputs");
                    return Ok(false);
                }
            }

            let txid = tx.txid()?;
            let is_coinbase = tx.is_coinbase();
            for (vout, output) in tx.outputs.iter().enumerate() {
                in_block.insert(
                    OutPoint {
                        txid,
                        vout: vout as u32,
                    },
                    UtxoEntry {
                        value: output.value,
                        locking_key: output.locking_key,
                        height,
                        is_coinbase,
                    },
                );
            }
        }
        Ok(true)
    }

    fn load_block(&self, height: u64) -> Result<Block, VerifyError> {
        self.archive
            .block(height)?
            .ok_or(VerifyError::PrunedDataUnavailable { height })
    }

    fn load_undo(&self, height: u64) -> Result<BlockUndo, VerifyError> {
        self.archive
            .undo(height)?
            .ok_or(VerifyError::PrunedDataUnavailable { height })
    }
}

/// Convenience wrapper so callers can keep a `Hash256` digest comparison in
/// one place when asserting restoration in tests.
pub fn utxo_digest(set: &UtxoSet) -> Option<Hash256> {
    set.summary().ok().map(|s| s.digest)
}
