//! Authoritative unspent-output set.
//!
//! The set is a `BTreeMap` keyed by outpoint, so iteration order is the
//! lexicographic `(txid, vout)` order. That ordering is contractual: the scan
//! tie-break, the canonical serialization, and therefore the digest all
//! depend on it.
//!
//! `apply_block` is all-or-nothing: every spend is resolved against the
//! current set plus in-block creations in a read-only pass before anything
//! is committed, so a failing block leaves the set untouched.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use keel_core::error::{CodecError, ConsensusError};
use keel_core::types::{Block, BlockUndo, Hash256, OutPoint, UtxoEntry};

/// Aggregate view of the set at a point in time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UtxoSummary {
    /// Distinct transactions with at least one unspent output.
    pub tx_count: u64,
    /// Number of unspent outputs.
    pub output_count: u64,
    /// Exact sum of all unspent values, in motes.
    pub total_amount: u64,
    /// Length in bytes of the canonical serialization.
    pub byte_size: u64,
    /// SHA-256 over the canonical serialization.
    pub digest: Hash256,
}

/// The unspent transaction output set.
#[derive(Clone, Default)]
pub struct UtxoSet {
    entries: BTreeMap<OutPoint, UtxoEntry>,
}

impl UtxoSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unspent outputs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a single unspent output.
    pub fn lookup(&self, outpoint: &OutPoint) -> Option<&UtxoEntry> {
        self.entries.get(outpoint)
    }

    /// Apply a block's spends and creations atomically.
    ///
    /// Outputs created earlier in the block are spendable by later
    /// transactions in the same block; such pairs cancel and appear in
    /// neither list of the returned undo record. The genesis convention is
    /// handled by the caller (genesis is never applied to the set).
    ///
    /// # Errors
    ///
    /// Structural problems ([`ConsensusError::EmptyBlock`],
    /// [`ConsensusError::FirstTxNotCoinbase`],
    /// [`ConsensusError::MultipleCoinbase`]), unknown or doubly spent
    /// inputs, and pre-existing outpoints all fail the whole block with the
    /// set unchanged.
    pub fn apply_block(
        &mut self,
        block: &Block,
        height: u64,
    ) -> Result<BlockUndo, ConsensusError> {
        match block.transactions.first() {
            None => return Err(ConsensusError::EmptyBlock),
            Some(first) if !first.is_coinbase() => {
                return Err(ConsensusError::FirstTxNotCoinbase);
            }
            Some(_) => {}
        }

        // Dry run: resolve every spend and creation without touching the set.
        let mut created: BTreeMap<OutPoint, UtxoEntry> = BTreeMap::new();
        let mut spent: Vec<(OutPoint, UtxoEntry)> = Vec::new();

        for (tx_index, tx) in block.transactions.iter().enumerate() {
            if tx.is_coinbase() {
                if tx_index != 0 {
                    return Err(ConsensusError::MultipleCoinbase);
                }
            } else {
                for input in &tx.inputs {
                    let op = input.prev_out;
                    if created.remove(&op).is_some() {
                        // In-block chain: creation and spend cancel out.
                    } else if spent.iter().any(|(s, _)| *s == op) {
                        return Err(ConsensusError::DoubleSpend(op.to_string()));
                    } else if let Some(entry) = self.entries.get(&op) {
                        spent.push((op, entry.clone()));
                    } else {
                        return Err(ConsensusError::MissingUtxo(op.to_string()));
                    }
                }
            }

            let txid = tx.txid()?;
            let is_coinbase = tx.is_coinbase();
            for (vout, output) in tx.outputs.iter().enumerate() {
                let op = OutPoint {
                    txid,
                    vout: vout as u32,
                };
                if self.entries.contains_key(&op) || created.contains_key(&op) {
                    return Err(ConsensusError::DuplicateOutput(op.to_string()));
                }
                created.insert(
                    op,
                    UtxoEntry {
                        value: output.value,
                        locking_key: output.locking_key,
                        height,
                        is_coinbase,
                    },
                );
            }
        }

        // Commit.
        for (op, _) in &spent {
            self.entries.remove(op);
        }
        let created_outpoints: Vec<OutPoint> = created.keys().copied().collect();
        self.entries.extend(created);

        Ok(BlockUndo {
            spent,
            created: created_outpoints,
        })
    }

    /// Reverse a previously applied block using its undo record.
    ///
    /// Like `apply_block`, this is checked before committing: a missing
    /// created outpoint or a restore collision fails with the set unchanged.
    pub fn undo_block(&mut self, undo: &BlockUndo) -> Result<(), ConsensusError> {
        for op in &undo.created {
            if !self.entries.contains_key(op) {
                return Err(ConsensusError::MissingUtxo(op.to_string()));
            }
        }
        for (op, _) in &undo.spent {
            if self.entries.contains_key(op) {
                return Err(ConsensusError::DuplicateOutput(op.to_string()));
            }
        }

        for op in &undo.created {
            self.entries.remove(op);
        }
        for (op, entry) in &undo.spent {
            self.entries.insert(*op, entry.clone());
        }
        Ok(())
    }

    /// All unspent outputs paying `key`, in outpoint order.
    ///
    /// Lazy and deterministic. The iterator borrows the set, so it cannot be
    /// resumed across a mutation; that restriction is the contract, not an
    /// accident.
    pub fn scan_by_locking_key<'a>(
        &'a self,
        key: &'a Hash256,
    ) -> impl Iterator<Item = (&'a OutPoint, &'a UtxoEntry)> + 'a {
        self.entries
            .iter()
            .filter(move |(_, entry)| entry.locking_key == *key)
    }

    /// Iterate the whole set in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (&OutPoint, &UtxoEntry)> {
        self.entries.iter()
    }

    /// Compute the aggregate summary, including the canonical digest.
    ///
    /// The digest is SHA-256 over `bincode(outpoint) || bincode(entry)` for
    /// every pair in ascending outpoint order. Identical sets produce
    /// identical digests regardless of how they were built.
    pub fn summary(&self) -> Result<UtxoSummary, ConsensusError> {
        let mut hasher = Sha256::new();
        let mut byte_size = 0u64;
        let mut total_amount = 0u64;
        let mut tx_count = 0u64;
        let mut last_txid: Option<Hash256> = None;

        for (op, entry) in &self.entries {
            let pair_bytes =
                bincode::encode_to_vec((op, entry), bincode::config::standard())
                    .map_err(|e| CodecError::Encode(e.to_string()))?;
            hasher.update(&pair_bytes);
            byte_size += pair_bytes.len() as u64;
            total_amount = total_amount
                .checked_add(entry.value)
                .ok_or(ConsensusError::ValueOverflow)?;
            // Outpoint order groups outputs of one transaction together.
            if last_txid != Some(op.txid) {
                tx_count += 1;
                last_txid = Some(op.txid);
            }
        }

        Ok(UtxoSummary {
            tx_count,
            output_count: self.entries.len() as u64,
            total_amount,
            byte_size,
            digest: Hash256(hasher.finalize().into()),
        })
    }
}
