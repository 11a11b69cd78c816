//! Read-only query surface.
//!
//! `QueryService` composes the engine's components into the four externally
//! observed operations. It owns no state of its own; every call takes one
//! read snapshot, so a summary never mixes pre- and post-block values. All
//! amounts cross this boundary as fixed 8-decimal strings; floats appear
//! only for difficulty, which is presentational by definition.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use keel_core::amount::format_motes;
use keel_core::chainwork;
use keel_core::crypto::KeyPair;
use keel_core::error::{KeelError, QueryError, VerifyError};
use keel_core::types::Hash256;

use keel_chain::block_index::HashOrHeight;

use crate::engine::ChainEngine;

/// Pruning fields of [`ChainSummary`]; present only when retention is active.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruningInfo {
    /// Lowest height whose block body is still retained.
    pub prune_height: u64,
    /// Whether eviction is byte-budget driven rather than operator driven.
    pub automatic: bool,
    /// The byte budget, in automatic mode only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_bytes: Option<u64>,
}

/// Snapshot of the chain tip and retention state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainSummary {
    /// Best block hash as hex.
    pub best_block_hash: String,
    /// Best chain height.
    pub height: u64,
    /// Cumulative chainwork as 64 hex nibbles.
    pub chainwork: String,
    /// Difficulty derived from the tip's compact target.
    pub difficulty: f64,
    /// Median timestamp of the last 11 blocks.
    pub median_time: u64,
    /// Bytes of retained block and undo data.
    pub size_on_disk: u64,
    /// Retention state; absent when pruning is disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pruning: Option<PruningInfo>,
}

/// Snapshot of the UTXO set, tied to the tip it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoSetInfo {
    /// Height the snapshot describes.
    pub height: u64,
    /// Hash of the block at that height.
    pub best_block_hash: String,
    /// Distinct transactions with unspent outputs.
    pub tx_count: u64,
    /// Number of unspent outputs.
    pub output_count: u64,
    /// Exact total, fixed 8-decimal KEEL.
    pub total_amount: String,
    /// Canonical serialization length in bytes.
    pub byte_size: u64,
    /// Canonical set digest as hex.
    pub digest: String,
}

/// A matching unspent output for a private key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UtxoByKey {
    /// Output value, fixed 8-decimal KEEL.
    pub amount: String,
    /// Height of the block that created the output.
    pub height: u64,
    /// Transaction id that created the output, as hex.
    pub txid: String,
}

/// Full header view with derived fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeaderInfo {
    /// Header hash as hex.
    pub hash: String,
    /// Height on the chain.
    pub height: u64,
    /// Confirmations from the best tip; 0 off the best chain.
    pub confirmations: u64,
    /// Parent hash as hex; absent for genesis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_block_hash: Option<String>,
    /// Merkle root as hex.
    pub merkle_root: String,
    /// Protocol version.
    pub version: u32,
    /// Version as 8 hex digits.
    pub version_hex: String,
    /// Block timestamp (unix seconds).
    pub time: u64,
    /// Median timestamp of the trailing 11 blocks.
    pub median_time: u64,
    /// Proof-of-work nonce.
    pub nonce: u32,
    /// Compact difficulty target as 8 hex digits.
    pub bits: String,
    /// Difficulty derived from `bits`.
    pub difficulty: f64,
    /// Cumulative chainwork as 64 hex nibbles.
    pub chainwork: String,
}

/// Read-only facade over a [`ChainEngine`].
#[derive(Clone)]
pub struct QueryService {
    engine: Arc<ChainEngine>,
}

impl QueryService {
    pub fn new(engine: Arc<ChainEngine>) -> Self {
        Self { engine }
    }

    /// Best tip, chainwork, median time, and retention state in one snapshot.
    pub fn chain_summary(&self) -> Result<ChainSummary, KeelError> {
        let state = self.engine.read_state();
        let tip = state
            .index
            .best_tip()
            .ok_or_else(|| QueryError::UnknownBlock("empty chain".into()))?;

        let pruning = state.prune.is_pruned().then(|| PruningInfo {
            prune_height: state.prune.prune_height(),
            automatic: state.prune.automatic(),
            target_bytes: state.prune.target_bytes(),
        });

        Ok(ChainSummary {
            best_block_hash: tip.hash.to_string(),
            height: tip.height,
            chainwork: chainwork::work_to_hex(&tip.chainwork),
            difficulty: chainwork::difficulty_from_bits(tip.header.bits),
            median_time: state
                .index
                .median_time_past(&tip.hash)
                .unwrap_or(tip.header.timestamp),
            size_on_disk: state.archive.retained_bytes(),
            pruning,
        })
    }

    /// UTXO set aggregates for the current tip.
    ///
    /// Height, hash, totals, and digest all describe the same snapshot; the
    /// read lock is held across the whole computation.
    pub fn utxo_set_summary(&self) -> Result<UtxoSetInfo, KeelError> {
        let state = self.engine.read_state();
        let tip = state
            .index
            .best_tip()
            .ok_or_else(|| QueryError::UnknownBlock("empty chain".into()))?;
        let summary = state.utxo.summary()?;

        Ok(UtxoSetInfo {
            height: tip.height,
            best_block_hash: tip.hash.to_string(),
            tx_count: summary.tx_count,
            output_count: summary.output_count,
            total_amount: format_motes(summary.total_amount),
            byte_size: summary.byte_size,
            digest: summary.digest.to_string(),
        })
    }

    /// Find the first unspent output paying the key derived from
    /// `private_key_bytes`.
    ///
    /// Scan order is the set's outpoint order, which is the documented
    /// tie-break when several outputs pay the same key. `NoMatchingUtxo` is
    /// an expected outcome (a node that has not yet applied the block
    /// that pays the key) and distinct from malformed key material.
    pub fn utxo_by_key(&self, private_key_bytes: &[u8]) -> Result<UtxoByKey, QueryError> {
        let keypair =
            KeyPair::from_slice(private_key_bytes).map_err(|_| QueryError::InvalidKeyEncoding)?;
        let locking_key = keypair.public_key().locking_key();

        let state = self.engine.read_state();
        let (outpoint, entry) = state
            .utxo
            .scan_by_locking_key(&locking_key)
            .next()
            .ok_or(QueryError::NoMatchingUtxo)?;

        Ok(UtxoByKey {
            amount: format_motes(entry.value),
            height: entry.height,
            txid: outpoint.txid.to_string(),
        })
    }

    /// Header fields plus derived confirmations for a block reference.
    pub fn header(&self, target: HashOrHeight) -> Result<HeaderInfo, QueryError> {
        let state = self.engine.read_state();
        let entry = state.index.lookup(target).ok_or_else(|| {
            QueryError::UnknownBlock(match target {
                HashOrHeight::Hash(hash) => hash.to_string(),
                HashOrHeight::Height(height) => height.to_string(),
            })
        })?;

        Ok(HeaderInfo {
            hash: entry.hash.to_string(),
            height: entry.height,
            confirmations: state.index.confirmations(&entry.hash),
            previous_block_hash: (entry.height > 0)
                .then(|| entry.header.prev_hash.to_string()),
            merkle_root: entry.header.merkle_root.to_string(),
            version: entry.header.version,
            version_hex: entry.header.version_hex(),
            time: entry.header.timestamp,
            median_time: state
                .index
                .median_time_past(&entry.hash)
                .unwrap_or(entry.header.timestamp),
            nonce: entry.header.nonce,
            bits: format!("{:08x}", entry.header.bits),
            difficulty: chainwork::difficulty_from_bits(entry.header.bits),
            chainwork: chainwork::work_to_hex(&entry.chainwork),
        })
    }

    /// Convenience for transports that carry the block hash as text.
    pub fn header_by_hex(&self, hash_hex: &str) -> Result<HeaderInfo, QueryError> {
        let hash = Hash256::from_hex(hash_hex)
            .ok_or_else(|| QueryError::UnknownBlock(hash_hex.to_string()))?;
        self.header(HashOrHeight::Hash(hash))
    }

    /// Re-verify the chain; see [`ChainEngine::verify_chain`].
    pub fn verify_chain(&self, checklevel: i64, block_count: i64) -> Result<bool, VerifyError> {
        self.engine.verify_chain(checklevel, block_count)
    }
}
