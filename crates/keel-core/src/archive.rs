//! Block and undo data archive.
//!
//! The archive owns the serialized block bodies and undo records that pruning
//! is allowed to discard. Headers are not archived; they live in the block
//! index and survive eviction. [`MemoryArchive`] backs tests; the production
//! engine uses the RocksDB implementation in keel-node.

use std::collections::BTreeMap;

use crate::error::{ArchiveError, CodecError};
use crate::types::{Block, BlockUndo};

/// Storage seam for block bodies and undo data, keyed by height.
///
/// Implementations report exact retained byte counts so the prune policy can
/// be enforced against real storage size, and evict contiguously from the
/// oldest height upward so the retained range is always `lowest_retained()`
/// through the tip.
pub trait BlockArchive: Send + Sync {
    /// Store a block body and its undo record at the given height.
    fn store(&mut self, height: u64, block: &Block, undo: &BlockUndo) -> Result<(), ArchiveError>;

    /// Load the block body at `height`. `None` if evicted or never stored.
    fn block(&self, height: u64) -> Result<Option<Block>, ArchiveError>;

    /// Load the undo record at `height`. `None` if evicted or never stored.
    fn undo(&self, height: u64) -> Result<Option<BlockUndo>, ArchiveError>;

    /// Discard bodies and undo data for all heights below `height`.
    ///
    /// Returns the number of bytes freed. Raises the retention floor even if
    /// nothing was stored in the range.
    fn evict_below(&mut self, height: u64) -> Result<u64, ArchiveError>;

    /// Total bytes of retained block and undo data.
    fn retained_bytes(&self) -> u64;

    /// Lowest height whose body is still guaranteed retained (0 = nothing
    /// has ever been evicted).
    fn lowest_retained(&self) -> u64;

    /// Highest height with a stored body, if any.
    fn highest_stored(&self) -> Option<u64>;
}

fn encode<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, ArchiveError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CodecError::Encode(e.to_string()).into())
}

fn decode<T: bincode::Decode<()>>(bytes: &[u8]) -> Result<T, ArchiveError> {
    bincode::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|e| CodecError::Decode(e.to_string()).into())
}

/// In-memory archive for tests and ephemeral engines.
///
/// Holds the same serialized bytes a persistent archive would, so byte
/// accounting behaves identically.
#[derive(Default)]
pub struct MemoryArchive {
    blocks: BTreeMap<u64, Vec<u8>>,
    undo: BTreeMap<u64, Vec<u8>>,
    bytes: u64,
    floor: u64,
}

impl MemoryArchive {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BlockArchive for MemoryArchive {
    fn store(&mut self, height: u64, block: &Block, undo: &BlockUndo) -> Result<(), ArchiveError> {
        let block_bytes = encode(block)?;
        let undo_bytes = encode(undo)?;
        self.bytes += (block_bytes.len() + undo_bytes.len()) as u64;
        if let Some(old) = self.blocks.insert(height, block_bytes) {
            self.bytes -= old.len() as u64;
        }
        if let Some(old) = self.undo.insert(height, undo_bytes) {
            self.bytes -= old.len() as u64;
        }
        Ok(())
    }

    fn block(&self, height: u64) -> Result<Option<Block>, ArchiveError> {
        self.blocks.get(&height).map(|b| decode(b)).transpose()
    }

    fn undo(&self, height: u64) -> Result<Option<BlockUndo>, ArchiveError> {
        self.undo.get(&height).map(|b| decode(b)).transpose()
    }

    fn evict_below(&mut self, height: u64) -> Result<u64, ArchiveError> {
        let mut freed = 0u64;
        let doomed: Vec<u64> = self.blocks.range(..height).map(|(h, _)| *h).collect();
        for h in doomed {
            if let Some(b) = self.blocks.remove(&h) {
                freed += b.len() as u64;
            }
            if let Some(u) = self.undo.remove(&h) {
                freed += u.len() as u64;
            }
        }
        self.bytes -= freed;
        self.floor = self.floor.max(height);
        Ok(freed)
    }

    fn retained_bytes(&self) -> u64 {
        self.bytes
    }

    fn lowest_retained(&self) -> u64 {
        self.floor
    }

    fn highest_stored(&self) -> Option<u64> {
        self.blocks.keys().next_back().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

    fn block_at(seed: u8) -> Block {
        Block {
            header: BlockHeader {
                version: 1,
                prev_hash: Hash256([seed; 32]),
                merkle_root: Hash256::ZERO,
                timestamp: 1_000_000 + seed as u64,
                bits: 0x207f_ffff,
                nonce: 0,
            },
            transactions: vec![Transaction {
                version: 1,
                inputs: vec![TxInput {
                    prev_out: OutPoint::null(),
                    signature: vec![seed],
                    public_key: vec![],
                }],
                outputs: vec![TxOutput { value: 50, locking_key: Hash256([seed; 32]) }],
                lock_time: 0,
            }],
        }
    }

    #[test]
    fn fresh_archive_is_empty() {
        let archive = MemoryArchive::new();
        assert_eq!(archive.retained_bytes(), 0);
        assert_eq!(archive.lowest_retained(), 0);
        assert_eq!(archive.highest_stored(), None);
        assert!(archive.block(0).unwrap().is_none());
        assert!(archive.undo(0).unwrap().is_none());
    }

    #[test]
    fn store_and_load_round_trip() {
        let mut archive = MemoryArchive::new();
        let block = block_at(1);
        archive.store(0, &block, &BlockUndo::empty()).unwrap();

        assert_eq!(archive.block(0).unwrap(), Some(block));
        assert_eq!(archive.undo(0).unwrap(), Some(BlockUndo::empty()));
        assert!(archive.retained_bytes() > 0);
        assert_eq!(archive.highest_stored(), Some(0));
    }

    #[test]
    fn restore_at_same_height_does_not_double_count() {
        let mut archive = MemoryArchive::new();
        archive.store(0, &block_at(1), &BlockUndo::empty()).unwrap();
        let once = archive.retained_bytes();
        archive.store(0, &block_at(1), &BlockUndo::empty()).unwrap();
        assert_eq!(archive.retained_bytes(), once);
    }

    #[test]
    fn evict_below_frees_bytes_and_raises_floor() {
        let mut archive = MemoryArchive::new();
        for h in 0..5 {
            archive.store(h, &block_at(h as u8), &BlockUndo::empty()).unwrap();
        }
        let before = archive.retained_bytes();

        let freed = archive.evict_below(3).unwrap();
        assert!(freed > 0);
        assert_eq!(archive.retained_bytes(), before - freed);
        assert_eq!(archive.lowest_retained(), 3);
        assert!(archive.block(2).unwrap().is_none());
        assert!(archive.block(3).unwrap().is_some());
        assert_eq!(archive.highest_stored(), Some(4));
    }

    #[test]
    fn evict_is_idempotent() {
        let mut archive = MemoryArchive::new();
        for h in 0..3 {
            archive.store(h, &block_at(h as u8), &BlockUndo::empty()).unwrap();
        }
        archive.evict_below(2).unwrap();
        let freed_again = archive.evict_below(2).unwrap();
        assert_eq!(freed_again, 0);
        assert_eq!(archive.lowest_retained(), 2);
    }

    #[test]
    fn floor_never_moves_backward() {
        let mut archive = MemoryArchive::new();
        for h in 0..4 {
            archive.store(h, &block_at(h as u8), &BlockUndo::empty()).unwrap();
        }
        archive.evict_below(3).unwrap();
        archive.evict_below(1).unwrap();
        assert_eq!(archive.lowest_retained(), 3);
    }

    #[test]
    fn evicting_everything_empties_accounting() {
        let mut archive = MemoryArchive::new();
        for h in 0..4 {
            archive.store(h, &block_at(h as u8), &BlockUndo::empty()).unwrap();
        }
        archive.evict_below(4).unwrap();
        assert_eq!(archive.retained_bytes(), 0);
        assert_eq!(archive.highest_stored(), None);
    }
}
