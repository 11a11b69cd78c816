//! In-memory block header index.
//!
//! Headers form a tree linked by `prev_hash`; the best chain is the path of
//! maximal cumulative chainwork. Headers are never removed (pruning discards
//! bodies and undo data, not headers), so lookups by hash work for any block
//! ever accepted, while height lookups resolve against the best chain only.

use std::collections::HashMap;

use primitive_types::U256;

use keel_core::chainwork;
use keel_core::constants::{MAX_FUTURE_DRIFT, MEDIAN_TIME_SPAN};
use keel_core::error::IndexError;
use keel_core::types::{BlockHeader, Hash256};

/// An accepted header with its derived position in the tree.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    /// The header as accepted. Immutable.
    pub header: BlockHeader,
    /// Cached header hash.
    pub hash: Hash256,
    /// Height in the tree (parent height + 1).
    pub height: u64,
    /// Cumulative chainwork from genesis through this header.
    pub chainwork: U256,
}

/// A block reference by hash or by best-chain height.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashOrHeight {
    Hash(Hash256),
    Height(u64),
}

impl From<Hash256> for HashOrHeight {
    fn from(hash: Hash256) -> Self {
        Self::Hash(hash)
    }
}

impl From<u64> for HashOrHeight {
    fn from(height: u64) -> Self {
        Self::Height(height)
    }
}

/// Header index keyed by hash, with best-chain tracking.
#[derive(Default)]
pub struct BlockIndex {
    entries: HashMap<Hash256, IndexEntry>,
    /// Best-chain hash by height. `best_chain[h]` is the block at height `h`.
    best_chain: Vec<Hash256>,
    best: Option<Hash256>,
}

impl BlockIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of headers indexed (all branches).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Check whether `header` would be accepted, without mutating the index.
    ///
    /// Rejections: duplicate hash, unknown parent, invalid compact bits,
    /// timestamp not after the parent's median time past, timestamp beyond
    /// the drift tolerance, chainwork overflow.
    pub fn validate(&self, header: &BlockHeader) -> Result<(), IndexError> {
        let hash = header.hash();
        if self.entries.contains_key(&hash) {
            return Err(IndexError::DuplicateHeader(hash.to_string()));
        }
        let work = chainwork::work_from_bits(header.bits)
            .ok_or(IndexError::InvalidBits(header.bits))?;

        if self.entries.is_empty() {
            if !header.prev_hash.is_zero() {
                return Err(IndexError::UnknownParent(header.prev_hash.to_string()));
            }
            return Ok(());
        }

        let parent = self
            .entries
            .get(&header.prev_hash)
            .ok_or_else(|| IndexError::UnknownParent(header.prev_hash.to_string()))?;

        let median = self.median_time_past_of(parent);
        if header.timestamp <= median {
            return Err(IndexError::TimestampNotAfterMedian {
                got: header.timestamp,
                median,
            });
        }
        let limit = parent.header.timestamp.saturating_add(MAX_FUTURE_DRIFT);
        if header.timestamp > limit {
            return Err(IndexError::TimestampTooFar {
                got: header.timestamp,
                limit,
            });
        }

        if parent.chainwork.checked_add(work).is_none() {
            return Err(IndexError::ChainworkOverflow);
        }
        Ok(())
    }

    /// Accept a header into the index, updating the best chain if the new
    /// entry carries more cumulative work.
    pub fn insert(&mut self, header: BlockHeader) -> Result<Hash256, IndexError> {
        self.validate(&header)?;

        let hash = header.hash();
        let work = chainwork::work_from_bits(header.bits)
            .ok_or(IndexError::InvalidBits(header.bits))?;

        let (height, chainwork) = match self.entries.get(&header.prev_hash) {
            Some(parent) => (
                parent.height + 1,
                parent
                    .chainwork
                    .checked_add(work)
                    .ok_or(IndexError::ChainworkOverflow)?,
            ),
            None => (0, work),
        };

        let entry = IndexEntry {
            header,
            hash,
            height,
            chainwork,
        };

        let best_work = self.best_tip().map(|tip| tip.chainwork);
        let extends_best = self
            .best_tip()
            .is_none_or(|tip| entry.header.prev_hash == tip.hash);

        self.entries.insert(hash, entry);

        if best_work.is_none_or(|w| chainwork > w) {
            self.best = Some(hash);
            if extends_best {
                self.best_chain.push(hash);
            } else {
                self.rebuild_best_chain();
            }
        }
        Ok(hash)
    }

    /// Rewalk parent links from the best tip to genesis.
    fn rebuild_best_chain(&mut self) {
        let mut path = Vec::new();
        let mut cursor = self.best;
        while let Some(hash) = cursor {
            match self.entries.get(&hash) {
                Some(entry) => {
                    path.push(hash);
                    cursor = if entry.height == 0 {
                        None
                    } else {
                        Some(entry.header.prev_hash)
                    };
                }
                None => break,
            }
        }
        path.reverse();
        self.best_chain = path;
    }

    /// The best-chain tip, if any header has been accepted.
    pub fn best_tip(&self) -> Option<&IndexEntry> {
        self.best.and_then(|hash| self.entries.get(&hash))
    }

    /// Look up a header by hash (any branch).
    pub fn entry(&self, hash: &Hash256) -> Option<&IndexEntry> {
        self.entries.get(hash)
    }

    /// Look up the best-chain header at `height`.
    pub fn entry_at(&self, height: u64) -> Option<&IndexEntry> {
        let hash = self.best_chain.get(height as usize)?;
        self.entries.get(hash)
    }

    /// Resolve a hash-or-height reference.
    pub fn lookup(&self, target: HashOrHeight) -> Option<&IndexEntry> {
        match target {
            HashOrHeight::Hash(hash) => self.entry(&hash),
            HashOrHeight::Height(height) => self.entry_at(height),
        }
    }

    /// Whether the entry at `hash` lies on the best chain.
    pub fn is_on_best_chain(&self, hash: &Hash256) -> bool {
        self.entries
            .get(hash)
            .and_then(|entry| self.best_chain.get(entry.height as usize))
            .is_some_and(|h| h == hash)
    }

    /// Confirmation count for the block at `hash`.
    ///
    /// `tip.height - height + 1` for best-chain blocks, 0 for side branches
    /// and unknown hashes. Never negative.
    pub fn confirmations(&self, hash: &Hash256) -> u64 {
        if !self.is_on_best_chain(hash) {
            return 0;
        }
        match (self.best_tip(), self.entries.get(hash)) {
            (Some(tip), Some(entry)) => tip.height - entry.height + 1,
            _ => 0,
        }
    }

    /// Median of the trailing [`MEDIAN_TIME_SPAN`] timestamps ending at the
    /// entry for `hash` (inclusive). Uses as many as exist near genesis.
    pub fn median_time_past(&self, hash: &Hash256) -> Option<u64> {
        self.entries.get(hash).map(|e| self.median_time_past_of(e))
    }

    fn median_time_past_of(&self, entry: &IndexEntry) -> u64 {
        let mut times = Vec::with_capacity(MEDIAN_TIME_SPAN);
        let mut cursor = Some(entry);
        while let Some(e) = cursor {
            times.push(e.header.timestamp);
            if times.len() == MEDIAN_TIME_SPAN || e.height == 0 {
                break;
            }
            cursor = self.entries.get(&e.header.prev_hash);
        }
        times.sort_unstable();
        times[times.len() / 2]
    }
}
