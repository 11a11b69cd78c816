//! RocksDB-backed block archive.
//!
//! Implements [`BlockArchive`] with column families for block bodies, undo
//! records, and metadata. Heights are keyed big-endian so iteration is
//! oldest-first, which is the order pruning evicts in. Mutations go through
//! [`WriteBatch`] so a store or eviction lands atomically.

use std::path::Path;

use rocksdb::{ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};

use keel_core::archive::BlockArchive;
use keel_core::error::{ArchiveError, CodecError};
use keel_core::types::{Block, BlockUndo};

const CF_BLOCKS: &str = "blocks";
const CF_UNDO: &str = "undo";
const CF_METADATA: &str = "metadata";

const ALL_CFS: &[&str] = &[CF_BLOCKS, CF_UNDO, CF_METADATA];

const META_FLOOR: &[u8] = b"retention_floor";

/// Persistent block/undo archive.
///
/// Retained byte totals are recomputed on open by scanning value sizes, so
/// the accounting survives crashes without a write-ahead protocol of its own.
pub struct RocksArchive {
    db: DB,
    bytes: u64,
    floor: u64,
}

impl RocksArchive {
    /// Open or create an archive at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ArchiveError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = ALL_CFS
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path.as_ref(), cf_descriptors)
            .map_err(|e| ArchiveError::Storage(e.to_string()))?;

        let mut archive = Self {
            db,
            bytes: 0,
            floor: 0,
        };
        archive.bytes = archive.scan_retained_bytes()?;
        archive.floor = archive.read_floor()?;
        Ok(archive)
    }

    fn cf_handle(&self, name: &str) -> Result<&rocksdb::ColumnFamily, ArchiveError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| ArchiveError::Storage(format!("missing column family: {name}")))
    }

    /// Encode a height as big-endian bytes for ordered iteration.
    fn height_key(height: u64) -> [u8; 8] {
        height.to_be_bytes()
    }

    fn decode_height(key: &[u8]) -> Result<u64, ArchiveError> {
        let arr: [u8; 8] = key
            .try_into()
            .map_err(|_| ArchiveError::Storage("malformed height key".into()))?;
        Ok(u64::from_be_bytes(arr))
    }

    fn scan_retained_bytes(&self) -> Result<u64, ArchiveError> {
        let mut total = 0u64;
        for cf_name in [CF_BLOCKS, CF_UNDO] {
            let cf = self.cf_handle(cf_name)?;
            for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
                let (_, value) = item.map_err(|e| ArchiveError::Storage(e.to_string()))?;
                total += value.len() as u64;
            }
        }
        Ok(total)
    }

    fn read_floor(&self) -> Result<u64, ArchiveError> {
        let cf = self.cf_handle(CF_METADATA)?;
        match self
            .db
            .get_cf(&cf, META_FLOOR)
            .map_err(|e| ArchiveError::Storage(e.to_string()))?
        {
            Some(bytes) if bytes.len() == 8 => {
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| ArchiveError::Storage("invalid metadata length".into()))?;
                Ok(u64::from_le_bytes(arr))
            }
            Some(_) => Err(ArchiveError::Storage("invalid metadata length".into())),
            None => Ok(0),
        }
    }

    fn get_value(&self, cf_name: &str, height: u64) -> Result<Option<Vec<u8>>, ArchiveError> {
        let cf = self.cf_handle(cf_name)?;
        self.db
            .get_cf(&cf, Self::height_key(height))
            .map_err(|e| ArchiveError::Storage(e.to_string()))
    }
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

impl BlockArchive for RocksArchive {
    fn store(&mut self, height: u64, block: &Block, undo: &BlockUndo) -> Result<(), ArchiveError> {
        let block_bytes = encode(block)?;
        let undo_bytes = encode(undo)?;

        // Account for replacement before the write so totals stay exact.
        let mut delta = (block_bytes.len() + undo_bytes.len()) as i128;
        if let Some(old) = self.get_value(CF_BLOCKS, height)? {
            delta -= old.len() as i128;
        }
        if let Some(old) = self.get_value(CF_UNDO, height)? {
            delta -= old.len() as i128;
        }

        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf_handle(CF_BLOCKS)?, Self::height_key(height), &block_bytes);
        batch.put_cf(self.cf_handle(CF_UNDO)?, Self::height_key(height), &undo_bytes);
        self.db
            .write(batch)
            .map_err(|e| ArchiveError::Storage(e.to_string()))?;

        self.bytes = (self.bytes as i128 + delta) as u64;
        Ok(())
    }

    fn block(&self, height: u64) -> Result<Option<Block>, ArchiveError> {
        self.get_value(CF_BLOCKS, height)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn undo(&self, height: u64) -> Result<Option<BlockUndo>, ArchiveError> {
        self.get_value(CF_UNDO, height)?
            .map(|bytes| decode(&bytes))
            .transpose()
    }

    fn evict_below(&mut self, height: u64) -> Result<u64, ArchiveError> {
        let mut batch = WriteBatch::default();
        let mut freed = 0u64;

        for cf_name in [CF_BLOCKS, CF_UNDO] {
            let cf = self.cf_handle(cf_name)?;
            for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
                let (key, value) = item.map_err(|e| ArchiveError::Storage(e.to_string()))?;
                if Self::decode_height(&key)? >= height {
                    break;
                }
                freed += value.len() as u64;
                batch.delete_cf(cf, key);
            }
        }

        let new_floor = self.floor.max(height);
        batch.put_cf(
            self.cf_handle(CF_METADATA)?,
            META_FLOOR,
            new_floor.to_le_bytes(),
        );
        self.db
            .write(batch)
            .map_err(|e| ArchiveError::Storage(e.to_string()))?;

        self.bytes -= freed;
        self.floor = new_floor;
        Ok(freed)
    }

    fn retained_bytes(&self) -> u64 {
        self.bytes
    }

    fn lowest_retained(&self) -> u64 {
        self.floor
    }

    fn highest_stored(&self) -> Option<u64> {
        let cf = self.cf_handle(CF_BLOCKS).ok()?;
        let mut iter = self.db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) => Self::decode_height(&key).ok(),
            _ => None,
        }
    }
}
