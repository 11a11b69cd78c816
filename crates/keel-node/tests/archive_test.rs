//! RocksArchive persistence tests: round trips, eviction, and reopen.

use keel_core::archive::BlockArchive;
use keel_core::merkle;
use keel_core::types::{
    Block, BlockHeader, BlockUndo, Hash256, OutPoint, Transaction, TxInput, TxOutput, UtxoEntry,
};
use keel_node::RocksArchive;

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

fn make_block(prev_hash: Hash256, height: u64) -> Block {
    let txs = vec![coinbase(50, lk((height % 251) as u8), height)];
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash,
            merkle_root: merkle::merkle_root(&txids),
            timestamp: 1_700_000_000 + height * 60,
            bits: 0x207f_ffff,
            nonce: 0,
        },
        transactions: txs,
    }
}

fn sample_undo(height: u64) -> BlockUndo {
    BlockUndo {
        spent: vec![(
            OutPoint { txid: lk(1), vout: 0 },
            UtxoEntry {
                value: 50,
                locking_key: lk(2),
                height: height.saturating_sub(1),
                is_coinbase: false,
            },
        )],
        created: vec![OutPoint { txid: lk(3), vout: 0 }],
    }
}

#[test]
fn store_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = RocksArchive::open(dir.path().join("chaindata")).unwrap();

    let block = make_block(Hash256::ZERO, 0);
    archive.store(0, &block, &BlockUndo::empty()).unwrap();

    assert_eq!(archive.block(0).unwrap(), Some(block));
    assert_eq!(archive.undo(0).unwrap(), Some(BlockUndo::empty()));
    assert!(archive.retained_bytes() > 0);
    assert_eq!(archive.lowest_retained(), 0);
    assert_eq!(archive.highest_stored(), Some(0));
}

#[test]
fn undo_round_trips_with_payload() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = RocksArchive::open(dir.path().join("chaindata")).unwrap();

    let undo = sample_undo(5);
    archive.store(5, &make_block(lk(4), 5), &undo).unwrap();
    assert_eq!(archive.undo(5).unwrap(), Some(undo));
}

#[test]
fn missing_heights_are_none() {
    let dir = tempfile::tempdir().unwrap();
    let archive = RocksArchive::open(dir.path().join("chaindata")).unwrap();
    assert!(archive.block(99).unwrap().is_none());
    assert!(archive.undo(99).unwrap().is_none());
    assert_eq!(archive.highest_stored(), None);
}

#[test]
fn eviction_deletes_and_accounts() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = RocksArchive::open(dir.path().join("chaindata")).unwrap();

    let mut prev = Hash256::ZERO;
    for h in 0..10 {
        let block = make_block(prev, h);
        prev = block.header.hash();
        archive.store(h, &block, &sample_undo(h)).unwrap();
    }
    let before = archive.retained_bytes();

    let freed = archive.evict_below(6).unwrap();
    assert!(freed > 0);
    assert_eq!(archive.retained_bytes(), before - freed);
    assert_eq!(archive.lowest_retained(), 6);
    for h in 0..6 {
        assert!(archive.block(h).unwrap().is_none());
        assert!(archive.undo(h).unwrap().is_none());
    }
    for h in 6..10 {
        assert!(archive.block(h).unwrap().is_some());
    }
}

#[test]
fn reopen_recovers_accounting_and_floor() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chaindata");

    let (bytes_before, floor_before) = {
        let mut archive = RocksArchive::open(&path).unwrap();
        let mut prev = Hash256::ZERO;
        for h in 0..8 {
            let block = make_block(prev, h);
            prev = block.header.hash();
            archive.store(h, &block, &sample_undo(h)).unwrap();
        }
        archive.evict_below(3).unwrap();
        (archive.retained_bytes(), archive.lowest_retained())
    };

    let archive = RocksArchive::open(&path).unwrap();
    assert_eq!(archive.retained_bytes(), bytes_before);
    assert_eq!(archive.lowest_retained(), floor_before);
    assert_eq!(archive.highest_stored(), Some(7));
    assert!(archive.block(2).unwrap().is_none());
    assert!(archive.block(3).unwrap().is_some());
}

#[test]
fn overwrite_does_not_inflate_byte_count() {
    let dir = tempfile::tempdir().unwrap();
    let mut archive = RocksArchive::open(dir.path().join("chaindata")).unwrap();

    let block = make_block(Hash256::ZERO, 0);
    archive.store(0, &block, &BlockUndo::empty()).unwrap();
    let once = archive.retained_bytes();
    archive.store(0, &block, &BlockUndo::empty()).unwrap();
    assert_eq!(archive.retained_bytes(), once);
}
