//! Shared helpers for the integration suites.
//!
//! Blocks are assembled the way the excluded acceptance pipeline would hand
//! them to the engine: correct merkle root, timestamps one target interval
//! apart, genesis-style easy difficulty.

use keel_core::constants::BLOCK_TIME_SECS;
use keel_core::crypto::{self, KeyPair};
use keel_core::genesis;
use keel_core::merkle;
use keel_core::types::*;
use keel_node::ChainEngine;

/// Simple locking key from a seed byte.
pub fn lk(seed: u8) -> Hash256 {
    Hash256([seed; 32])
}

/// Coinbase with a height marker so every block's coinbase has a unique txid.
pub fn coinbase(value: u64, locking_key: Hash256, height: u64) -> Transaction {
    Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev_out: OutPoint::null(),
            signature: height.to_le_bytes().to_vec(),
            public_key: vec![],
        }],
        outputs: vec![TxOutput { value, locking_key }],
        lock_time: height,
    }
}

/// Spend `outpoint` with the owner's key, paying the given outputs.
pub fn signed_spend(
    outpoint: OutPoint,
    owner: &KeyPair,
    outputs: Vec<(u64, Hash256)>,
) -> Transaction {
    let mut tx = Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev_out: outpoint,
            signature: vec![],
            public_key: vec![],
        }],
        outputs: outputs
            .into_iter()
            .map(|(value, locking_key)| TxOutput { value, locking_key })
            .collect(),
        lock_time: 0,
    };
    crypto::sign_input(&mut tx, 0, owner).expect("signing a well-formed input");
    tx
}

/// Build the next block on the engine's best tip.
pub fn next_block(engine: &ChainEngine, txs: Vec<Transaction>) -> Block {
    let (height, prev) = engine.tip().expect("engine always has genesis");
    let txids: Vec<Hash256> = txs.iter().map(|tx| tx.txid().unwrap()).collect();
    Block {
        header: BlockHeader {
            version: 1,
            prev_hash: prev,
            merkle_root: merkle::merkle_root(&txids),
            timestamp: genesis::GENESIS_TIMESTAMP + (height + 1) * BLOCK_TIME_SECS,
            bits: genesis::GENESIS_BITS,
            nonce: 0,
        },
        transactions: txs,
    }
}

/// Mine `count` coinbase-only blocks paying `value` to `key`.
pub fn grow(engine: &ChainEngine, count: u64, value: u64, key: Hash256) {
    for _ in 0..count {
        let height = engine.tip().unwrap().0 + 1;
        let block = next_block(engine, vec![coinbase(value, key, height)]);
        engine.accept_block(&block).expect("valid block accepted");
    }
}
