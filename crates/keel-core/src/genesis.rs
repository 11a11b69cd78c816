//! Genesis block definition.
//!
//! Height 0 is hardcoded and deterministic. By long-standing convention its
//! coinbase output is unspendable and never enters the UTXO set; the spendable
//! chain starts at height 1.

use std::sync::LazyLock;

use crate::constants::BLOCK_REWARD;
use crate::merkle;
use crate::types::{Block, BlockHeader, Hash256, OutPoint, Transaction, TxInput, TxOutput};

/// Genesis block timestamp: January 1, 2026 00:00:00 UTC.
pub const GENESIS_TIMESTAMP: u64 = 1_767_225_600;

/// Genesis compact difficulty target (accepts any hash).
pub const GENESIS_BITS: u32 = 0x207f_ffff;

/// Message embedded in the genesis coinbase input.
pub const GENESIS_MESSAGE: &[u8] = b"An even keel carries the ledger. Keel genesis 2026.";

struct GenesisData {
    block: Block,
    hash: Hash256,
}

static GENESIS: LazyLock<GenesisData> = LazyLock::new(build_genesis);

fn build_genesis() -> GenesisData {
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxInput {
            prev_out: OutPoint::null(),
            signature: GENESIS_MESSAGE.to_vec(),
            public_key: vec![],
        }],
        outputs: vec![TxOutput {
            value: BLOCK_REWARD,
            locking_key: unspendable_locking_key(),
        }],
        lock_time: 0,
    };
    // Hardcoded coinbase, so serialization cannot fail.
    let coinbase_txid = coinbase
        .txid()
        .expect("genesis coinbase is hardcoded valid data");

    let block = Block {
        header: BlockHeader {
            version: 1,
            prev_hash: Hash256::ZERO,
            merkle_root: merkle::merkle_root(&[coinbase_txid]),
            timestamp: GENESIS_TIMESTAMP,
            bits: GENESIS_BITS,
            nonce: 0,
        },
        transactions: vec![coinbase],
    };
    let hash = block.header.hash();

    GenesisData { block, hash }
}

/// The locking key of the genesis output.
///
/// Derived as `BLAKE3(b"keel genesis unspendable")`; no private key hashes
/// to it, which is what keeps the output unspendable.
pub fn unspendable_locking_key() -> Hash256 {
    Hash256(blake3::hash(b"keel genesis unspendable").into())
}

/// The genesis block.
pub fn genesis_block() -> &'static Block {
    &GENESIS.block
}

/// The genesis block hash.
pub fn genesis_hash() -> Hash256 {
    GENESIS.hash
}
