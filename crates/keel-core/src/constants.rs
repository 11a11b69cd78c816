//! Protocol constants. All monetary values in motes (1 KEEL = 10^8 motes).

/// Motes per KEEL.
pub const COIN: u64 = 100_000_000;

/// Block subsidy minted by each coinbase.
pub const BLOCK_REWARD: u64 = 500_000 * COIN;

/// Confirmations required before a coinbase output may be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// Target seconds between blocks.
pub const BLOCK_TIME_SECS: u64 = 60;

/// Number of trailing blocks whose timestamps feed the median-time calculation.
pub const MEDIAN_TIME_SPAN: usize = 11;

/// Maximum seconds a header's timestamp may run ahead of its parent.
///
/// The engine has no wall clock of its own, so the future-drift tolerance is
/// anchored to the parent timestamp rather than local time.
pub const MAX_FUTURE_DRIFT: u64 = 2 * 60 * 60;

/// Maximum serialized block size in bytes.
pub const MAX_BLOCK_SIZE: usize = 1_048_576;

/// Block bodies within this distance of the tip are never evicted,
/// so a reorganization can always be replayed from retained data.
pub const MIN_RETAINED_BLOCKS: u64 = 288;

/// Bytes per megabyte for the pruning target, as configured at the boundary.
///
/// A prune setting of 2200 MB therefore becomes a 2_306_867_200-byte budget.
pub const BYTES_PER_MB: u64 = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_times_120_blocks() {
        // 120 coinbase-only blocks mint exactly 60,000,000 KEEL.
        assert_eq!(BLOCK_REWARD * 120, 60_000_000 * COIN);
    }

    #[test]
    fn prune_target_mb_conversion() {
        assert_eq!(2200 * BYTES_PER_MB, 2_306_867_200);
    }

    #[test]
    fn retention_margin_exceeds_maturity() {
        // A reorg deeper than the maturity window must still be replayable.
        assert!(MIN_RETAINED_BLOCKS > COINBASE_MATURITY);
    }
}
