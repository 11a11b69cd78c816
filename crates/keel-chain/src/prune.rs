//! Block-data retention policy.
//!
//! The manager decides which historical block bodies and undo records may be
//! discarded from the archive. Headers and the live UTXO set are never
//! touched. `prune_height` only ever moves forward, and the most recent
//! [`MIN_RETAINED_BLOCKS`] bodies stay retained so a deep reorganization can
//! always be replayed.
//!
//! Eviction must never race a verification task that reads the data being
//! discarded; the engine runs both inside the same exclusive section.

use tracing::{debug, info};

use keel_core::archive::BlockArchive;
use keel_core::constants::{BYTES_PER_MB, MIN_RETAINED_BLOCKS};
use keel_core::error::PruneError;

/// Retention policy for historical block data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetentionMode {
    /// Keep everything.
    Disabled,
    /// Keep everything until an operator explicitly requests eviction.
    Manual,
    /// Evict oldest-first whenever retained bytes exceed the target.
    Automatic {
        target_bytes: u64,
    },
}

impl RetentionMode {
    /// Interpret the boundary-level `prune` setting, given in whole
    /// megabytes: 0 disables, 1 selects manual mode, anything larger is an
    /// automatic byte budget (2200 → 2_306_867_200 bytes).
    pub fn from_prune_setting(megabytes: u64) -> Self {
        match megabytes {
            0 => Self::Disabled,
            1 => Self::Manual,
            n => Self::Automatic {
                target_bytes: n * BYTES_PER_MB,
            },
        }
    }
}

/// Tracks retention state and drives archive eviction.
pub struct PruneManager {
    mode: RetentionMode,
    prune_height: u64,
}

impl PruneManager {
    pub fn new(mode: RetentionMode) -> Self {
        Self {
            mode,
            prune_height: 0,
        }
    }

    pub fn mode(&self) -> RetentionMode {
        self.mode
    }

    /// Whether any retention policy is active.
    pub fn is_pruned(&self) -> bool {
        self.mode != RetentionMode::Disabled
    }

    pub fn automatic(&self) -> bool {
        matches!(self.mode, RetentionMode::Automatic { .. })
    }

    /// The byte budget, in automatic mode only.
    pub fn target_bytes(&self) -> Option<u64> {
        match self.mode {
            RetentionMode::Automatic { target_bytes } => Some(target_bytes),
            _ => None,
        }
    }

    /// Lowest height whose block body is still guaranteed retained.
    ///
    /// 0 while retention is disabled, or in manual mode before any eviction
    /// has been requested.
    pub fn prune_height(&self) -> u64 {
        self.prune_height
    }

    /// Re-evaluate eligibility after the tip advanced to `tip_height`.
    ///
    /// In automatic mode, evicts oldest bodies one height at a time until the
    /// archive fits the byte budget or the safety margin is reached; the
    /// budget may therefore be exceeded by at most one block's worth of data
    /// plus whatever the margin forces us to keep. Disabled and manual modes
    /// do nothing here.
    ///
    /// Returns the number of heights evicted.
    pub fn on_new_tip(
        &mut self,
        tip_height: u64,
        archive: &mut dyn BlockArchive,
    ) -> Result<u64, PruneError> {
        let RetentionMode::Automatic { target_bytes } = self.mode else {
            return Ok(0);
        };

        let keep_from = tip_height.saturating_sub(MIN_RETAINED_BLOCKS);
        let mut evicted = 0u64;
        while archive.retained_bytes() > target_bytes {
            let lowest = archive.lowest_retained();
            if lowest >= keep_from {
                debug!(
                    retained = archive.retained_bytes(),
                    target = target_bytes,
                    "over byte budget but safety margin reached"
                );
                break;
            }
            archive.evict_below(lowest + 1)?;
            evicted += 1;
        }

        if evicted > 0 {
            self.prune_height = self.prune_height.max(archive.lowest_retained());
            info!(
                evicted,
                prune_height = self.prune_height,
                retained_bytes = archive.retained_bytes(),
                "evicted old block data"
            );
        }
        Ok(evicted)
    }

    /// Operator-requested eviction of all bodies up to and including `up_to`.
    ///
    /// Only valid in manual mode. Fails hard if the request reaches into the
    /// protected window near the tip.
    pub fn request_manual_prune(
        &mut self,
        up_to: u64,
        tip_height: u64,
        archive: &mut dyn BlockArchive,
    ) -> Result<u64, PruneError> {
        match self.mode {
            RetentionMode::Disabled => return Err(PruneError::Disabled),
            RetentionMode::Automatic { .. } => return Err(PruneError::NotManual),
            RetentionMode::Manual => {}
        }

        let floor = tip_height.saturating_sub(MIN_RETAINED_BLOCKS);
        if up_to >= floor {
            return Err(PruneError::RetentionViolation {
                requested: up_to,
                floor,
            });
        }

        let freed = archive.evict_below(up_to + 1)?;
        self.prune_height = self.prune_height.max(archive.lowest_retained());
        info!(up_to, freed, "manual prune completed");
        Ok(freed)
    }
}
