//! Engine configuration.
//!
//! Mirrors what the excluded startup collaborator would hand us: a data
//! directory, the prune knob in whole megabytes, and a log filter. The
//! configuration is programmatic; file loading belongs to the startup layer.

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use keel_chain::prune::RetentionMode;

/// Configuration for a chain engine instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Retention knob in whole megabytes: 0 keeps everything, 1 selects
    /// manual pruning, larger values set an automatic byte budget.
    pub prune: u64,
    /// Log level filter string (e.g. "info", "keel_node=debug").
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keel");

        Self {
            data_dir,
            prune: 0,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Path to the block/undo archive directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("chaindata")
    }

    /// The retention mode this configuration selects.
    pub fn retention(&self) -> RetentionMode {
        RetentionMode::from_prune_setting(self.prune)
    }
}

/// Install the global tracing subscriber.
///
/// Safe to call more than once; later calls are no-ops. Falls back to "info"
/// when the filter string does not parse.
pub fn init_tracing(filter: &str) {
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .try_init();
}
