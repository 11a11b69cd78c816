//! # keel-node
//! Composition layer: the persistent block archive, the single-writer chain
//! engine, and the read-only query surface an RPC transport would sit on.

pub mod archive;
pub mod config;
pub mod engine;
pub mod query;

pub use archive::RocksArchive;
pub use config::{init_tracing, EngineConfig};
pub use engine::{AcceptedBlock, ChainEngine};
pub use query::QueryService;
