//! Compaction recovery: pre/post reset instruction blocks and the persisted
//! session checkpoint.

pub mod checkpoint;
pub mod manager;

pub use checkpoint::{CheckpointStore, SessionCheckpoint};
pub use manager::{CompactionManager, CompactionRecord, CompactionStats};
