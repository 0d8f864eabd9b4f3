//! 可持久化的研究工作流：plan -> research -> synthesize，逐步 checkpoint，可恢复

pub mod engine;
pub mod store;
pub mod types;

pub use engine::ResearchWorkflow;
pub use store::{CheckpointStore, FileCheckpointStore, MemoryCheckpointStore, StoreError};
pub use types::*;
