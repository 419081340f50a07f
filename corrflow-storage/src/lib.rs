//! # corrflow-storage
//!
//! In-memory persistence for corrflow.
//!
//! This crate provides:
//! - A committed instance table with optimistic version checks
//! - Per-delivery sessions implementing the engine's repository, unit of
//!   work and outbound message contracts
//! - A transactional outbox filled only by successful commits
//! - Checksummed snapshots of the instance table

pub mod error;
pub mod session;
pub mod snapshot;
pub mod store;

pub use error::StorageError;
pub use session::MemorySession;
pub use snapshot::{read_snapshot, write_snapshot, SnapshotMeta};
pub use store::{MemoryStore, StoreOptions, StoredInstance};
