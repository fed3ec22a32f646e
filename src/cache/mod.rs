//! Partitioned response cache.
//!
//! This module provides the storage side of the worker:
//! - Named partitions holding (request identity -> response snapshot) pairs
//! - Cross-partition matching by request identity
//! - Per-key write ordering through monotonic revisions
//! - SQLite persistence, or an in-memory backend for ephemeral runs

mod memory;
mod storage;
mod store;
mod traits;

pub use memory::MemoryStorage;
pub use storage::SqliteStorage;
pub use store::{CacheStore, Partition};
pub use traits::{CacheStorage, CachedEntry, Snapshot};
