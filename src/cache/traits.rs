//! Core traits and types for the partitioned response cache.

use chrono::{DateTime, Utc};
use color_eyre::Result;
use sha2::{Digest, Sha256};

use crate::net::{RequestIdentity, Response};

/// A response snapshot ready to be written under a request identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
  pub key: RequestIdentity,
  pub response: Response,
  /// Monotonic write revision; older revisions never overwrite newer ones
  pub revision: u64,
}

/// A snapshot as read back from storage.
#[derive(Debug, Clone)]
pub struct CachedEntry {
  /// Partition the entry was found in
  pub partition: String,
  pub snapshot: Snapshot,
  /// When the entry was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// Partitions are named containers of (request identity -> snapshot) pairs.
/// Writing into a partition that does not exist yet creates it.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create an empty partition if it does not exist.
  fn create_partition(&self, name: &str) -> Result<()>;

  /// All partition names, sorted.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and all of its entries. Returns false if it did not exist.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Write one snapshot. Returns false if a newer revision is already stored.
  fn put_entry(&self, partition: &str, snapshot: &Snapshot) -> Result<bool>;

  /// Write several snapshots atomically: either all land or none do.
  fn put_batch(&self, partition: &str, snapshots: &[Snapshot]) -> Result<()>;

  /// Look up a single partition.
  fn get_entry(&self, partition: &str, key: &RequestIdentity) -> Result<Option<CachedEntry>>;

  /// Look up every partition in name order, first hit wins.
  fn match_entry(&self, key: &RequestIdentity) -> Result<Option<CachedEntry>>;

  /// Identities stored in a partition.
  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestIdentity>>;
}

/// Stable fixed-length storage key for a request identity.
pub fn entry_hash(key: &RequestIdentity) -> String {
  let mut hasher = Sha256::new();
  hasher.update(key.method.as_str().as_bytes());
  hasher.update(b" ");
  hasher.update(key.url.as_bytes());
  hex::encode(hasher.finalize())
}
