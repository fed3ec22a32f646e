//! In-process cache storage, used for ephemeral runs.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::traits::{entry_hash, CacheStorage, CachedEntry, Snapshot};
use crate::net::RequestIdentity;

type Partition = BTreeMap<String, CachedEntry>;

/// Storage that keeps every partition in memory for the life of the process.
#[derive(Default)]
pub struct MemoryStorage {
  partitions: RwLock<BTreeMap<String, Partition>>,
}

impl MemoryStorage {
  pub fn new() -> Self {
    Self::default()
  }
}

/// Insert unless a newer revision is already present.
fn upsert(partition_name: &str, partition: &mut Partition, snapshot: &Snapshot) -> bool {
  let hash = entry_hash(&snapshot.key);
  if let Some(existing) = partition.get(&hash) {
    if existing.snapshot.revision >= snapshot.revision {
      return false;
    }
  }

  partition.insert(
    hash,
    CachedEntry {
      partition: partition_name.to_string(),
      snapshot: snapshot.clone(),
      cached_at: Utc::now(),
    },
  );
  true
}

impl CacheStorage for MemoryStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    partitions.entry(name.to_string()).or_default();
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.keys().cloned().collect())
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(partitions.remove(name).is_some())
  }

  fn put_entry(&self, partition: &str, snapshot: &Snapshot) -> Result<bool> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let target = partitions.entry(partition.to_string()).or_default();
    Ok(upsert(partition, target, snapshot))
  }

  fn put_batch(&self, partition: &str, snapshots: &[Snapshot]) -> Result<()> {
    let mut partitions = self
      .partitions
      .write()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    // Single write lock, so readers never observe a half-applied batch
    let target = partitions.entry(partition.to_string()).or_default();
    for snapshot in snapshots {
      upsert(partition, target, snapshot);
    }
    Ok(())
  }

  fn get_entry(&self, partition: &str, key: &RequestIdentity) -> Result<Option<CachedEntry>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(
      partitions
        .get(partition)
        .and_then(|p| p.get(&entry_hash(key)))
        .cloned(),
    )
  }

  fn match_entry(&self, key: &RequestIdentity) -> Result<Option<CachedEntry>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let hash = entry_hash(key);
    Ok(partitions.values().find_map(|p| p.get(&hash)).cloned())
  }

  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestIdentity>> {
    let partitions = self
      .partitions
      .read()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    let mut keys: Vec<RequestIdentity> = partitions
      .get(partition)
      .map(|p| p.values().map(|e| e.snapshot.key.clone()).collect())
      .unwrap_or_default();
    keys.sort_by(|a, b| a.url.cmp(&b.url).then(a.method.as_str().cmp(b.method.as_str())));
    Ok(keys)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::net::{Method, Response};

  fn snapshot(url: &str, revision: u64) -> Snapshot {
    Snapshot {
      key: RequestIdentity {
        method: Method::Get,
        url: url.to_string(),
      },
      response: Response::new(200, url.as_bytes().to_vec()),
      revision,
    }
  }

  #[test]
  fn test_match_across_partitions() {
    let storage = MemoryStorage::new();
    storage
      .put_entry("v1-image", &snapshot("http://localhost/logo", 1))
      .unwrap();

    let found = storage
      .match_entry(&snapshot("http://localhost/logo", 0).key)
      .unwrap()
      .unwrap();
    assert_eq!(found.partition, "v1-image");
  }

  #[test]
  fn test_last_committed_revision_wins() {
    let storage = MemoryStorage::new();
    assert!(storage.put_entry("p", &snapshot("http://localhost/a", 2)).unwrap());
    assert!(!storage.put_entry("p", &snapshot("http://localhost/a", 1)).unwrap());
    assert!(storage.put_entry("p", &snapshot("http://localhost/a", 3)).unwrap());

    let entry = storage
      .get_entry("p", &snapshot("http://localhost/a", 0).key)
      .unwrap()
      .unwrap();
    assert_eq!(entry.snapshot.revision, 3);
  }

  #[test]
  fn test_create_and_delete_partition() {
    let storage = MemoryStorage::new();
    storage.create_partition("v1-static").unwrap();
    storage.create_partition("v1-static").unwrap();
    assert_eq!(storage.partition_names().unwrap(), vec!["v1-static"]);

    assert!(storage.delete_partition("v1-static").unwrap());
    assert!(storage.partition_names().unwrap().is_empty());
  }
}
