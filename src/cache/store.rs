//! Cache store manager: named partitions over a storage backend.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{CacheStorage, Snapshot};
use crate::net::{Request, RequestIdentity, Response};

/// Hands out strictly increasing write revisions based on wall-clock time.
#[derive(Debug, Default)]
pub struct RevisionClock {
  last: AtomicU64,
}

impl RevisionClock {
  pub fn next(&self) -> u64 {
    let now = Utc::now()
      .timestamp_nanos_opt()
      .map(|n| n.max(0) as u64)
      .unwrap_or(0);

    let mut last = self.last.load(Ordering::Relaxed);
    loop {
      let candidate = now.max(last + 1);
      match self
        .last
        .compare_exchange_weak(last, candidate, Ordering::AcqRel, Ordering::Relaxed)
      {
        Ok(_) => return candidate,
        Err(actual) => last = actual,
      }
    }
  }
}

/// Manages partitions and snapshot writes on top of a storage backend.
pub struct CacheStore<S: CacheStorage> {
  storage: Arc<S>,
  clock: Arc<RevisionClock>,
}

impl<S: CacheStorage> CacheStore<S> {
  pub fn new(storage: S) -> Self {
    Self {
      storage: Arc::new(storage),
      clock: Arc::new(RevisionClock::default()),
    }
  }

  pub fn storage(&self) -> &Arc<S> {
    &self.storage
  }

  /// Open a partition handle, creating the partition if needed.
  pub fn open(&self, name: &str) -> Result<Partition<S>> {
    self.storage.create_partition(name)?;
    Ok(self.partition(name))
  }

  /// Handle to a partition that is created on its first write.
  pub fn partition(&self, name: &str) -> Partition<S> {
    Partition {
      name: name.to_string(),
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }

  /// Find a cached response for the request in any partition.
  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    self.match_identity(&request.identity())
  }

  pub fn match_identity(&self, key: &RequestIdentity) -> Result<Option<Response>> {
    Ok(
      self
        .storage
        .match_entry(key)?
        .map(|entry| entry.snapshot.response),
    )
  }

  pub fn partition_names(&self) -> Result<Vec<String>> {
    self.storage.partition_names()
  }

  pub fn delete(&self, name: &str) -> Result<bool> {
    self.storage.delete_partition(name)
  }

  /// Write a response copy in a background task.
  ///
  /// Failures are logged and never reach the caller's response path. The
  /// returned handle resolves to whether the snapshot was stored, or to the
  /// storage error.
  pub fn put_in_background(
    &self,
    partition: &str,
    key: RequestIdentity,
    response: Response,
  ) -> JoinHandle<Result<bool>> {
    let partition = self.partition(partition);
    tokio::task::spawn_blocking(move || {
      partition.put(&key, &response).inspect_err(|e| {
        warn!(partition = %partition.name(), key = %key, error = %e, "Background cache write failed");
      })
    })
  }
}

impl<S: CacheStorage> Clone for CacheStore<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
    }
  }
}

/// Handle to a single named partition.
pub struct Partition<S: CacheStorage> {
  name: String,
  storage: Arc<S>,
  clock: Arc<RevisionClock>,
}

impl<S: CacheStorage> Partition<S> {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Store a copy of the response. Non-2xx responses are never cached.
  ///
  /// Returns false when nothing was written, either because the response was
  /// not successful or because a newer write for the same key already landed.
  pub fn put(&self, key: &RequestIdentity, response: &Response) -> Result<bool> {
    if !response.ok() {
      debug!(partition = %self.name, key = %key, status = response.status, "Skipping non-success response");
      return Ok(false);
    }

    let snapshot = Snapshot {
      key: key.clone(),
      response: response.clone(),
      revision: self.clock.next(),
    };
    self.storage.put_entry(&self.name, &snapshot)
  }

  /// Store every response or none of them.
  pub fn put_all(&self, entries: Vec<(RequestIdentity, Response)>) -> Result<usize> {
    if let Some((key, response)) = entries.iter().find(|(_, r)| !r.ok()) {
      return Err(eyre!(
        "Refusing to cache {}: status {}",
        key,
        response.status
      ));
    }

    let snapshots: Vec<Snapshot> = entries
      .into_iter()
      .map(|(key, response)| Snapshot {
        key,
        response,
        revision: self.clock.next(),
      })
      .collect();

    self.storage.put_batch(&self.name, &snapshots)?;
    Ok(snapshots.len())
  }

  #[cfg(test)]
  pub fn get(&self, key: &RequestIdentity) -> Result<Option<Response>> {
    Ok(
      self
        .storage
        .get_entry(&self.name, key)?
        .map(|entry| entry.snapshot.response),
    )
  }

  pub fn keys(&self) -> Result<Vec<RequestIdentity>> {
    self.storage.entry_keys(&self.name)
  }
}
