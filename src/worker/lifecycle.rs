//! Version boundaries: populate the static partition at install, retire
//! stale partitions at activation.

use color_eyre::{eyre::eyre, Result};
use futures::future::{join_all, try_join_all};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use super::classify::ResourceCategory;
use super::manifest::Manifest;
use super::save::SessionId;
use crate::cache::{CacheStorage, CacheStore};
use crate::net::{Network, Request};

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Populating the static partition (also where a failed install rests)
  Installing,
  /// Installed and waiting to take over
  Installed,
  /// Controlling clients and intercepting requests
  Active,
  /// Replaced by a newer version
  Superseded,
}

impl fmt::Display for WorkerState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WorkerState::Installing => write!(f, "installing"),
      WorkerState::Installed => write!(f, "installed"),
      WorkerState::Active => write!(f, "active"),
      WorkerState::Superseded => write!(f, "superseded"),
    }
  }
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
  /// Stale partitions that were removed
  pub deleted: Vec<String>,
  /// Stale partitions whose deletion failed; retried on the next activation
  pub failed: Vec<String>,
  /// Number of client sessions claimed
  pub claimed: usize,
}

/// Tracks the lifecycle state and the "skip waiting" request.
#[derive(Debug)]
pub struct Lifecycle {
  state: Mutex<WorkerState>,
  skip_waiting: AtomicBool,
}

impl Default for Lifecycle {
  fn default() -> Self {
    Self {
      state: Mutex::new(WorkerState::Installing),
      skip_waiting: AtomicBool::new(false),
    }
  }
}

impl Lifecycle {
  pub fn state(&self) -> WorkerState {
    self.state.lock().map(|s| *s).unwrap_or(WorkerState::Superseded)
  }

  pub fn skip_waiting(&self) -> bool {
    self.skip_waiting.load(Ordering::Acquire)
  }

  /// Move to `next` if the current state is one of `allowed`.
  pub fn transition(&self, allowed: &[WorkerState], next: WorkerState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let from = *state;
    if !allowed.contains(&from) {
      return Err(eyre!("Cannot move worker from {} to {}", from, next));
    }

    info!(%from, to = %next, "Worker state change");
    *state = next;
    Ok(())
  }

  /// Ask to become active without waiting for older workers to release.
  pub fn request_skip_waiting(&self) {
    self.skip_waiting.store(true, Ordering::Release);
  }
}

/// Client sessions and the worker version controlling each of them.
#[derive(Debug, Default)]
pub struct Clients {
  sessions: Mutex<BTreeMap<SessionId, Option<String>>>,
}

impl Clients {
  pub fn register(&self, session: &SessionId) {
    if let Ok(mut sessions) = self.sessions.lock() {
      sessions.entry(session.clone()).or_insert(None);
    }
  }

  /// Take control of every known session. Returns how many were claimed.
  pub fn claim(&self, version: &str) -> usize {
    match self.sessions.lock() {
      Ok(mut sessions) => {
        for controller in sessions.values_mut() {
          *controller = Some(version.to_string());
        }
        sessions.len()
      }
      Err(_) => 0,
    }
  }

  #[cfg(test)]
  pub fn controller(&self, session: &SessionId) -> Option<String> {
    self
      .sessions
      .lock()
      .ok()
      .and_then(|sessions| sessions.get(session).cloned().flatten())
  }
}

/// Fetch every static item and store them in the static partition.
///
/// All items must come back with a 2xx status; otherwise nothing is written
/// and the error is returned so the host can retry the install.
pub async fn install<S, N>(
  manifest: &Manifest,
  origin: &Url,
  store: &CacheStore<S>,
  network: &N,
) -> Result<usize>
where
  S: CacheStorage,
  N: Network,
{
  let cache_key = manifest.cache_name(ResourceCategory::Static);

  let requests = manifest
    .static_cache_items
    .iter()
    .map(|path| {
      origin
        .join(path)
        .map(Request::get)
        .map_err(|e| eyre!("Invalid static cache item {}: {}", path, e))
    })
    .collect::<Result<Vec<_>>>()?;

  let responses = try_join_all(requests.iter().map(|request| async move {
    let response = network.fetch(request).await?;
    if !response.ok() {
      return Err(eyre!(
        "Failed to cache {}: status {}",
        request.url,
        response.status
      ));
    }
    Ok((request.identity(), response))
  }))
  .await?;

  let stored = store.open(&cache_key)?.put_all(responses)?;
  info!(partition = %cache_key, entries = stored, "Static partition populated");
  Ok(stored)
}

/// Delete every partition that does not belong to the current version.
///
/// Deletions run concurrently and fail independently; the call returns once
/// all of them have finished.
pub async fn retire_stale_partitions<S: CacheStorage>(
  manifest: &Manifest,
  store: &CacheStore<S>,
) -> Result<ActivationReport> {
  let stale: Vec<String> = store
    .partition_names()?
    .into_iter()
    .filter(|name| !manifest.owns_partition(name))
    .collect();

  let deletions = stale.into_iter().map(|name| {
    let storage = store.storage().clone();
    async move {
      let task_name = name.clone();
      let result = tokio::task::spawn_blocking(move || storage.delete_partition(&task_name)).await;
      (name, result)
    }
  });

  let mut report = ActivationReport::default();
  for (name, result) in join_all(deletions).await {
    match result {
      Ok(Ok(_)) => {
        info!(partition = %name, "Deleted stale partition");
        report.deleted.push(name);
      }
      Ok(Err(e)) => {
        warn!(partition = %name, error = %e, "Failed to delete stale partition");
        report.failed.push(name);
      }
      Err(e) => {
        warn!(partition = %name, error = %e, "Partition deletion task failed");
        report.failed.push(name);
      }
    }
  }

  Ok(report)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::net::Response;
  use crate::testing::{origin, request, FaultyStorage, StubNetwork};

  fn seed<S: CacheStorage>(store: &CacheStore<S>, names: &[&str]) {
    for name in names {
      store
        .partition(name)
        .put(&request("/", None).identity(), &Response::new(200, *name))
        .unwrap();
    }
  }

  #[tokio::test]
  async fn test_install_populates_static_partition() {
    let store = CacheStore::new(MemoryStorage::new());
    let manifest = Manifest::default();

    let stored = install(&manifest, &origin(), &store, &StubNetwork::serving_site())
      .await
      .unwrap();

    assert_eq!(stored, 5);
    assert_eq!(store.partition_names().unwrap(), vec!["v1-static"]);
    let paths: Vec<String> = store
      .partition("v1-static")
      .keys()
      .unwrap()
      .into_iter()
      .map(|k| Url::parse(&k.url).unwrap().path().to_string())
      .collect();
    let mut expected: Vec<String> = manifest
      .static_cache_items
      .iter()
      .map(|s| s.to_string())
      .collect();
    expected.sort();
    assert_eq!(paths, expected);
  }

  #[tokio::test]
  async fn test_install_twice_is_idempotent() {
    let store = CacheStore::new(MemoryStorage::new());
    let manifest = Manifest::default();
    let network = StubNetwork::serving_site();

    install(&manifest, &origin(), &store, &network).await.unwrap();
    install(&manifest, &origin(), &store, &network).await.unwrap();

    assert_eq!(store.partition_names().unwrap(), vec!["v1-static"]);
    assert_eq!(store.partition("v1-static").keys().unwrap().len(), 5);
  }

  #[tokio::test]
  async fn test_install_failure_leaves_no_partition() {
    let manifest = Manifest::default();

    let unreachable = StubNetwork::serving_site().unreachable("/offline/bundle.js");
    let store = CacheStore::new(MemoryStorage::new());
    assert!(install(&manifest, &origin(), &store, &unreachable).await.is_err());
    assert!(store.partition_names().unwrap().is_empty());

    let server_error =
      StubNetwork::serving_site().route("/offline/index.html", Response::new(500, "boom"));
    assert!(install(&manifest, &origin(), &store, &server_error).await.is_err());
    assert!(store.partition_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_upgrade_retires_other_versions_only() {
    let store = CacheStore::new(MemoryStorage::new());
    seed(&store, &["v1-static", "v1-content", "v2-static", "v2-image", "v20-static"]);

    let report = retire_stale_partitions(&Manifest::with_version("v2"), &store)
      .await
      .unwrap();

    assert_eq!(report.deleted, vec!["v1-content", "v1-static", "v20-static"]);
    assert!(report.failed.is_empty());
    assert_eq!(store.partition_names().unwrap(), vec!["v2-image", "v2-static"]);
  }

  #[tokio::test]
  async fn test_failed_deletion_is_independent() {
    let store = CacheStore::new(FaultyStorage::sticky("v1-content"));
    seed(&store, &["v1-static", "v1-content", "v1-image", "v2-static"]);

    let report = retire_stale_partitions(&Manifest::with_version("v2"), &store)
      .await
      .unwrap();

    assert_eq!(report.deleted, vec!["v1-image", "v1-static"]);
    assert_eq!(report.failed, vec!["v1-content"]);
    assert_eq!(store.partition_names().unwrap(), vec!["v1-content", "v2-static"]);
  }

  #[test]
  fn test_lifecycle_transitions() {
    let lifecycle = Lifecycle::default();
    assert_eq!(lifecycle.state(), WorkerState::Installing);
    assert!(!lifecycle.skip_waiting());

    assert!(lifecycle
      .transition(&[WorkerState::Installed], WorkerState::Active)
      .is_err());
    lifecycle
      .transition(&[WorkerState::Installing], WorkerState::Installed)
      .unwrap();
    lifecycle.request_skip_waiting();
    assert!(lifecycle.skip_waiting());
    lifecycle
      .transition(&[WorkerState::Installed], WorkerState::Active)
      .unwrap();
    assert_eq!(lifecycle.state().to_string(), "active");
  }

  #[test]
  fn test_claim_sets_controller() {
    let clients = Clients::default();
    let tab = SessionId::from("tab-1");
    clients.register(&tab);
    clients.register(&SessionId::from("tab-2"));
    assert_eq!(clients.controller(&tab), None);

    assert_eq!(clients.claim("v1"), 2);
    assert_eq!(clients.controller(&tab).as_deref(), Some("v1"));
  }
}
