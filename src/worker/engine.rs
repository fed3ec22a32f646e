use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

use super::classify::{classify, ResourceCategory};
use super::fallback::{self, Resolved};
use super::lifecycle::{self, ActivationReport, Clients, Lifecycle, WorkerState};
use super::manifest::Manifest;
use super::policy::should_handle;
use super::save::{self, Message, SaveOutcome, SaveSlots, SessionId, ACK_TOKEN};
use crate::cache::{CacheStorage, CacheStore};
use crate::net::{Network, Request};

/// What the worker did with a fetch event.
#[derive(Debug)]
pub enum FetchDisposition {
  /// Not intercepted; the host should perform the request itself
  PassThrough(Request),
  /// Intercepted. `None` means every tier failed with no substitute.
  Responded(Option<Resolved>),
}

/// One version of the offline worker.
///
/// The host delivers lifecycle, fetch and message events to it. Several
/// workers (different versions) share the host's cache store and client
/// registry, so a newly activated version takes over every open client.
pub struct Worker<S: CacheStorage, N: Network> {
  manifest: Manifest,
  origin: Url,
  store: CacheStore<S>,
  network: Arc<N>,
  slots: SaveSlots,
  clients: Arc<Clients>,
  lifecycle: Lifecycle,
}

impl<S: CacheStorage, N: Network> Worker<S, N> {
  pub fn new(
    manifest: Manifest,
    origin: Url,
    store: CacheStore<S>,
    network: Arc<N>,
    clients: Arc<Clients>,
    save_slots: usize,
  ) -> Self {
    Self {
      manifest,
      origin,
      store,
      network,
      slots: SaveSlots::new(save_slots),
      clients,
      lifecycle: Lifecycle::default(),
    }
  }

  pub fn manifest(&self) -> &Manifest {
    &self.manifest
  }

  pub fn store(&self) -> &CacheStore<S> {
    &self.store
  }

  pub fn network(&self) -> &Arc<N> {
    &self.network
  }

  pub fn clients(&self) -> &Arc<Clients> {
    &self.clients
  }

  pub fn state(&self) -> WorkerState {
    self.lifecycle.state()
  }

  pub fn wants_skip_waiting(&self) -> bool {
    self.lifecycle.skip_waiting()
  }

  /// Build a GET request for a path relative to the origin.
  pub fn request(&self, path: &str) -> Result<Request> {
    self
      .origin
      .join(path)
      .map(Request::get)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))
  }

  /// Install event: populate the static partition.
  ///
  /// On failure the worker stays in `Installing` and nothing is cached.
  pub async fn install(&self) -> Result<usize> {
    let state = self.state();
    if !matches!(state, WorkerState::Installing | WorkerState::Installed) {
      return Err(eyre!("Cannot install a worker that is {}", state));
    }

    info!(version = %self.manifest.version, "Installing worker");
    let stored = lifecycle::install(&self.manifest, &self.origin, &self.store, &*self.network)
      .await
      .inspect_err(|e| error!(version = %self.manifest.version, error = %e, "Install failed"))?;

    self.lifecycle.transition(
      &[WorkerState::Installing, WorkerState::Installed],
      WorkerState::Installed,
    )?;
    self.lifecycle.request_skip_waiting();
    Ok(stored)
  }

  /// Pick up an install done by an earlier process.
  ///
  /// The worker counts as installed when this version's static partition
  /// already exists in the store.
  pub fn resume(&self) -> Result<bool> {
    let static_partition = self.manifest.cache_name(ResourceCategory::Static);
    if !self.store.partition_names()?.contains(&static_partition) {
      return Ok(false);
    }

    if self.state() == WorkerState::Installing {
      self
        .lifecycle
        .transition(&[WorkerState::Installing], WorkerState::Installed)?;
    }
    Ok(true)
  }

  /// Activate event: drop other versions' partitions, then claim clients.
  pub async fn activate(&self) -> Result<ActivationReport> {
    let state = self.state();
    if !matches!(state, WorkerState::Installed | WorkerState::Active) {
      return Err(eyre!("Cannot activate a worker that is {}", state));
    }

    let mut report = lifecycle::retire_stale_partitions(&self.manifest, &self.store).await?;

    self.lifecycle.transition(
      &[WorkerState::Installed, WorkerState::Active],
      WorkerState::Active,
    )?;
    report.claimed = self.clients.claim(&self.manifest.version);

    info!(
      version = %self.manifest.version,
      deleted = report.deleted.len(),
      failed = report.failed.len(),
      claimed = report.claimed,
      "Worker activated"
    );
    Ok(report)
  }

  /// Mark this worker as replaced by a newer version.
  pub fn retire(&self) -> Result<()> {
    self.lifecycle.transition(
      &[
        WorkerState::Installing,
        WorkerState::Installed,
        WorkerState::Active,
      ],
      WorkerState::Superseded,
    )
  }

  /// Fetch event.
  pub async fn on_fetch(&self, session: &SessionId, request: Request) -> FetchDisposition {
    self.clients.register(session);

    if self.state() == WorkerState::Superseded {
      debug!(url = %request.url, "Superseded worker ignores fetch");
      return FetchDisposition::PassThrough(request);
    }
    if !should_handle(&self.manifest, &request) {
      return FetchDisposition::PassThrough(request);
    }

    if request.url.path() == self.manifest.url_to_save {
      self.slots.record(session, request.clone());
    }

    let resolved = fallback::resolve(
      &self.manifest,
      &self.origin,
      &self.store,
      &*self.network,
      &request,
    )
    .await;
    FetchDisposition::Responded(resolved)
  }

  /// Message event: acknowledge, then save the resource in the background.
  ///
  /// Returns the handle of the background save, or `None` when the session
  /// never requested the save resource.
  pub fn on_message(&self, message: Message) -> Option<JoinHandle<SaveOutcome>> {
    self.clients.register(&message.session);
    debug!(session = %message.session, payload = %message.payload, "Save message received");

    let stored = self.slots.get(&message.session);

    if message.reply.send(ACK_TOKEN.to_string()).is_err() {
      debug!(session = %message.session, "Message sender went away before acknowledgement");
    }

    let Some(key) = stored else {
      warn!(session = %message.session, "No save request recorded for session, ignoring");
      return None;
    };

    let partition = self.manifest.cache_name(classify(key.accept()));
    let fetch = match save::save_request(&self.manifest, &self.origin) {
      Ok(fetch) => fetch,
      Err(e) => {
        warn!(error = %e, "Cannot build save request");
        return None;
      }
    };

    Some(tokio::spawn(save::run_save(
      self.store.clone(),
      Arc::clone(&self.network),
      partition,
      key,
      fetch,
    )))
  }
}
