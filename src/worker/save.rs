//! "Save for offline": remember the last request for the save resource per
//! client session, and re-fetch it into the cache when asked.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use url::Url;

use super::manifest::Manifest;
use crate::cache::{CacheStorage, CacheStore};
use crate::net::{Network, Request, RequestMode};

/// Token sent back to the sender of a save message.
pub const ACK_TOKEN: &str = "response";

/// Content type declared on the save request.
const SAVE_CONTENT_TYPE: &str = "image/jpeg";

/// Identifies a client context (tab, window, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl From<&str> for SessionId {
  fn from(s: &str) -> Self {
    Self(s.to_string())
  }
}

impl From<String> for SessionId {
  fn from(s: String) -> Self {
    Self(s)
  }
}

impl fmt::Display for SessionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Inbound cross-context message asking for the save resource to be stored.
#[derive(Debug)]
pub struct Message {
  pub session: SessionId,
  /// Opaque payload, not interpreted
  pub payload: serde_json::Value,
  /// Where the acknowledgement goes
  pub reply: mpsc::UnboundedSender<String>,
}

/// What happened to a background save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
  /// Stored in the named partition
  Stored { partition: String },
  /// The network answered, but with a status that is never cached
  NotStored { status: u16 },
  /// The fetch or the write failed
  Failed,
}

/// Bounded table of the last save-path request seen per session.
///
/// When full, the least recently recorded session is evicted.
#[derive(Debug)]
pub struct SaveSlots {
  capacity: usize,
  slots: Mutex<VecDeque<(SessionId, Request)>>,
}

impl SaveSlots {
  pub fn new(capacity: usize) -> Self {
    Self {
      capacity: capacity.max(1),
      slots: Mutex::new(VecDeque::new()),
    }
  }

  pub fn record(&self, session: &SessionId, request: Request) {
    let Ok(mut slots) = self.slots.lock() else {
      warn!("Save slots lock poisoned, dropping request");
      return;
    };

    slots.retain(|(s, _)| s != session);
    slots.push_back((session.clone(), request));
    while slots.len() > self.capacity {
      if let Some((evicted, _)) = slots.pop_front() {
        debug!(session = %evicted, "Evicted save slot");
      }
    }
  }

  pub fn get(&self, session: &SessionId) -> Option<Request> {
    self.slots.lock().ok().and_then(|slots| {
      slots
        .iter()
        .find(|(s, _)| s == session)
        .map(|(_, request)| request.clone())
    })
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.slots.lock().map(|s| s.len()).unwrap_or(0)
  }
}

/// Fresh request for the save resource.
pub fn save_request(manifest: &Manifest, origin: &Url) -> Result<Request> {
  let url = origin
    .join(manifest.url_to_save)
    .map_err(|e| eyre!("Invalid save path {}: {}", manifest.url_to_save, e))?;

  Ok(
    Request::get(url)
      .with_header("Content-Type", SAVE_CONTENT_TYPE)
      .with_mode(RequestMode::Cors),
  )
}

/// Fetch the save resource and store it under `key` in `partition`.
///
/// No retries; failures are logged and reported through the outcome only.
pub async fn run_save<S, N>(
  store: CacheStore<S>,
  network: Arc<N>,
  partition: String,
  key: Request,
  fetch: Request,
) -> SaveOutcome
where
  S: CacheStorage,
  N: Network,
{
  let response = match network.fetch(&fetch).await {
    Ok(response) => response,
    Err(e) => {
      warn!(url = %fetch.url, error = %e, "Background save fetch failed");
      return SaveOutcome::Failed;
    }
  };

  if !response.ok() {
    warn!(url = %fetch.url, status = response.status, "Background save got non-success status");
    return SaveOutcome::NotStored {
      status: response.status,
    };
  }

  match store.put_in_background(&partition, key.identity(), response).await {
    Ok(Ok(true)) => {
      info!(partition = %partition, key = %key.identity(), "Saved resource for offline use");
      SaveOutcome::Stored { partition }
    }
    Ok(Ok(false)) => {
      debug!(partition = %partition, "Newer snapshot already stored");
      SaveOutcome::Stored { partition }
    }
    // Already logged by the write task
    Ok(Err(_)) => SaveOutcome::Failed,
    Err(e) => {
      warn!(error = %e, "Background save write task failed");
      SaveOutcome::Failed
    }
  }
}
