//! Event scripts: a YAML list of host events replayed against one worker
//! inside a single process.
//!
//! ```yaml
//! steps:
//!   - install
//!   - activate
//!   - fetch: { path: /offline/cities.json, accept: application/json, session: tab-1 }
//!   - message: { session: tab-1 }
//!   - upgrade: { version: v2 }
//! ```

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use crate::cache::{CacheStorage, CacheStore};
use crate::commands::describe_disposition;
use crate::net::{Method, Network, Request};
use crate::worker::{Clients, Manifest, Message, SessionId, Worker};

#[derive(Debug, Deserialize)]
pub struct Script {
  /// Data-carrying steps are written as single-key maps (`fetch: {...}`)
  #[serde(with = "serde_yaml::with::singleton_map_recursive")]
  pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Step {
  Install,
  Activate,
  Fetch {
    path: String,
    #[serde(default)]
    accept: Option<String>,
    #[serde(default = "default_method")]
    method: Method,
    #[serde(default = "default_session")]
    session: SessionId,
  },
  Message {
    #[serde(default = "default_session")]
    session: SessionId,
  },
  /// Install and activate a new version, retiring the current worker
  Upgrade { version: String },
}

fn default_method() -> Method {
  Method::Get
}

fn default_session() -> SessionId {
  SessionId::from("default")
}

impl Script {
  pub fn load(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read script {}: {}", path.display(), e))?;
    Self::parse(&contents).map_err(|e| eyre!("Failed to parse script {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    let script: Script = serde_yaml::from_str(contents)?;
    Ok(script)
  }
}

/// Run every step in order and return one line of output per step.
///
/// Failed lifecycle steps are reported and the script continues, the way a
/// host would keep running and retry later.
pub async fn replay<S, N>(
  script: &Script,
  origin: &Url,
  save_slots: usize,
  store: CacheStore<S>,
  network: Arc<N>,
) -> Result<Vec<String>>
where
  S: CacheStorage,
  N: Network,
{
  let mut worker = Worker::new(
    Manifest::default(),
    origin.clone(),
    store,
    network,
    Arc::new(Clients::default()),
    save_slots,
  );
  let mut lines = Vec::with_capacity(script.steps.len());

  for step in &script.steps {
    let line = match step {
      Step::Install => match worker.install().await {
        Ok(stored) => format!("install {}: cached {} items", worker.manifest().version, stored),
        Err(e) => format!("install {} failed: {}", worker.manifest().version, e),
      },
      Step::Activate => match worker.activate().await {
        Ok(report) => format!(
          "activate {}: deleted {:?}, failed {:?}, claimed {}",
          worker.manifest().version,
          report.deleted,
          report.failed,
          report.claimed
        ),
        Err(e) => format!("activate {} failed: {}", worker.manifest().version, e),
      },
      Step::Fetch {
        path,
        accept,
        method,
        session,
      } => {
        let url = origin
          .join(path)
          .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
        let mut request = Request::new(*method, url);
        if let Some(accept) = accept {
          request = request.with_header("Accept", accept.as_str());
        }
        let disposition = worker.on_fetch(session, request).await;
        format!("fetch {} {}: {}", method, path, describe_disposition(&disposition))
      }
      Step::Message { session } => {
        let (reply, mut rx) = mpsc::unbounded_channel();
        let handle = worker.on_message(Message {
          session: session.clone(),
          payload: serde_json::Value::Null,
          reply,
        });
        let ack = rx.recv().await.unwrap_or_default();
        match handle {
          Some(handle) => {
            let outcome = handle
              .await
              .map_err(|e| eyre!("Background save task panicked: {}", e))?;
            format!("message {}: ack {:?}, {:?}", session, ack, outcome)
          }
          None => format!("message {}: ack {:?}, nothing to save", session, ack),
        }
      }
      Step::Upgrade { version } => {
        let next = Worker::new(
          Manifest::with_version(version.as_str()),
          origin.clone(),
          worker.store().clone(),
          Arc::clone(worker.network()),
          Arc::clone(worker.clients()),
          save_slots,
        );
        let current = worker.manifest().version.clone();
        let upgraded = async {
          next.install().await?;
          let report = next.activate().await?;
          worker.retire()?;
          Ok::<_, color_eyre::Report>(report)
        }
        .await;

        match upgraded {
          Ok(report) => {
            worker = next;
            format!(
              "upgrade {} -> {}: deleted {:?}, claimed {}",
              current, version, report.deleted, report.claimed
            )
          }
          Err(e) => format!("upgrade {} -> {} failed: {}", current, version, e),
        }
      }
    };

    lines.push(line);
  }

  Ok(lines)
}
