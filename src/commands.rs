//! Command line subcommands and their execution.

use clap::Subcommand;
use color_eyre::{eyre::eyre, Result};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStorage, CacheStore};
use crate::config::Config;
use crate::net::{HttpNetwork, Method, Network, Response};
use crate::script::{self, Script};
use crate::worker::{Clients, FetchDisposition, Manifest, ResponseSource, SessionId, Worker};

#[derive(Subcommand, Debug)]
pub enum Command {
  /// Fetch and cache the static items for the current version
  Install,
  /// Delete partitions of other versions and take control of clients
  Activate,
  /// Dispatch a single fetch event through the worker
  Fetch {
    /// Path relative to the configured origin
    path: String,
    /// Accept header sent with the request
    #[arg(long)]
    accept: Option<String>,
    #[arg(long, default_value = "GET")]
    method: Method,
    /// Client session the request belongs to
    #[arg(long, default_value = "cli")]
    session: String,
    /// Write the response body to stdout
    #[arg(long)]
    body: bool,
  },
  /// List cache partitions and their entry counts
  Partitions,
  /// Replay a YAML event script within one process
  Replay { script: PathBuf },
}

/// One-line summary of a fetch outcome.
pub fn describe_disposition(disposition: &FetchDisposition) -> String {
  match disposition {
    FetchDisposition::PassThrough(_) => "passed through".to_string(),
    FetchDisposition::Responded(None) => "no response (offline, no substitute)".to_string(),
    FetchDisposition::Responded(Some(resolved)) => {
      let source = match resolved.source {
        ResponseSource::Cache => "cache",
        ResponseSource::Network => "network",
        ResponseSource::Offline => "offline substitute",
      };
      format!("{} from {}", describe_response(&resolved.response), source)
    }
  }
}

fn describe_response(response: &Response) -> String {
  format!(
    "{} {} ({} bytes)",
    response.status,
    response.content_type().unwrap_or("-"),
    response.body.len()
  )
}

pub async fn execute<S: CacheStorage>(
  command: Command,
  config: &Config,
  store: CacheStore<S>,
) -> Result<()> {
  let network = Arc::new(HttpNetwork::new(&config.origin)?);
  let worker = Worker::new(
    Manifest::default(),
    config.origin.clone(),
    store.clone(),
    Arc::clone(&network),
    Arc::new(Clients::default()),
    config.save_slots,
  );

  match command {
    Command::Install => {
      let stored = worker.install().await?;
      println!(
        "Installed {}: cached {} static items",
        worker.manifest().version,
        stored
      );
      if worker.wants_skip_waiting() {
        println!("  skip waiting requested; run `offcache activate` to take over");
      }
    }
    Command::Activate => {
      if !worker.resume()? {
        return Err(eyre!(
          "Version {} is not installed; run `offcache install` first",
          worker.manifest().version
        ));
      }
      let report = worker.activate().await?;
      println!(
        "Activated {}: claimed {} clients",
        worker.manifest().version,
        report.claimed
      );
      for name in &report.deleted {
        println!("  deleted {}", name);
      }
      for name in &report.failed {
        println!("  could not delete {} (will retry on next activation)", name);
      }
    }
    Command::Fetch {
      path,
      accept,
      method,
      session,
      body,
    } => {
      let mut request = worker.request(&path)?;
      request.method = method;
      if let Some(accept) = accept {
        request = request.with_header("Accept", accept);
      }

      let disposition = worker.on_fetch(&SessionId::from(session), request).await;
      println!("{}", describe_disposition(&disposition));

      let response = match disposition {
        FetchDisposition::PassThrough(request) => {
          info!(url = %request.url, "Sending pass-through request to the network");
          let response = network.fetch(&request).await?;
          println!("{} from network", describe_response(&response));
          Some(response)
        }
        FetchDisposition::Responded(resolved) => resolved.map(|r| r.response),
      };

      if let (true, Some(response)) = (body, response) {
        std::io::stdout()
          .write_all(&response.body)
          .map_err(|e| eyre!("Failed to write body: {}", e))?;
      }
    }
    Command::Partitions => {
      for name in store.partition_names()? {
        let entries = store.partition(&name).keys()?;
        println!("{:<24} {} entries", name, entries.len());
      }
    }
    Command::Replay { script: path } => {
      let script = Script::load(&path)?;
      let lines = script::replay(
        &script,
        &config.origin,
        config.save_slots,
        store,
        network,
      )
      .await?;
      for line in lines {
        println!("{}", line);
      }
    }
  }

  Ok(())
}
