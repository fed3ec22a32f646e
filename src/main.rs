mod cache;
mod commands;
mod config;
mod logging;
mod net;
mod script;
#[cfg(test)]
mod testing;
mod worker;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use cache::{CacheStore, MemoryStorage, SqliteStorage};
use commands::Command;

#[derive(Parser, Debug)]
#[command(name = "offcache")]
#[command(about = "Offline-first request interception and caching")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory for this run only
  #[arg(long)]
  ephemeral: bool,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&config.log)?;

  if args.ephemeral {
    let store = CacheStore::new(MemoryStorage::new());
    return commands::execute(args.command, &config, store).await;
  }

  let storage = match &config.database {
    Some(path) => SqliteStorage::open_at(path)?,
    None => SqliteStorage::open()?,
  };
  commands::execute(args.command, &config, CacheStore::new(storage)).await
}
