use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

const DEFAULT_ORIGIN: &str = "http://localhost:8080/";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Site the worker serves; static items and the save path resolve against it
  #[serde(deserialize_with = "deserialize_origin")]
  pub origin: Url,
  /// Cache database path (defaults to the user data directory)
  pub database: Option<PathBuf>,
  /// How many client sessions keep a pending save request
  pub save_slots: usize,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: default_origin(),
      database: None,
      save_slots: 64,
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Default filter directive; RUST_LOG takes precedence
  pub level: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      file: None,
    }
  }
}

fn default_origin() -> Url {
  Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL")
}

fn deserialize_origin<'de, D>(deserializer: D) -> Result<Url, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let raw = String::deserialize(deserializer)?;
  parse_origin(&raw).map_err(serde::de::Error::custom)
}

/// Parse an http(s) origin, dropping any path, query or fragment.
fn parse_origin(raw: &str) -> Result<Url> {
  let url = Url::parse(raw).map_err(|e| eyre!("Invalid origin '{}': {}", raw, e))?;
  if !matches!(url.scheme(), "http" | "https") {
    return Err(eyre!("Origin must be http or https, got '{}'", raw));
  }

  Url::parse(&url.origin().ascii_serialization())
    .map_err(|e| eyre!("Invalid origin '{}': {}", raw, e))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offcache/config.yaml
  ///
  /// Falls back to defaults when no file exists. OFFCACHE_ORIGIN overrides
  /// the origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    if let Ok(origin) = std::env::var("OFFCACHE_ORIGIN") {
      config.origin = parse_origin(&origin)?;
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_empty_document_uses_defaults() {
    let config = Config::parse("{}").unwrap();
    assert_eq!(config.origin.as_str(), DEFAULT_ORIGIN);
    assert_eq!(config.save_slots, 64);
    assert_eq!(config.log.level, "info");
    assert!(config.database.is_none());
  }

  #[test]
  fn test_full_document() {
    let config = Config::parse(
      r#"
origin: https://example.org/app/index.html
database: /tmp/offcache.db
save_slots: 4
log:
  level: debug
  file: /tmp/offcache.log
"#,
    )
    .unwrap();

    assert_eq!(config.origin.as_str(), "https://example.org/");
    assert_eq!(config.database, Some(PathBuf::from("/tmp/offcache.db")));
    assert_eq!(config.save_slots, 4);
    assert_eq!(config.log.level, "debug");
    assert_eq!(config.log.file, Some(PathBuf::from("/tmp/offcache.log")));
  }

  #[test]
  fn test_rejects_non_http_origin() {
    assert!(Config::parse("origin: ftp://example.org").is_err());
    assert!(Config::parse("origin: not a url").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/nonexistent/offcache.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }
}
