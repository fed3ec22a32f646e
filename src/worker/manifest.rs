//! Fixed worker manifest: version, cached paths and offline substitutes.

use super::classify::ResourceCategory;

/// Inline placeholder served for image requests while offline.
pub const OFFLINE_IMAGE: &str = concat!(
  r##"<svg role="img" aria-labelledby="offline-title""##,
  r##" viewBox="0 0 400 300" xmlns="http://www.w3.org/2000/svg">"##,
  r##"<title id="offline-title">Offline</title>"##,
  r##"<g fill="none" fill-rule="evenodd"><path fill="#D8D8D8" d="M0 0h400v300H0z"/>"##,
  r##"<text fill="#9B9B9B" font-family="Times New Roman,Times,serif" font-size="72" "##,
  r##"font-weight="bold"><tspan x="93" y="172">offline</tspan></text></g></svg>"##,
);

pub const OFFLINE_IMAGE_CONTENT_TYPE: &str = "image/svg+xml";

const STATIC_CACHE_ITEMS: &[&str] = &[
  "/",
  "/offline",
  "/offline/",
  "/offline/index.html",
  "/offline/bundle.js",
];

const URL_TO_SAVE: &str = "/offline/cities.json";
const OFFLINE_PAGE: &str = "/offline/";

/// Immutable description of what a worker version caches and serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
  pub version: String,
  /// Paths fetched and stored in the static partition at install
  pub static_cache_items: &'static [&'static str],
  /// Paths the worker intercepts
  pub cache_path_pattern: Vec<&'static str>,
  pub offline_image: &'static str,
  pub offline_page: &'static str,
  pub url_to_save: &'static str,
}

impl Default for Manifest {
  fn default() -> Self {
    let mut cache_path_pattern = STATIC_CACHE_ITEMS.to_vec();
    cache_path_pattern.push(URL_TO_SAVE);

    Self {
      version: "v1".to_string(),
      static_cache_items: STATIC_CACHE_ITEMS,
      cache_path_pattern,
      offline_image: OFFLINE_IMAGE,
      offline_page: OFFLINE_PAGE,
      url_to_save: URL_TO_SAVE,
    }
  }
}

impl Manifest {
  /// Same manifest under a different version tag.
  pub fn with_version(version: impl Into<String>) -> Self {
    Self {
      version: version.into(),
      ..Self::default()
    }
  }

  /// Partition name for a category, namespaced by version.
  pub fn cache_name(&self, category: ResourceCategory) -> String {
    format!("{}-{}", self.version, category)
  }

  /// Whether a partition belongs to this version.
  pub fn owns_partition(&self, name: &str) -> bool {
    name
      .strip_prefix(self.version.as_str())
      .is_some_and(|rest| rest.starts_with('-'))
  }

  pub fn intercepts_path(&self, path: &str) -> bool {
    self.cache_path_pattern.iter().any(|p| *p == path)
  }
}
