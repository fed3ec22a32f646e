//! Fallback chain for intercepted requests: cache, then network, then an
//! offline substitute chosen by resource category.

use tracing::{debug, warn};
use url::Url;

use super::classify::{classify, ResourceCategory};
use super::manifest::{Manifest, OFFLINE_IMAGE_CONTENT_TYPE};
use crate::cache::{CacheStorage, CacheStore};
use crate::net::{Network, Request, Response};

/// Indicates which tier produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Found in one of the cache partitions
  Cache,
  /// Live response from the network, returned as-is
  Network,
  /// Synthetic substitute served because cache and network both failed
  Offline,
}

/// A response together with the tier it came from.
#[derive(Debug, Clone)]
pub struct Resolved {
  pub response: Response,
  pub source: ResponseSource,
}

impl Resolved {
  fn new(response: Response, source: ResponseSource) -> Self {
    Self { response, source }
  }
}

/// Resolve an intercepted request.
///
/// 1. Cache lookup across all partitions
/// 2. Network fetch of the original request (not written to the cache)
/// 3. Offline substitute for the request's category
///
/// Returns `None` when every tier fails and the category has no substitute.
pub async fn resolve<S, N>(
  manifest: &Manifest,
  origin: &Url,
  store: &CacheStore<S>,
  network: &N,
  request: &Request,
) -> Option<Resolved>
where
  S: CacheStorage,
  N: Network,
{
  match store.match_request(request) {
    Ok(Some(response)) => {
      debug!(url = %request.url, "Serving from cache");
      return Some(Resolved::new(response, ResponseSource::Cache));
    }
    Ok(None) => debug!(url = %request.url, "Not found in cache"),
    Err(e) => warn!(url = %request.url, error = %e, "Cache lookup failed"),
  }

  match network.fetch(request).await {
    Ok(response) => {
      debug!(url = %request.url, status = response.status, "Serving from network");
      return Some(Resolved::new(response, ResponseSource::Network));
    }
    Err(e) => debug!(url = %request.url, error = %e, "Network fetch failed"),
  }

  let category = classify(request.accept());
  let substitute = offline_response(category, manifest, origin, store);
  match &substitute {
    Some(_) => debug!(url = %request.url, %category, "Serving offline substitute"),
    None => warn!(url = %request.url, %category, "No offline substitute available"),
  }
  substitute.map(|response| Resolved::new(response, ResponseSource::Offline))
}

/// Synthetic response for a category when both cache and network failed.
pub fn offline_response<S: CacheStorage>(
  category: ResourceCategory,
  manifest: &Manifest,
  origin: &Url,
  store: &CacheStore<S>,
) -> Option<Response> {
  match category {
    ResourceCategory::Image => Some(
      Response::new(200, manifest.offline_image)
        .with_header("Content-Type", OFFLINE_IMAGE_CONTENT_TYPE),
    ),
    ResourceCategory::Content => {
      let url = match origin.join(manifest.offline_page) {
        Ok(url) => url,
        Err(e) => {
          warn!(page = manifest.offline_page, error = %e, "Invalid offline page path");
          return None;
        }
      };
      match store.match_request(&Request::get(url)) {
        Ok(page) => page,
        Err(e) => {
          warn!(error = %e, "Offline page lookup failed");
          None
        }
      }
    }
    ResourceCategory::Static => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::MemoryStorage;
  use crate::testing::{origin, request, StubNetwork};

  fn offline_page_cached(store: &CacheStore<MemoryStorage>) {
    let page = request("/offline/", None);
    store
      .partition("v1-static")
      .put(&page.identity(), &Response::new(200, "<html>offline page</html>"))
      .unwrap();
  }

  #[tokio::test]
  async fn test_cache_hit_skips_network() {
    let store = CacheStore::new(MemoryStorage::new());
    let network = StubNetwork::serving_site();
    let req = request("/", Some("text/html"));
    store
      .partition("v1-static")
      .put(&req.identity(), &Response::new(200, "cached home"))
      .unwrap();

    let resolved = resolve(&Manifest::default(), &origin(), &store, &network, &req)
      .await
      .unwrap();

    assert_eq!(resolved.source, ResponseSource::Cache);
    assert_eq!(resolved.response.body, b"cached home");
    assert!(network.requests().is_empty());
  }

  #[tokio::test]
  async fn test_network_response_returned_and_not_cached() {
    let store = CacheStore::new(MemoryStorage::new());
    let network = StubNetwork::new().route("/", Response::new(200, "live home"));
    let req = request("/", Some("text/html"));

    let resolved = resolve(&Manifest::default(), &origin(), &store, &network, &req)
      .await
      .unwrap();

    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(resolved.response.body, b"live home");
    assert!(store.match_request(&req).unwrap().is_none());
    assert!(store.partition_names().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_network_error_status_is_returned_as_is() {
    let store = CacheStore::new(MemoryStorage::new());
    let network = StubNetwork::new();
    let req = request("/offline/bundle.js", None);

    let resolved = resolve(&Manifest::default(), &origin(), &store, &network, &req)
      .await
      .unwrap();

    assert_eq!(resolved.source, ResponseSource::Network);
    assert_eq!(resolved.response.status, 404);
  }

  #[tokio::test]
  async fn test_offline_image_placeholder() {
    let store = CacheStore::new(MemoryStorage::new());
    let network = StubNetwork::new();
    network.set_offline(true);

    let resolved = resolve(
      &Manifest::default(),
      &origin(),
      &store,
      &network,
      &request("/", Some("image/webp,*/*")),
    )
    .await
    .unwrap();

    assert_eq!(resolved.source, ResponseSource::Offline);
    assert_eq!(resolved.response.content_type(), Some("image/svg+xml"));
    assert_eq!(resolved.response.body, Manifest::default().offline_image.as_bytes());
  }

  #[tokio::test]
  async fn test_offline_content_serves_cached_offline_page() {
    let store = CacheStore::new(MemoryStorage::new());
    offline_page_cached(&store);
    let network = StubNetwork::new();
    network.set_offline(true);

    let resolved = resolve(
      &Manifest::default(),
      &origin(),
      &store,
      &network,
      &request("/offline/index.html", Some("text/html")),
    )
    .await
    .unwrap();

    assert_eq!(resolved.source, ResponseSource::Offline);
    assert_eq!(resolved.response.body, b"<html>offline page</html>");
  }

  #[tokio::test]
  async fn test_offline_content_without_cached_page_yields_nothing() {
    let store = CacheStore::new(MemoryStorage::new());
    let network = StubNetwork::new();
    network.set_offline(true);

    let resolved = resolve(
      &Manifest::default(),
      &origin(),
      &store,
      &network,
      &request("/", Some("text/html")),
    )
    .await;

    assert!(resolved.is_none());
  }

  #[tokio::test]
  async fn test_offline_static_has_no_substitute() {
    let store = CacheStore::new(MemoryStorage::new());
    offline_page_cached(&store);
    let network = StubNetwork::new();
    network.set_offline(true);

    for accept in [Some("application/json"), None] {
      let resolved = resolve(
        &Manifest::default(),
        &origin(),
        &store,
        &network,
        &request("/offline/cities.json", accept),
      )
      .await;
      assert!(resolved.is_none());
    }
  }
}
