//! Test doubles shared by the module tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStorage, CachedEntry, MemoryStorage, Snapshot};
use crate::net::{Network, Request, RequestIdentity, Response};

pub const ORIGIN: &str = "http://localhost:8080";

pub fn origin() -> Url {
  Url::parse(ORIGIN).unwrap()
}

pub fn request(path: &str, accept: Option<&str>) -> Request {
  let request = Request::get(origin().join(path).unwrap());
  match accept {
    Some(accept) => request.with_header("Accept", accept),
    None => request,
  }
}

/// Scripted network keyed by path. Unknown paths answer 404.
#[derive(Default)]
pub struct StubNetwork {
  routes: Mutex<HashMap<String, Response>>,
  unreachable: Mutex<HashSet<String>>,
  offline: AtomicBool,
  requests: Mutex<Vec<Request>>,
}

impl StubNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Network that serves every static item of the default manifest.
  pub fn serving_site() -> Self {
    Self::new()
      .route("/", Response::new(200, "<html>home</html>"))
      .route("/offline", Response::new(200, "<html>offline</html>"))
      .route("/offline/", Response::new(200, "<html>offline page</html>"))
      .route("/offline/index.html", Response::new(200, "<html>offline</html>"))
      .route("/offline/bundle.js", Response::new(200, "console.log('offline')"))
      .route(
        "/offline/cities.json",
        Response::new(200, r#"["Skopje","Ohrid"]"#).with_header("Content-Type", "application/json"),
      )
  }

  pub fn route(self, path: &str, response: Response) -> Self {
    self.routes.lock().unwrap().insert(path.to_string(), response);
    self
  }

  /// Make a single path fail at the transport level.
  pub fn unreachable(self, path: &str) -> Self {
    self.unreachable.lock().unwrap().insert(path.to_string());
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  pub fn requests(&self) -> Vec<Request> {
    self.requests.lock().unwrap().clone()
  }

  fn respond(&self, request: &Request) -> Result<Response> {
    self.requests.lock().unwrap().push(request.clone());

    let path = request.url.path();
    if self.offline.load(Ordering::SeqCst) || self.unreachable.lock().unwrap().contains(path) {
      return Err(eyre!("Failed to fetch {}: network unreachable", request.url));
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(path)
        .cloned()
        .unwrap_or_else(|| Response::new(404, "not found")),
    )
  }
}

impl Network for StubNetwork {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send {
    let result = self.respond(request);
    async move { result }
  }
}

/// In-memory storage with injected write and delete failures.
#[derive(Default)]
pub struct FaultyStorage {
  inner: MemoryStorage,
  sticky: Option<&'static str>,
  read_only: bool,
}

impl FaultyStorage {
  /// Every single-entry write fails.
  pub fn read_only() -> Self {
    Self {
      read_only: true,
      ..Self::default()
    }
  }

  /// Deleting the named partition fails.
  pub fn sticky(name: &'static str) -> Self {
    Self {
      sticky: Some(name),
      ..Self::default()
    }
  }
}

impl CacheStorage for FaultyStorage {
  fn create_partition(&self, name: &str) -> Result<()> {
    self.inner.create_partition(name)
  }
  fn partition_names(&self) -> Result<Vec<String>> {
    self.inner.partition_names()
  }
  fn delete_partition(&self, name: &str) -> Result<bool> {
    if self.sticky == Some(name) {
      return Err(eyre!("disk I/O error"));
    }
    self.inner.delete_partition(name)
  }
  fn put_entry(&self, partition: &str, snapshot: &Snapshot) -> Result<bool> {
    if self.read_only {
      return Err(eyre!("disk full"));
    }
    self.inner.put_entry(partition, snapshot)
  }
  fn put_batch(&self, partition: &str, snapshots: &[Snapshot]) -> Result<()> {
    self.inner.put_batch(partition, snapshots)
  }
  fn get_entry(&self, partition: &str, key: &RequestIdentity) -> Result<Option<CachedEntry>> {
    self.inner.get_entry(partition, key)
  }
  fn match_entry(&self, key: &RequestIdentity) -> Result<Option<CachedEntry>> {
    self.inner.match_entry(key)
  }
  fn entry_keys(&self, partition: &str) -> Result<Vec<RequestIdentity>> {
    self.inner.entry_keys(partition)
  }
}
