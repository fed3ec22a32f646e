//! Which requests the worker intercepts.

use tracing::trace;

use super::manifest::Manifest;
use crate::net::{Method, Request};

/// True iff the request path is allow-listed and the method is GET.
///
/// Anything else is passed through untouched.
pub fn should_handle(manifest: &Manifest, request: &Request) -> bool {
  let matches_path_pattern = manifest.intercepts_path(request.url.path());
  let is_get_request = request.method == Method::Get;

  if !(matches_path_pattern && is_get_request) {
    trace!(
      url = %request.url,
      method = %request.method,
      matches_path_pattern,
      is_get_request,
      "Passing request through"
    );
    return false;
  }

  true
}
