use std::fmt;

/// What kind of resource a request expects, derived from its Accept header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
  /// HTML documents
  Content,
  Image,
  /// Everything else, including requests without an Accept header
  Static,
}

impl ResourceCategory {
  pub fn as_str(&self) -> &'static str {
    match self {
      ResourceCategory::Content => "content",
      ResourceCategory::Image => "image",
      ResourceCategory::Static => "static",
    }
  }
}

impl fmt::Display for ResourceCategory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Classify an Accept header. `text/html` takes priority over `image`.
pub fn classify(accept: Option<&str>) -> ResourceCategory {
  match accept {
    Some(accept) if accept.contains("text/html") => ResourceCategory::Content,
    Some(accept) if accept.contains("image") => ResourceCategory::Image,
    _ => ResourceCategory::Static,
  }
}
