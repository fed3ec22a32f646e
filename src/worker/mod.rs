//! The offline worker: interception policy, fallback chain, lifecycle and
//! background save, tied together by [`Worker`].

mod classify;
mod engine;
mod fallback;
mod lifecycle;
mod manifest;
mod policy;
mod save;

pub use engine::{FetchDisposition, Worker};
pub use fallback::{Resolved, ResponseSource};
pub use lifecycle::Clients;
pub use manifest::Manifest;
pub use save::{Message, SessionId};
