//! Listener, request dispatch and the unmatched-request fallback.

pub mod fallback;
pub mod listener;
pub mod service;

pub use fallback::{Fallback, NotFound};
pub use service::ProxyService;
