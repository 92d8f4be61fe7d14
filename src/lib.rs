//! streamproxy - path-rewriting streaming reverse proxy
//!
//! Forwards requests whose path starts with a configured prefix to a single
//! upstream HTTP server and relays the response body as it arrives.

pub mod config;
pub mod error;
pub mod http;
pub mod proxy;
pub mod server;
