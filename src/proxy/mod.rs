//! Reverse proxy functionality
//!
//! Rule matching, path rewriting, upstream request construction and
//! streaming of upstream responses back to the client.

pub mod forwarder;
pub mod matcher;
pub mod rule;
pub mod upstream;

pub use forwarder::{Forwarder, ProxySession, SessionOutcome, SessionState};
pub use matcher::{RouteMatch, match_route};
pub use rule::{ProxyRule, Rewrite, RuleSet};
