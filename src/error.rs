//! Error types

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::http::response::StatusCode;

/// Errors raised while loading configuration or compiling proxy rules.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("proxy rule #{index}: missing `{field}`")]
    MissingField { index: usize, field: &'static str },

    #[error("proxy rule #{index}: prefix must not be empty")]
    EmptyPrefix { index: usize },

    #[error("proxy rule prefix must not be empty")]
    EmptyRulePrefix,

    #[error("proxy rule `{prefix}`: invalid target url: {source}")]
    InvalidTarget {
        prefix: String,
        #[source]
        source: url::ParseError,
    },

    #[error("proxy rule `{prefix}`: unsupported target scheme `{scheme}`")]
    UnsupportedScheme { prefix: String, scheme: String },

    #[error("proxy rule `{prefix}`: target url has no host")]
    MissingHost { prefix: String },

    #[error("proxy rule `{prefix}`: invalid rewrite pattern: {source}")]
    InvalidPattern {
        prefix: String,
        #[source]
        source: regex::Error,
    },

    #[error("proxy rule `{prefix}`: invalid header `{name}`")]
    InvalidHeader { prefix: String, name: String },
}

/// Per-session proxy failures.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to connect to upstream {address}: {source}")]
    UpstreamConnect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("timed out connecting to upstream {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("upstream stream error: {0}")]
    UpstreamStream(#[source] io::Error),

    #[error("client disconnected")]
    ClientDisconnected,
}

impl ProxyError {
    /// Status reported to the client when the error happens before the
    /// upstream response head was relayed.
    pub fn gateway_status(&self) -> StatusCode {
        match self {
            ProxyError::ConnectTimeout { .. } => StatusCode::GatewayTimeout,
            _ => StatusCode::BadGateway,
        }
    }
}
