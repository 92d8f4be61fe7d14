//! Configuration loading
//!
//! The proxy is configured from a YAML document with a `server` section and
//! an ordered `proxy` rule list. Rules are compiled into
//! [`ProxyRule`](crate::proxy::rule::ProxyRule)s at startup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Config file looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "streamproxy.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Proxy rules in match order.
    #[serde(default)]
    pub proxy: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Upper bound for establishing an upstream connection.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:5173".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

/// One proxy rule as written in the config file.
///
/// `prefix` and `target` are optional here so that a missing field is
/// reported as [`ConfigError::MissingField`] with the rule's position.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleConfig {
    pub prefix: Option<String>,
    pub target: Option<String>,

    /// Rewrite the `Host` header to the target authority.
    #[serde(default)]
    pub change_origin: bool,

    #[serde(default)]
    pub rewrite: RewriteConfig,

    /// Upstream query handling; derived from the target when unset.
    #[serde(default)]
    pub query: Option<QueryMode>,

    /// Add `X-Forwarded-*` headers to the upstream request.
    #[serde(default)]
    pub xfwd: bool,

    /// Extra headers set on every upstream request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Path transform applied to a matched request target.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RewriteConfig {
    /// Forward the path unchanged.
    #[default]
    Identity,
    /// Remove the rule's prefix from the front of the path.
    StripPrefix,
    /// Replace the first match of `pattern` with `replacement`.
    Regex { pattern: String, replacement: String },
}

/// Which query string is sent upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Only the target's own query; the client's query is dropped.
    Fixed,
    /// Only the client's query.
    Forward,
    /// Target query followed by the client's query.
    Merge,
}

impl Config {
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] if it exists, or the
    /// built-in defaults. `LISTEN` overrides the listen address.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::from_file(DEFAULT_CONFIG_FILE)?
            }
            None => Self::default(),
        };

        if let Ok(listen_addr) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen_addr;
        }

        Ok(cfg)
    }
}
