//! Proxy rules
//!
//! A [`ProxyRule`] binds a literal path prefix to one upstream target. Rules
//! are compiled once at startup and shared read-only by every session.

use std::fmt;
use std::sync::Arc;

use regex::Regex;
use url::Url;

use crate::config::{QueryMode, RewriteConfig, RuleConfig};
use crate::error::ConfigError;

/// Path transform applied to a matched request target.
#[derive(Clone)]
pub enum Rewrite {
    /// Forward the path unchanged.
    Identity,
    /// Remove a literal prefix when present.
    StripPrefix(String),
    /// Replace the first match of `pattern` with `replacement`.
    Regex { pattern: Regex, replacement: String },
    /// Function supplied when rules are built in code.
    Custom(Arc<dyn Fn(&str) -> String + Send + Sync>),
}

impl Rewrite {
    pub fn regex(pattern: &str, replacement: impl Into<String>) -> Result<Self, regex::Error> {
        Ok(Rewrite::Regex {
            pattern: Regex::new(pattern)?,
            replacement: replacement.into(),
        })
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Rewrite::Custom(Arc::new(f))
    }

    pub fn apply(&self, path: &str) -> String {
        match self {
            Rewrite::Identity => path.to_string(),
            Rewrite::StripPrefix(prefix) => path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string(),
            Rewrite::Regex {
                pattern,
                replacement,
            } => pattern.replace(path, replacement.as_str()).into_owned(),
            Rewrite::Custom(f) => f(path),
        }
    }
}

impl fmt::Debug for Rewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rewrite::Identity => f.write_str("Identity"),
            Rewrite::StripPrefix(prefix) => f.debug_tuple("StripPrefix").field(prefix).finish(),
            Rewrite::Regex {
                pattern,
                replacement,
            } => f
                .debug_struct("Regex")
                .field("pattern", &pattern.as_str())
                .field("replacement", replacement)
                .finish(),
            Rewrite::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxyRule {
    prefix: String,
    target: Url,
    change_origin: bool,
    rewrite: Rewrite,
    query_mode: QueryMode,
    xfwd: bool,
    headers: Vec<(String, String)>,
    authority: String,
    address: String,
}

impl ProxyRule {
    /// Creates a rule with an identity rewrite and `Host` left untouched.
    pub fn new(prefix: impl Into<String>, target: &str) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::EmptyRulePrefix);
        }

        let target = Url::parse(target).map_err(|source| ConfigError::InvalidTarget {
            prefix: prefix.clone(),
            source,
        })?;

        if target.scheme() != "http" {
            return Err(ConfigError::UnsupportedScheme {
                prefix,
                scheme: target.scheme().to_string(),
            });
        }

        let host = target
            .host_str()
            .ok_or_else(|| ConfigError::MissingHost {
                prefix: prefix.clone(),
            })?
            .to_string();

        let authority = match target.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.clone(),
        };
        let address = format!("{}:{}", host, target.port_or_known_default().unwrap_or(80));

        let query_mode = if target.query().is_some() {
            QueryMode::Fixed
        } else {
            QueryMode::Forward
        };

        Ok(Self {
            prefix,
            target,
            change_origin: false,
            rewrite: Rewrite::Identity,
            query_mode,
            xfwd: false,
            headers: Vec::new(),
            authority,
            address,
        })
    }

    /// Compiles the rule at position `index` of the config file.
    pub fn from_config(index: usize, cfg: &RuleConfig) -> Result<Self, ConfigError> {
        let prefix = cfg.prefix.clone().ok_or(ConfigError::MissingField {
            index,
            field: "prefix",
        })?;
        if prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix { index });
        }
        let target = cfg.target.as_deref().ok_or(ConfigError::MissingField {
            index,
            field: "target",
        })?;

        let rewrite = match &cfg.rewrite {
            RewriteConfig::Identity => Rewrite::Identity,
            RewriteConfig::StripPrefix => Rewrite::StripPrefix(prefix.clone()),
            RewriteConfig::Regex {
                pattern,
                replacement,
            } => Rewrite::regex(pattern, replacement.clone()).map_err(|source| {
                ConfigError::InvalidPattern {
                    prefix: prefix.clone(),
                    source,
                }
            })?,
        };

        let mut rule = Self::new(prefix, target)?
            .with_change_origin(cfg.change_origin)
            .with_rewrite(rewrite)
            .with_xfwd(cfg.xfwd);

        if let Some(mode) = cfg.query {
            rule = rule.with_query_mode(mode);
        }

        for (name, value) in &cfg.headers {
            rule = rule.with_header(name, value)?;
        }

        Ok(rule)
    }

    pub fn with_change_origin(mut self, change_origin: bool) -> Self {
        self.change_origin = change_origin;
        self
    }

    pub fn with_rewrite(mut self, rewrite: Rewrite) -> Self {
        self.rewrite = rewrite;
        self
    }

    pub fn with_query_mode(mut self, mode: QueryMode) -> Self {
        self.query_mode = mode;
        self
    }

    pub fn with_xfwd(mut self, xfwd: bool) -> Self {
        self.xfwd = xfwd;
        self
    }

    /// Adds a header set on every upstream request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, ConfigError> {
        let bad = |s: &str| s.contains(['\r', '\n']);
        if name.trim().is_empty() || name.contains(':') || bad(name) || bad(value) {
            return Err(ConfigError::InvalidHeader {
                prefix: self.prefix.clone(),
                name: name.to_string(),
            });
        }
        self.headers.push((name.to_string(), value.to_string()));
        Ok(self)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn target(&self) -> &Url {
        &self.target
    }

    pub fn change_origin(&self) -> bool {
        self.change_origin
    }

    pub fn rewrite(&self) -> &Rewrite {
        &self.rewrite
    }

    pub fn query_mode(&self) -> QueryMode {
        self.query_mode
    }

    pub fn xfwd(&self) -> bool {
        self.xfwd
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// `host[:port]` as written in the target, used for `Host`.
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// `host:port` to connect to.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Literal, case-sensitive prefix test.
    pub fn matches(&self, path: &str) -> bool {
        path.starts_with(self.prefix.as_str())
    }
}

/// Ordered rule list; earlier rules take precedence.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ProxyRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ProxyRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(configs: &[RuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .enumerate()
            .map(|(index, cfg)| ProxyRule::from_config(index, cfg))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[ProxyRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
