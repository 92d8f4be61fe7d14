use std::time::Duration;

use crate::config::Config;
use crate::error::ConfigError;
use crate::proxy::forwarder::Forwarder;
use crate::proxy::matcher::RouteMatch;
use crate::proxy::rule::RuleSet;
use crate::server::fallback::{Fallback, NotFound};

/// Everything a connection needs to answer requests: the compiled rules,
/// the forwarder for matched requests and the fallback for the rest.
///
/// Built once at startup and shared read-only by all connections.
pub struct ProxyService {
    rules: RuleSet,
    forwarder: Forwarder,
    fallback: Box<dyn Fallback>,
}

impl ProxyService {
    pub fn new(rules: RuleSet, forwarder: Forwarder) -> Self {
        Self {
            rules,
            forwarder,
            fallback: Box::new(NotFound),
        }
    }

    pub fn from_config(cfg: &Config) -> Result<Self, ConfigError> {
        let rules = RuleSet::from_config(&cfg.proxy)?;
        let forwarder = Forwarder::new(Duration::from_millis(cfg.server.connect_timeout_ms));
        Ok(Self::new(rules, forwarder))
    }

    pub fn with_fallback(mut self, fallback: impl Fallback + 'static) -> Self {
        self.fallback = Box::new(fallback);
        self
    }

    pub fn route(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.rules.match_route(path)
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn forwarder(&self) -> &Forwarder {
        &self.forwarder
    }

    pub fn fallback(&self) -> &dyn Fallback {
        self.fallback.as_ref()
    }
}
