//! Rule matching
//!
//! First match wins: rules are tried in configuration order and the first
//! one whose prefix starts the raw request target is used, even if a later
//! rule has a longer prefix.

use crate::proxy::rule::{ProxyRule, RuleSet};

/// A matched rule together with the rewritten request target.
#[derive(Debug, Clone)]
pub struct RouteMatch<'a> {
    pub rule: &'a ProxyRule,
    /// Output of the rule's rewrite. May be empty.
    pub upstream_path: String,
}

pub fn match_route<'a>(path: &str, rules: &'a [ProxyRule]) -> Option<RouteMatch<'a>> {
    let rule = rules.iter().find(|rule| rule.matches(path))?;
    Some(RouteMatch {
        rule,
        upstream_path: rule.rewrite().apply(path),
    })
}

impl RuleSet {
    pub fn match_route(&self, path: &str) -> Option<RouteMatch<'_>> {
        match_route(path, self.rules())
    }
}
