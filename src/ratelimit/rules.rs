//! Quota policies and route classification.
//!
//! Requests are sorted into a small, fixed set of route classes by matching
//! their path against an ordered rule table. Exact path matches take
//! precedence over prefix matches, and among prefix matches the longest one
//! wins. Classification is a pure function of the path.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::{GatewayError, Result};

/// An immutable quota: at most `max_requests` per fixed window of
/// `window_secs` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaPolicy {
    /// Maximum admitted requests per window
    pub max_requests: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl QuotaPolicy {
    /// Create a new policy.
    pub const fn new(max_requests: u64, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }
}

/// A single classification rule.
///
/// A rule matches a path either exactly (any of `exact`) or by prefix.
/// A rule without a policy classifies its paths as explicitly unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Route class name, used in counter keys
    pub class: String,
    /// Literal paths matched exactly
    #[serde(default)]
    pub exact: Vec<String>,
    /// Path prefix matched with `starts_with`
    #[serde(default)]
    pub prefix: Option<String>,
    /// Quota applied to this class
    #[serde(default)]
    pub policy: Option<QuotaPolicy>,
}

/// The outcome of classifying a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub class: &'a str,
    pub policy: Option<QuotaPolicy>,
}

/// The ordered set of route rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyTable {
    #[serde(default)]
    pub rules: Vec<RouteRule>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::defaults()
    }
}

impl PolicyTable {
    /// Create a table with no rules. Every path is unlimited.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// The built-in table: chat endpoints at 20/min, the rest of the API at
    /// 60/min.
    pub fn defaults() -> Self {
        Self {
            rules: vec![
                RouteRule {
                    class: "chat".to_string(),
                    exact: vec!["/api/chat".to_string(), "/api/chat/stream".to_string()],
                    prefix: None,
                    policy: Some(QuotaPolicy::new(20, 60)),
                },
                RouteRule {
                    class: "api".to_string(),
                    exact: Vec::new(),
                    prefix: Some("/api/".to_string()),
                    policy: Some(QuotaPolicy::new(60, 60)),
                },
            ],
        }
    }

    /// Load a rule table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading route rules");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse a rule table from YAML.
    ///
    /// Accepts either a mapping with a `rules` key or a bare list of rules.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if let Ok(rules) = serde_yaml::from_str::<Vec<RouteRule>>(yaml) {
            let table = Self { rules };
            table.validate()?;
            return Ok(table);
        }

        let table: Self = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse route rules: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    /// Reject rules that can never match or would divide by zero.
    pub fn validate(&self) -> Result<()> {
        for rule in &self.rules {
            if rule.class.is_empty() {
                return Err(GatewayError::Config("route rule has an empty class".to_string()));
            }
            if rule.exact.is_empty() && rule.prefix.is_none() {
                return Err(GatewayError::Config(format!(
                    "route rule '{}' has neither exact paths nor a prefix",
                    rule.class
                )));
            }
            if let Some(policy) = rule.policy {
                if policy.window_secs == 0 {
                    return Err(GatewayError::Config(format!(
                        "route rule '{}' has a zero-length window",
                        rule.class
                    )));
                }
            }
        }
        Ok(())
    }

    /// Classify a request path.
    ///
    /// Returns `None` when no rule matches, which callers treat as unlimited.
    pub fn classify(&self, path: &str) -> Option<RouteMatch<'_>> {
        let exact = self
            .rules
            .iter()
            .find(|rule| rule.exact.iter().any(|p| p == path));

        let rule = exact.or_else(|| {
            let mut best: Option<(&RouteRule, usize)> = None;
            for rule in &self.rules {
                let Some(prefix) = rule.prefix.as_deref() else {
                    continue;
                };
                if !path.starts_with(prefix) {
                    continue;
                }
                // Strictly longer replaces; ties keep the earlier rule.
                if best.map_or(true, |(_, len)| prefix.len() > len) {
                    best = Some((rule, prefix.len()));
                }
            }
            best.map(|(rule, _)| rule)
        })?;

        Some(RouteMatch {
            class: &rule.class,
            policy: rule.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_classifies_chat() {
        let table = PolicyTable::defaults();

        let m = table.classify("/api/chat").unwrap();
        assert_eq!(m.class, "chat");
        assert_eq!(m.policy, Some(QuotaPolicy::new(20, 60)));

        let m = table.classify("/api/chat/stream").unwrap();
        assert_eq!(m.class, "chat");
    }

    #[test]
    fn test_default_table_generic_api() {
        let table = PolicyTable::defaults();

        let m = table.classify("/api/models").unwrap();
        assert_eq!(m.class, "api");
        assert_eq!(m.policy, Some(QuotaPolicy::new(60, 60)));

        // Only the two literal chat paths are in the chat class.
        let m = table.classify("/api/chat/history").unwrap();
        assert_eq!(m.class, "api");
    }

    #[test]
    fn test_non_api_path_unmatched() {
        let table = PolicyTable::defaults();
        assert!(table.classify("/index.html").is_none());
        assert!(table.classify("/api").is_none());
    }

    #[test]
    fn test_exact_beats_longer_prefix() {
        let yaml = r#"
rules:
  - class: deep
    prefix: /api/v1/items/
    policy:
      max_requests: 5
      window_secs: 10
  - class: pinned
    exact: [/api/v1/items/special]
    policy:
      max_requests: 1
      window_secs: 10
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.classify("/api/v1/items/special").unwrap().class, "pinned");
        assert_eq!(table.classify("/api/v1/items/other").unwrap().class, "deep");
    }

    #[test]
    fn test_longest_prefix_wins_regardless_of_order() {
        let yaml = r#"
- class: generic
  prefix: /api/
  policy: { max_requests: 60, window_secs: 60 }
- class: admin
  prefix: /api/admin/
  policy: { max_requests: 5, window_secs: 60 }
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.classify("/api/admin/users").unwrap().class, "admin");
        assert_eq!(table.classify("/api/users").unwrap().class, "generic");
    }

    #[test]
    fn test_rule_without_policy_is_unlimited() {
        let yaml = r#"
- class: health
  exact: [/api/health]
- class: api
  prefix: /api/
  policy: { max_requests: 60, window_secs: 60 }
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        let m = table.classify("/api/health").unwrap();
        assert_eq!(m.class, "health");
        assert!(m.policy.is_none());
    }

    #[test]
    fn test_zero_window_rejected() {
        let yaml = r#"
- class: broken
  prefix: /api/
  policy: { max_requests: 1, window_secs: 0 }
"#;
        assert!(matches!(
            PolicyTable::from_yaml(yaml),
            Err(GatewayError::Config(_))
        ));
    }

    #[test]
    fn test_rule_without_matcher_rejected() {
        let yaml = r#"
- class: nothing
  policy: { max_requests: 1, window_secs: 60 }
"#;
        assert!(PolicyTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_example_rules_file() {
        let table = PolicyTable::from_yaml(include_str!("../../config/rules.example.yaml")).unwrap();
        assert_eq!(table.rules.len(), 3);
        assert!(table.classify("/api/health").unwrap().policy.is_none());
        assert_eq!(table.classify("/api/chat/stream").unwrap().class, "chat");
    }

    #[test]
    fn test_empty_table_matches_nothing() {
        assert!(PolicyTable::empty().classify("/api/chat").is_none());
    }
}
