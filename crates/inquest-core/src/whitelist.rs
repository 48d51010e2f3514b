//! Whitelist enforcement for cross-domain data isolation.
//!
//! Each domain may only contribute field names from its closed allow-list,
//! and the global forbidden set wins over any allow-list that mistakenly
//! includes one of its members. Pure functions, no state beyond the tables
//! built at startup.
//!
//! Blocked field *names* are logged, never their values.

use std::collections::{HashMap, HashSet};

use crate::error::{EngineError, Result};
use crate::state::{Domain, DomainFindings, JsonMap};

/// How isolation violations are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnforcementMode {
    /// Raise on any violation. Used in tests and staging.
    Strict,
    /// Strip violating keys and append a structured warning.
    #[default]
    Production,
}

/// Per-domain allow-lists plus the global forbidden set. Built once at
/// startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct WhitelistPolicy {
    allowed: HashMap<Domain, HashSet<String>>,
    forbidden: HashSet<String>,
}

impl WhitelistPolicy {
    pub fn builder() -> WhitelistPolicyBuilder {
        WhitelistPolicyBuilder::default()
    }

    /// Fields the given domain is permitted to contribute.
    pub fn allowed_for(&self, domain: &Domain) -> Option<&HashSet<String>> {
        self.allowed.get(domain)
    }

    pub fn is_forbidden(&self, field: &str) -> bool {
        self.forbidden.contains(field)
    }

    /// Keep only keys present in the domain's whitelist; drop anything in the
    /// global forbidden set unconditionally, even if a domain's whitelist
    /// mistakenly includes it. Returns the filtered map and the sorted names
    /// of blocked fields.
    pub fn filter_fields(&self, domain: &Domain, raw: &JsonMap) -> (JsonMap, Vec<String>) {
        let allowed = self.allowed.get(domain);
        let mut filtered = JsonMap::new();
        let mut blocked = Vec::new();

        for (key, value) in raw {
            let permitted = !self.forbidden.contains(key)
                && allowed.is_some_and(|set| set.contains(key));
            if permitted {
                filtered.insert(key.clone(), value.clone());
            } else {
                blocked.push(key.clone());
            }
        }

        blocked.sort();
        if !blocked.is_empty() {
            tracing::warn!(
                domain = %domain,
                blocked_count = blocked.len(),
                blocked_fields = ?blocked,
                "whitelist blocked fields"
            );
        }

        (filtered, blocked)
    }

    /// Defense-in-depth re-check of already-filtered metrics. Returns the
    /// names of any violating keys; on output of `filter_fields` this is
    /// always empty, making a second application a no-op.
    pub fn validate_metrics(&self, domain: &Domain, metrics: &JsonMap) -> Vec<String> {
        let allowed = self.allowed.get(domain);
        let mut violations: Vec<String> = metrics
            .keys()
            .filter(|key| {
                self.forbidden.contains(*key) || !allowed.is_some_and(|set| set.contains(*key))
            })
            .cloned()
            .collect();
        violations.sort();
        violations
    }

    /// Final gate before merge. Strict mode raises; production mode strips
    /// violating keys from the findings and returns warnings for the journal.
    pub fn assert_isolation(
        &self,
        domain: &Domain,
        findings: &mut DomainFindings,
        mode: EnforcementMode,
    ) -> Result<Vec<String>> {
        let violations = self.validate_metrics(domain, &findings.metrics);
        if violations.is_empty() {
            return Ok(Vec::new());
        }

        match mode {
            EnforcementMode::Strict => Err(EngineError::WhitelistViolation {
                domain: domain.to_string(),
                fields: violations,
            }),
            EnforcementMode::Production => {
                for key in &violations {
                    findings.metrics.remove(key);
                }
                tracing::warn!(
                    domain = %domain,
                    stripped = violations.len(),
                    "stripped isolation violations before merge"
                );
                let warnings = violations
                    .iter()
                    .map(|key| format!("field '{key}' stripped from domain '{domain}'"))
                    .collect();
                Ok(warnings)
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct WhitelistPolicyBuilder {
    allowed: HashMap<Domain, HashSet<String>>,
    forbidden: HashSet<String>,
}

impl WhitelistPolicyBuilder {
    /// Register a domain's allow-list, replacing any previous entry.
    pub fn domain<I, S>(mut self, domain: impl Into<Domain>, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.insert(
            domain.into(),
            fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Add fields to the global forbidden set.
    pub fn forbid<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forbidden.extend(fields.into_iter().map(Into::into));
        self
    }

    pub fn build(self) -> WhitelistPolicy {
        WhitelistPolicy {
            allowed: self.allowed,
            forbidden: self.forbidden,
        }
    }
}
