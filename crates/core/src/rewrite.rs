//! Compatibility shim for generated SQL.
//!
//! The reasoning model works from a schema description that does not always
//! match the deployed column names. Each [`RewriteRule`] is a literal
//! substring substitution. The rules are applied in order, repeatedly, until
//! the query stops changing, before it reaches the store. Fixing a new alias
//! drift means adding a rule, not touching the orchestration code.

use serde::{Deserialize, Serialize};

/// Upper bound on rewrite passes; matches created at rule boundaries could
/// otherwise keep a pathological rule set cycling.
const MAX_REWRITE_PASSES: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewriteRule {
    pub pattern: String,
    pub replacement: String,
}

impl RewriteRule {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self { pattern: pattern.into(), replacement: replacement.into() }
    }

    /// A rule whose replacement still contains its pattern would fire again on
    /// a second pass, so it can never be idempotent.
    pub fn validate(&self) -> Result<(), String> {
        if self.pattern.is_empty() {
            return Err("rewrite rule pattern must not be empty".to_string());
        }
        if self.replacement.contains(&self.pattern) {
            return Err(format!(
                "rewrite rule `{}` -> `{}` is not idempotent: replacement contains the pattern",
                self.pattern, self.replacement
            ));
        }
        Ok(())
    }
}

/// `boiler_fault_codes` exposes `model_name`, while the model habitually
/// writes `bf.model`.
pub fn default_rewrite_rules() -> Vec<RewriteRule> {
    vec![
        RewriteRule::new(" bf.model ", " bf.model_name "),
        RewriteRule::new(" bf.model,", " bf.model_name,"),
        RewriteRule::new(".model =", ".model_name ="),
    ]
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryRewriter {
    rules: Vec<RewriteRule>,
}

impl Default for QueryRewriter {
    fn default() -> Self {
        Self { rules: default_rewrite_rules() }
    }
}

impl QueryRewriter {
    pub fn new(rules: Vec<RewriteRule>) -> Result<Self, String> {
        for rule in &rules {
            rule.validate()?;
        }
        for rule in &rules {
            let reintroduced = rules.iter().find(|other| rule.replacement.contains(&other.pattern));
            if let Some(other) = reintroduced {
                return Err(format!(
                    "rewrite rule `{}` -> `{}` reintroduces the pattern `{}`",
                    rule.pattern, rule.replacement, other.pattern
                ));
            }
        }
        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[RewriteRule] {
        &self.rules
    }

    /// Overlapping occurrences such as `bf.model bf.model` share a space, so
    /// one pass can leave a match behind. Passes repeat until nothing changes.
    pub fn rewrite(&self, sql: &str) -> String {
        let mut query = sql.to_string();
        for _ in 0..MAX_REWRITE_PASSES {
            let next = self.apply_once(&query);
            if next == query {
                break;
            }
            query = next;
        }
        query
    }

    fn apply_once(&self, sql: &str) -> String {
        self.rules
            .iter()
            .fold(sql.to_string(), |query, rule| query.replace(&rule.pattern, &rule.replacement))
    }
}
