use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::RuleSetError;

/// Rule table shipped with the crate. Replaceable at runtime with
/// `RuleSet::load`.
pub const BUILTIN_RULES: &str = include_str!("../../rules/default.json");

/// Diagnostic rule ids used for findings that do not come from the table.
pub const RULE_SCAN_ERROR: &str = "R-SCAN-01";
pub const RULE_UNRECOGNIZED_FORMAT: &str = "R-FMT-01";
pub const RULE_UNRESOLVED_IMPORT: &str = "R-IMPORT-01";
pub const RULE_FETCH_ERROR: &str = "R-FETCH-01";
pub const RULE_UNKNOWN_GLOBAL: &str = "R-GLOBAL-01";
pub const RULE_ALLOWLISTED: &str = "R-ALLOW-01";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuleId(pub String);

impl RuleId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RuleId {
    fn from(s: &str) -> Self {
        RuleId(s.to_string())
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Risk tier. Ordering is semantic: SAFE < MEDIUM < HIGH < CRITICAL.
#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    #[default]
    Safe,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Safe => "SAFE",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Module name → attribute names. `"*"` covers every attribute of the module.
pub type SymbolTable = BTreeMap<String, Vec<String>>;

/// Whether `module.name` is covered by `table`.
///
/// An entry also covers attributes reached through it, so `Popen` matches
/// `Popen.__init__`. Used for deny tables.
pub fn table_contains(table: &SymbolTable, module: &str, name: &str) -> bool {
    let Some(names) = table.get(module) else {
        return false;
    };
    names.iter().any(|entry| {
        entry == "*"
            || entry == name
            || name
                .strip_prefix(entry.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

/// Whether `module.name` is listed in `table` as written.
///
/// No attribute walk is covered: `_rebuild_tensor` does not match
/// `_rebuild_tensor.__globals__`, and `*` only matches undotted names.
/// Used for the allowlist.
pub fn table_lists(table: &SymbolTable, module: &str, name: &str) -> bool {
    let Some(names) = table.get(module) else {
        return false;
    };
    names
        .iter()
        .any(|entry| entry == name || (entry == "*" && !name.contains('.')))
}

/// Symbols that resolve to a given severity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenyRule {
    pub id: RuleId,
    pub severity: Severity,
    pub title: String,
    /// Human-readable explanation copied into each finding.
    pub reason: String,
    pub symbols: SymbolTable,
}

/// A field/value pair that marks executable content inside a structured
/// config (for instance a Keras `Lambda` layer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralRule {
    pub id: RuleId,
    pub severity: Severity,
    pub title: String,
    pub reason: String,
    pub field: String,
    pub values: Vec<String>,
}

/// Process-wide rule configuration. Read-only once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    pub ruleset: String,
    pub version: String,
    pub deny: Vec<DenyRule>,
    #[serde(default)]
    pub allow: SymbolTable,
    #[serde(default)]
    pub structural: Vec<StructuralRule>,
    /// Raise invoked MEDIUM symbols to HIGH. Off by default.
    #[serde(default)]
    pub escalate_invoked: bool,
}

impl RuleSet {
    /// The rule table embedded in the crate.
    pub fn builtin() -> Result<Self, RuleSetError> {
        Self::from_json(BUILTIN_RULES)
    }

    pub fn load(path: &Path) -> Result<Self, RuleSetError> {
        let text = fs::read_to_string(path).map_err(|source| RuleSetError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, RuleSetError> {
        let mut rules: RuleSet = serde_json::from_str(text)?;
        rules.validate()?;
        // Highest severity first so the first match is also the worst one.
        rules.deny.sort_by(|a, b| b.severity.cmp(&a.severity));
        Ok(rules)
    }

    /// Rejects tables that would make the scanner silently permissive.
    fn validate(&self) -> Result<(), RuleSetError> {
        if self.deny.is_empty() {
            return Err(RuleSetError::Invalid("rule set has no deny rules".into()));
        }
        for rule in &self.deny {
            if rule.severity == Severity::Safe {
                return Err(RuleSetError::Invalid(format!(
                    "deny rule {} has severity SAFE",
                    rule.id
                )));
            }
            if rule.symbols.is_empty() || rule.symbols.values().any(Vec::is_empty) {
                return Err(RuleSetError::Invalid(format!(
                    "deny rule {} has an empty symbol table",
                    rule.id
                )));
            }
        }
        for rule in &self.structural {
            if rule.field.is_empty() || rule.values.is_empty() {
                return Err(RuleSetError::Invalid(format!(
                    "structural rule {} needs a field and at least one value",
                    rule.id
                )));
            }
        }
        Ok(())
    }
}
