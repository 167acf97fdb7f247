use crate::rules::catalog::{RuleId, Severity};

/// Outcome of evaluating one subject against the rule set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub rule_id: RuleId,
    pub severity: Severity,
    pub title: String,
    pub reason: String,
}

impl Verdict {
    pub fn new(
        rule_id: impl Into<RuleId>,
        severity: Severity,
        title: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            rule_id: rule_id.into(),
            severity,
            title: title.into(),
            reason: reason.into(),
        }
    }

    pub fn is_safe(&self) -> bool {
        self.severity == Severity::Safe
    }
}

/// A structural rule hit inside a decoded config document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuralMatch {
    pub verdict: Verdict,
    /// JSON pointer to the object carrying the field.
    pub path: String,
    pub field: String,
    pub value: String,
}
