use std::fmt;

use serde::{Deserialize, Serialize};

use crate::SCHEMA_VERSION;
use crate::error::{DecodeFault, FetchError};
use crate::format::ArtifactFormat;
use crate::rules::catalog::{
    RULE_FETCH_ERROR, RULE_SCAN_ERROR, RULE_UNRECOGNIZED_FORMAT, RULE_UNRESOLVED_IMPORT, RuleId,
    RuleSet, Severity,
};
use crate::rules::eval::{StructuralMatch, Verdict};
use crate::symbols::model::SymbolReference;

/// What a finding points at.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    /// An imported symbol decoded from the stream.
    Symbol(SymbolReference),
    /// A field inside a structured config container.
    Structure {
        /// Byte offset of the config document inside the artifact.
        offset: u64,
        path: String,
        field: String,
        value: String,
    },
    /// A condition that prevented a complete scan.
    Diagnostic {
        kind: DiagnosticKind,
        offset: Option<u64>,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    ScanError,
    UnrecognizedFormat,
    UnresolvedImport,
    FetchError,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DiagnosticKind::ScanError => "scan error",
            DiagnosticKind::UnrecognizedFormat => "format unrecognized",
            DiagnosticKind::UnresolvedImport => "unresolved import",
            DiagnosticKind::FetchError => "fetch error",
        })
    }
}

/// One reason an artifact is not SAFE. Severity is fixed at construction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: RuleId,
    pub severity: Severity,
    pub title: String,
    pub reason: String,
    pub subject: Subject,
    /// Archive member the finding came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

impl Finding {
    pub fn symbol(reference: SymbolReference, verdict: Verdict) -> Self {
        Self::from_verdict(verdict, Subject::Symbol(reference))
    }

    pub fn structure(m: StructuralMatch, offset: u64) -> Self {
        Self::from_verdict(
            m.verdict,
            Subject::Structure {
                offset,
                path: m.path,
                field: m.field,
                value: m.value,
            },
        )
    }

    pub fn scan_error(fault: &DecodeFault) -> Self {
        Self::diagnostic(
            RULE_SCAN_ERROR,
            DiagnosticKind::ScanError,
            Some(fault.offset),
            fault.to_string(),
            "scan error: stream is malformed or truncated; treated as unsafe",
        )
    }

    pub fn container_error(detail: impl Into<String>) -> Self {
        Self::diagnostic(
            RULE_SCAN_ERROR,
            DiagnosticKind::ScanError,
            None,
            detail.into(),
            "scan error: container could not be read; treated as unsafe",
        )
    }

    pub fn unrecognized_format(detail: impl Into<String>) -> Self {
        Self::diagnostic(
            RULE_UNRECOGNIZED_FORMAT,
            DiagnosticKind::UnrecognizedFormat,
            None,
            detail.into(),
            "format unrecognized: input matches no known serialization; treated as unsafe",
        )
    }

    pub fn unresolved_import(offset: u64) -> Self {
        Self::diagnostic(
            RULE_UNRESOLVED_IMPORT,
            DiagnosticKind::UnresolvedImport,
            Some(offset),
            "STACK_GLOBAL operands could not be recovered".to_string(),
            "unresolved import: symbol name is computed at load time; treated as unsafe",
        )
    }

    pub fn fetch_error(err: &FetchError) -> Self {
        Self::diagnostic(
            RULE_FETCH_ERROR,
            DiagnosticKind::FetchError,
            None,
            err.to_string(),
            "fetch error: artifact could not be retrieved and was not scanned",
        )
    }

    /// Attach the archive member name.
    pub fn in_entry(mut self, entry: &str) -> Self {
        self.entry = Some(entry.to_string());
        self
    }

    pub fn offset(&self) -> Option<u64> {
        match &self.subject {
            Subject::Symbol(r) => Some(r.offset),
            Subject::Structure { offset, .. } => Some(*offset),
            Subject::Diagnostic { offset, .. } => *offset,
        }
    }

    /// Short label naming what triggered the finding.
    pub fn label(&self) -> String {
        match &self.subject {
            Subject::Symbol(r) => r.to_string(),
            Subject::Structure {
                path, field, value, ..
            } => format!("{field}={value} at {path}"),
            Subject::Diagnostic { kind, detail, .. } => format!("{kind}: {detail}"),
        }
    }

    fn from_verdict(verdict: Verdict, subject: Subject) -> Self {
        Self {
            rule_id: verdict.rule_id,
            severity: verdict.severity,
            title: verdict.title,
            reason: verdict.reason,
            subject,
            entry: None,
        }
    }

    fn diagnostic(
        rule_id: &str,
        kind: DiagnosticKind,
        offset: Option<u64>,
        detail: String,
        reason: &str,
    ) -> Self {
        Self {
            rule_id: RuleId::from(rule_id),
            severity: Severity::Medium,
            title: kind.to_string(),
            reason: reason.to_string(),
            subject: Subject::Diagnostic {
                kind,
                offset,
                detail,
            },
            entry: None,
        }
    }
}

/// Artifact metadata bound to this report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactInfo {
    pub size_bytes: u64,
    pub hash: ArtifactHash,
}

/// Cryptographic artifact fingerprint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactHash {
    pub algorithm: String,
    pub value: String,
}

/// Rule catalog metadata.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct RulesCatalogInfo {
    pub ruleset: String,
    pub version: String,
}

impl From<&RuleSet> for RulesCatalogInfo {
    fn from(rules: &RuleSet) -> Self {
        Self {
            ruleset: rules.ruleset.clone(),
            version: rules.version.clone(),
        }
    }
}

/// Result of scanning one artifact.
///
/// Findings keep stream order. `overall_severity` is the maximum finding
/// severity, or SAFE when there are none.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScanReport {
    pub schema_version: String,
    pub source: String,
    /// Absent when the artifact could not be fetched.
    pub artifact: Option<ArtifactInfo>,
    pub format: Option<ArtifactFormat>,
    pub rules: RulesCatalogInfo,
    pub overall_severity: Severity,
    pub findings: Vec<Finding>,
    pub warnings: Vec<String>,
}

impl ScanReport {
    pub fn build(
        source: impl Into<String>,
        artifact: Option<ArtifactInfo>,
        format: Option<ArtifactFormat>,
        rules: RulesCatalogInfo,
        findings: Vec<Finding>,
        warnings: Vec<String>,
    ) -> Self {
        let overall_severity = overall_severity(&findings);
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            source: source.into(),
            artifact,
            format,
            rules,
            overall_severity,
            findings,
            warnings,
        }
    }

    /// Report for an artifact the fetch collaborator could not deliver.
    pub fn fetch_failed(source: impl Into<String>, rules: RulesCatalogInfo, err: &FetchError) -> Self {
        Self::build(source, None, None, rules, vec![Finding::fetch_error(err)], vec![])
    }

    pub fn is_fetch_failure(&self) -> bool {
        self.findings.iter().any(|f| {
            matches!(
                f.subject,
                Subject::Diagnostic {
                    kind: DiagnosticKind::FetchError,
                    ..
                }
            )
        })
    }

    pub fn counts(&self) -> SeverityCounts {
        let mut counts = SeverityCounts::default();
        for f in &self.findings {
            match f.severity {
                Severity::Safe => counts.safe += 1,
                Severity::Medium => counts.medium += 1,
                Severity::High => counts.high += 1,
                Severity::Critical => counts.critical += 1,
            }
        }
        counts
    }

    /// Flat view for tooling: severity, per-tier counts, one line per finding.
    pub fn summary(&self) -> ReportSummary {
        ReportSummary {
            source: self.source.clone(),
            severity: self.overall_severity.to_string(),
            counts: self.counts(),
            findings: self
                .findings
                .iter()
                .map(|f| SummaryLine {
                    severity: f.severity.to_string(),
                    offset: f.offset(),
                    entry: f.entry.clone(),
                    symbol: f.label(),
                    reason: f.reason.clone(),
                })
                .collect(),
        }
    }
}

pub fn overall_severity(findings: &[Finding]) -> Severity {
    findings
        .iter()
        .map(|f| f.severity)
        .max()
        .unwrap_or(Severity::Safe)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeverityCounts {
    pub safe: u32,
    pub medium: u32,
    pub high: u32,
    pub critical: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportSummary {
    pub source: String,
    pub severity: String,
    pub counts: SeverityCounts,
    pub findings: Vec<SummaryLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SummaryLine {
    pub severity: String,
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
    pub symbol: String,
    pub reason: String,
}
