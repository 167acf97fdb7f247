use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::report::model::ScanReport;
use crate::rules::catalog::Severity;

/// Lifecycle of one artifact inside a batch.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactState {
    Pending,
    Fetching,
    Scanning,
    Cleared,
    Warned,
    Blocked,
    Failed,
}

impl ArtifactState {
    pub fn can_advance_to(self, next: ArtifactState) -> bool {
        use ArtifactState::*;
        matches!(
            (self, next),
            (Pending, Fetching)
                | (Fetching, Scanning)
                | (Fetching, Failed)
                | (Scanning, Cleared)
                | (Scanning, Warned)
                | (Scanning, Blocked)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ArtifactState::Cleared
                | ArtifactState::Warned
                | ArtifactState::Blocked
                | ArtifactState::Failed
        )
    }
}

impl fmt::Display for ArtifactState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArtifactState::Pending => "pending",
            ArtifactState::Fetching => "fetching",
            ArtifactState::Scanning => "scanning",
            ArtifactState::Cleared => "cleared",
            ArtifactState::Warned => "warned",
            ArtifactState::Blocked => "blocked",
            ArtifactState::Failed => "failed",
        })
    }
}

/// What the caller should do with a scanned artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Proceed,
    ProceedWithWarning,
    Block,
    /// HIGH or CRITICAL, loaded anyway on explicit human request.
    Overridden,
    FetchFailed,
}

impl GateDecision {
    /// Exit code contribution:
    /// - PROCEED                          → 0
    /// - PROCEED_WITH_WARNING, OVERRIDDEN,
    ///   FETCH_FAILED                     → 1
    /// - BLOCK                            → 2
    pub fn exit_code(self) -> i32 {
        match self {
            GateDecision::Proceed => 0,
            GateDecision::ProceedWithWarning
            | GateDecision::Overridden
            | GateDecision::FetchFailed => 1,
            GateDecision::Block => 2,
        }
    }

    /// Terminal state this decision leaves the artifact in.
    pub fn final_state(self) -> ArtifactState {
        match self {
            GateDecision::Proceed => ArtifactState::Cleared,
            GateDecision::ProceedWithWarning | GateDecision::Overridden => ArtifactState::Warned,
            GateDecision::Block => ArtifactState::Blocked,
            GateDecision::FetchFailed => ArtifactState::Failed,
        }
    }
}

impl fmt::Display for GateDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            GateDecision::Proceed => "PROCEED",
            GateDecision::ProceedWithWarning => "PROCEED_WITH_WARNING",
            GateDecision::Block => "BLOCK",
            GateDecision::Overridden => "OVERRIDDEN",
            GateDecision::FetchFailed => "FETCH_FAILED",
        })
    }
}

/// Artifact identifiers a human has cleared to load despite a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Overrides(BTreeSet<String>);

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(&mut self, id: impl Into<String>) {
        self.0.insert(id.into());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Overrides {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Map a report to a gate decision.
pub fn decide(report: &ScanReport, overridden: bool) -> GateDecision {
    if report.is_fetch_failure() {
        return GateDecision::FetchFailed;
    }
    match report.overall_severity {
        Severity::Safe => GateDecision::Proceed,
        Severity::Medium => GateDecision::ProceedWithWarning,
        Severity::High | Severity::Critical if overridden => GateDecision::Overridden,
        Severity::High | Severity::Critical => GateDecision::Block,
    }
}
