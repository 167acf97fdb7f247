use serde::Serialize;
use tracing::{debug, info, warn};

use crate::batch::fetch::{CancelToken, Fetch};
use crate::batch::gate::{ArtifactState, GateDecision, Overrides, decide};
use crate::error::FetchError;
use crate::report::model::{RulesCatalogInfo, ScanReport};
use crate::rules::catalog::RuleSet;
use crate::scanner::Scanner;

/// Per-artifact result of a batch run.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ArtifactResult {
    pub id: String,
    pub state: ArtifactState,
    pub decision: GateDecision,
    pub report: ScanReport,
}

/// Everything a batch run produced, in input order.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct BatchOutcome {
    pub results: Vec<ArtifactResult>,
    /// Set when the run stopped early; unfinished artifacts have no result.
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Worst exit code across all results:
    /// 0 all proceed, 1 any warning or fetch failure, 2 any block.
    pub fn exit_code(&self) -> i32 {
        self.results
            .iter()
            .map(|r| r.decision.exit_code())
            .max()
            .unwrap_or(0)
    }

    pub fn reports(&self) -> impl Iterator<Item = &ScanReport> {
        self.results.iter().map(|r| &r.report)
    }
}

/// Drives fetch, scan and gate for a list of artifacts, one at a time.
pub struct BatchDriver<'r, F> {
    scanner: Scanner<'r>,
    fetcher: F,
}

impl<'r, F: Fetch> BatchDriver<'r, F> {
    pub fn new(rules: &'r RuleSet, fetcher: F) -> Self {
        Self {
            scanner: Scanner::new(rules),
            fetcher,
        }
    }

    /// Process `ids` in order. A fetch failure never stops the batch.
    pub fn run<S: AsRef<str>>(
        &self,
        ids: &[S],
        overrides: &Overrides,
        cancel: &CancelToken,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();

        for id in ids {
            let id = id.as_ref();
            match self.process(id, overrides, cancel) {
                Some(result) => outcome.results.push(result),
                None => {
                    info!("batch cancelled before {} completed", id);
                    outcome.cancelled = true;
                    break;
                }
            }
        }

        outcome
    }

    /// Returns `None` when cancelled; no report is emitted in that case.
    fn process(&self, id: &str, overrides: &Overrides, cancel: &CancelToken) -> Option<ArtifactResult> {
        let mut state = ArtifactState::Pending;
        if cancel.is_cancelled() {
            return None;
        }

        advance(id, &mut state, ArtifactState::Fetching);
        let report = match self.fetcher.fetch(id, cancel) {
            Ok(bytes) => {
                advance(id, &mut state, ArtifactState::Scanning);
                self.scanner.scan_bytes(id, &bytes)
            }
            Err(FetchError::Cancelled) => return None,
            Err(e) => {
                warn!("fetch failed for {}: {}", id, e);
                ScanReport::fetch_failed(id, RulesCatalogInfo::from(self.scanner.rules()), &e)
            }
        };

        if cancel.is_cancelled() {
            return None;
        }

        let decision = decide(&report, overrides.contains(id));
        advance(id, &mut state, decision.final_state());
        info!(
            "{}: {} ({} finding(s), overall {})",
            id,
            decision,
            report.findings.len(),
            report.overall_severity
        );

        Some(ArtifactResult {
            id: id.to_string(),
            state,
            decision,
            report,
        })
    }
}

fn advance(id: &str, state: &mut ArtifactState, next: ArtifactState) {
    debug_assert!(state.can_advance_to(next), "{state} -> {next}");
    debug!("{}: {} -> {}", id, state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::catalog::Severity;

    const BENIGN: &[u8] = b"\x80\x02]q\x00(K\x01K\x02e.";
    const SYSTEM: &[u8] = b"\x80\x02cos\nsystem\nq\x00X\x02\x00\x00\x00lsq\x01\x85q\x02Rq\x03.";

    fn serve(id: &str, _: &CancelToken) -> Result<Vec<u8>, FetchError> {
        match id {
            "benign" => Ok(BENIGN.to_vec()),
            "system" => Ok(SYSTEM.to_vec()),
            other => Err(FetchError::Unsupported(other.to_string())),
        }
    }

    #[test]
    fn results_follow_input_order() {
        let rules = RuleSet::builtin().unwrap();
        let outcome = BatchDriver::new(&rules, serve).run(
            &["system", "benign"],
            &Overrides::new(),
            &CancelToken::new(),
        );

        assert!(!outcome.cancelled);
        let ids: Vec<_> = outcome.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["system", "benign"]);
        assert_eq!(outcome.results[0].decision, GateDecision::Block);
        assert_eq!(outcome.results[0].state, ArtifactState::Blocked);
        assert_eq!(outcome.results[1].decision, GateDecision::Proceed);
        assert_eq!(outcome.results[1].state, ArtifactState::Cleared);
        assert_eq!(outcome.exit_code(), 2);
    }

    #[test]
    fn fetch_failure_does_not_stop_the_batch() {
        let rules = RuleSet::builtin().unwrap();
        let outcome = BatchDriver::new(&rules, serve).run(
            &["benign", "missing", "benign"],
            &Overrides::new(),
            &CancelToken::new(),
        );

        assert_eq!(outcome.results.len(), 3);
        let failed = &outcome.results[1];
        assert_eq!(failed.decision, GateDecision::FetchFailed);
        assert_eq!(failed.state, ArtifactState::Failed);
        assert_eq!(failed.report.overall_severity, Severity::Medium);
        assert_eq!(outcome.results[2].decision, GateDecision::Proceed);
        assert_eq!(outcome.exit_code(), 1);
    }

    #[test]
    fn pre_cancelled_run_has_no_results() {
        let rules = RuleSet::builtin().unwrap();
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = BatchDriver::new(&rules, serve).run(&["benign"], &Overrides::new(), &cancel);
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
        assert_eq!(outcome.exit_code(), 0);
    }

    #[test]
    fn cancellation_during_fetch_drops_that_artifact() {
        let rules = RuleSet::builtin().unwrap();
        let cancel = CancelToken::new();
        let fetcher = |id: &str, token: &CancelToken| -> Result<Vec<u8>, FetchError> {
            if id == "slow" {
                token.cancel();
                return Err(FetchError::Cancelled);
            }
            Ok(BENIGN.to_vec())
        };

        let outcome =
            BatchDriver::new(&rules, fetcher).run(&["a", "slow", "b"], &Overrides::new(), &cancel);
        assert!(outcome.cancelled);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].id, "a");
    }
}
