//! Single-artifact scanning pipeline.
//!
//! `Scanner::scan_bytes` performs one deterministic pass over a buffer:
//!
//! 1. Detects the format from leading bytes (`format::detect`).
//! 2. Pickle streams go through the bytecode reader and symbol tracker; each
//!    reference is classified and every non-SAFE one becomes a finding.
//! 3. Structured configs (HDF5 blobs, JSON, archive members) are checked
//!    against structural rules.
//! 4. Every failure mode (decode fault, unknown format, unreadable archive)
//!    becomes a MEDIUM finding. Nothing here returns an error or performs I/O.

use serde_json::Value;
use tracing::{debug, warn};

use crate::artifact::fingerprint;
use crate::container::archive::{self, MemberKind};
use crate::container::keras;
use crate::format::{self, ArtifactFormat};
use crate::pickle::stream::decode_streams;
use crate::report::model::{Finding, RulesCatalogInfo, ScanReport};
use crate::rules::catalog::RuleSet;
use crate::rules::classify::{classify, classify_structure};
use crate::symbols::model::Tracked;

/// Findings and warnings accumulated while scanning one artifact.
#[derive(Debug, Default)]
struct ScanState {
    findings: Vec<Finding>,
    warnings: Vec<String>,
}

impl ScanState {
    fn push(&mut self, finding: Finding, entry: Option<&str>) {
        let finding = match entry {
            Some(e) => finding.in_entry(e),
            None => finding,
        };
        debug!(
            "finding [{}] {} {}",
            finding.severity,
            finding.rule_id,
            finding.label()
        );
        self.findings.push(finding);
    }
}

/// Scans buffers against a fixed rule set. Cheap to construct; holds only a
/// shared reference to the rules.
#[derive(Debug, Clone, Copy)]
pub struct Scanner<'r> {
    rules: &'r RuleSet,
}

impl<'r> Scanner<'r> {
    pub fn new(rules: &'r RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &'r RuleSet {
        self.rules
    }

    /// Scan `bytes` and produce a complete report for `source`.
    pub fn scan_bytes(&self, source: &str, bytes: &[u8]) -> ScanReport {
        let mut state = ScanState::default();
        let detected = format::detect(bytes);
        debug!("scanning {} ({} bytes, format {:?})", source, bytes.len(), detected);

        match detected {
            Some(ArtifactFormat::Pickle) => self.scan_pickle(bytes, None, &mut state),
            Some(ArtifactFormat::Zip) => self.scan_archive(bytes, &mut state),
            Some(ArtifactFormat::Hdf5) => self.scan_hdf5(bytes, &mut state),
            Some(ArtifactFormat::JsonConfig) => match serde_json::from_slice::<Value>(bytes) {
                Ok(doc) => self.scan_config(&doc, 0, None, &mut state),
                Err(e) => state.push(
                    Finding::unrecognized_format(format!("invalid JSON config: {e}")),
                    None,
                ),
            },
            Some(ArtifactFormat::Safetensors) => state
                .warnings
                .push("flat tensor format carries no code; not scanned".to_string()),
            None => state.push(
                Finding::unrecognized_format(describe_prefix(bytes)),
                None,
            ),
        }

        ScanReport::build(
            source,
            Some(fingerprint(bytes)),
            detected,
            RulesCatalogInfo::from(self.rules),
            state.findings,
            state.warnings,
        )
    }

    fn scan_pickle(&self, bytes: &[u8], entry: Option<&str>, state: &mut ScanState) {
        let facts = decode_streams(bytes);
        debug!(
            "decoded {} instructions in {} stream(s)",
            facts.instructions, facts.streams
        );

        for tracked in facts.tracked {
            match tracked {
                Tracked::Symbol(reference) => {
                    let verdict = classify(self.rules, &reference);
                    if !verdict.is_safe() {
                        state.push(Finding::symbol(reference, verdict), entry);
                    }
                }
                Tracked::Unresolved { offset } => {
                    state.push(Finding::unresolved_import(offset), entry);
                }
            }
        }

        if let Some(fault) = &facts.fault {
            warn!("{}", fault);
            state.push(Finding::scan_error(fault), entry);
        }
        if let Some(fault) = &facts.trailing_fault {
            debug!("trailing data is not a pickle stream: {}", fault);
            state
                .warnings
                .push(with_entry(format!("undecodable trailing data: {fault}"), entry));
        } else if let Some(at) = facts.trailing_at {
            state
                .warnings
                .push(with_entry(format!("trailing data after STOP at offset {at}"), entry));
        }
    }

    fn scan_config(&self, doc: &Value, offset: u64, entry: Option<&str>, state: &mut ScanState) {
        for m in classify_structure(self.rules, doc) {
            state.push(Finding::structure(m, offset), entry);
        }
    }

    fn scan_hdf5(&self, bytes: &[u8], state: &mut ScanState) {
        let blobs = keras::extract_config_blobs(bytes);
        if blobs.is_empty() {
            state
                .warnings
                .push("no embedded model config found in container".to_string());
        }
        for blob in blobs {
            self.scan_config(&blob.document, blob.offset, None, state);
        }
    }

    fn scan_archive(&self, bytes: &[u8], state: &mut ScanState) {
        let members = match archive::read_members(bytes) {
            Ok(members) => members,
            Err(e) => {
                warn!("{}", e);
                state.push(Finding::container_error(e.to_string()), None);
                return;
            }
        };
        if members.is_empty() {
            state
                .warnings
                .push("archive contains no pickle or config members".to_string());
        }

        for member in members {
            let entry = Some(member.name.as_str());
            match member.kind {
                MemberKind::Pickle => self.scan_pickle(&member.bytes, entry, state),
                MemberKind::Config => match serde_json::from_slice::<Value>(&member.bytes) {
                    Ok(doc) => self.scan_config(&doc, 0, entry, state),
                    Err(e) => state
                        .warnings
                        .push(with_entry(format!("config is not valid JSON: {e}"), entry)),
                },
                MemberKind::Other => {}
            }
        }
    }
}

fn with_entry(message: String, entry: Option<&str>) -> String {
    match entry {
        Some(e) => format!("{e}: {message}"),
        None => message,
    }
}

fn describe_prefix(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "empty input".to_string();
    }
    let head = &bytes[..bytes.len().min(8)];
    format!("leading bytes {}", hex::encode(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::catalog::Severity;

    fn scan(bytes: &[u8]) -> ScanReport {
        let rules = RuleSet::builtin().unwrap();
        Scanner::new(&rules).scan_bytes("test", bytes)
    }

    #[test]
    fn empty_input_is_unrecognized() {
        let report = scan(b"");
        assert_eq!(report.overall_severity, Severity::Medium);
        assert!(report.format.is_none());
        assert!(report.findings[0].label().contains("empty input"));
    }

    #[test]
    fn unknown_bytes_fail_closed() {
        let report = scan(b"\x7fELF\x02\x01\x01\x00");
        assert_eq!(report.overall_severity, Severity::Medium);
        assert_eq!(report.findings[0].rule_id.as_str(), "R-FMT-01");
    }

    #[test]
    fn safetensors_pass_through_with_warning() {
        let header = br#"{"w":{"dtype":"F32","shape":[1],"data_offsets":[0,4]}}"#;
        let mut bytes = (header.len() as u64).to_le_bytes().to_vec();
        bytes.extend_from_slice(header);
        bytes.extend_from_slice(&[0u8; 4]);

        let report = scan(&bytes);
        assert_eq!(report.overall_severity, Severity::Safe);
        assert_eq!(report.format, Some(ArtifactFormat::Safetensors));
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn invalid_json_config_is_unrecognized() {
        let report = scan(b"{\"class_name\": ");
        assert_eq!(report.overall_severity, Severity::Medium);
    }

    #[test]
    fn trailing_data_is_a_warning_not_a_finding() {
        let report = scan(b"\x80\x02N.\x00\x00\x00\x00");
        assert_eq!(report.overall_severity, Severity::Safe);
        assert!(report.warnings[0].contains("trailing data"));
    }

    #[test]
    fn headerless_second_stream_is_scanned() {
        let report = scan(b"\x80\x02N.cos\nsystem\n(S'id'\ntR.");
        assert_eq!(report.overall_severity, Severity::Critical);
        assert_eq!(report.findings[0].offset(), Some(4));
    }

    #[test]
    fn undecodable_trailing_stream_warns() {
        let report = scan(b"\x80\x02N.K");
        assert_eq!(report.overall_severity, Severity::Safe);
        assert!(report.findings.is_empty());
        assert!(report.warnings[0].contains("undecodable trailing data"));
    }

    #[test]
    fn corrupt_archive_is_a_scan_error() {
        let report = scan(b"PK\x03\x04 not really a zip file");
        assert_eq!(report.overall_severity, Severity::Medium);
        assert_eq!(report.findings[0].rule_id.as_str(), "R-SCAN-01");
    }

    #[test]
    fn hdf5_without_config_warns() {
        let report = scan(b"\x89HDF\r\n\x1a\n\x00\x00\x00\x00");
        assert_eq!(report.overall_severity, Severity::Safe);
        assert!(report.warnings[0].contains("no embedded model config"));
    }
}
