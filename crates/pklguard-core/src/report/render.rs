use crate::TOOL_NAME;
use crate::report::model::ScanReport;

pub fn render_text(report: &ScanReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("{} report: {}\n", TOOL_NAME, report.source));
    if let Some(artifact) = &report.artifact {
        out.push_str(&format!(
            "Artifact: {} bytes, {} {}\n",
            artifact.size_bytes, artifact.hash.algorithm, artifact.hash.value
        ));
    }
    if let Some(format) = &report.format {
        out.push_str(&format!("Format: {format}\n"));
    }
    out.push_str(&format!("Severity: {}\n", report.overall_severity));
    if report.findings.is_empty() {
        out.push_str("Findings: none\n");
    } else {
        out.push_str("Findings:\n");
    }
    for f in &report.findings {
        let offset = f
            .offset()
            .map(|o| format!("@{o}"))
            .unwrap_or_else(|| "@-".to_string());
        let entry = f
            .entry
            .as_deref()
            .map(|e| format!(" in {e}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "  - [{}] {}{} {} ({}): {}\n",
            f.severity,
            offset,
            entry,
            f.label(),
            f.rule_id,
            f.reason
        ));
    }
    for w in &report.warnings {
        out.push_str(&format!("  warning: {w}\n"));
    }
    out
}
