use std::path::Path;

use anyhow::Result;

pub mod artifact;
pub mod batch;
pub mod container;
pub mod error;
pub mod format;
pub mod pickle;
pub mod report;
pub mod rules;
pub mod scanner;
pub mod symbols;

pub use scanner::Scanner;

pub const TOOL_NAME: &str = "pklguard";

/// JSON schema version of scan reports.
/// Bump only when the report layout changes semantically.
pub const SCHEMA_VERSION: &str = "0.1.0";

/// Scan one artifact on disk.
pub fn inspect(path: &Path, rules: &rules::catalog::RuleSet) -> Result<report::model::ScanReport> {
    let ctx = artifact::read_artifact(path)?;
    Ok(Scanner::new(rules).scan_bytes(&ctx.source, &ctx.bytes))
}
