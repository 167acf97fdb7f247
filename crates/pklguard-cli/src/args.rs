use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use pklguard_core::batch::fetch::{DEFAULT_HUB_ENDPOINT, DEFAULT_REVISION};

#[derive(Debug, Parser)]
#[command(
    name = "pklguard",
    version,
    about = "Static safety scanner for pickled model artifacts"
)]
pub struct Args {
    /// Artifacts to scan: file paths, http(s) URLs or hub:<org>/<repo>/<file>
    #[arg(required = true)]
    pub artifacts: Vec<String>,

    /// Rule table to use instead of the built-in one
    #[arg(long)]
    pub rules: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "json")]
    pub format: OutputFormat,

    /// Write output to a file instead of stdout
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Model hub base URL for hub: identifiers
    #[arg(long, default_value = DEFAULT_HUB_ENDPOINT)]
    pub endpoint: String,

    /// Hub revision (branch, tag or commit)
    #[arg(long, default_value = DEFAULT_REVISION)]
    pub revision: String,

    /// Load this artifact even if it would be blocked (repeatable)
    #[arg(long = "allow", value_name = "ID")]
    pub allow: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
