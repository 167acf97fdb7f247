use anyhow::{Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use pklguard_core::batch::driver::{BatchDriver, BatchOutcome};
use pklguard_core::batch::fetch::{CancelToken, HttpFetcher, RoutingFetcher};
use pklguard_core::batch::gate::Overrides;
use pklguard_core::report::render;
use pklguard_core::rules::catalog::RuleSet;

mod args;

fn render_outcome_text(outcome: &BatchOutcome) -> String {
    let mut out = String::new();
    for result in &outcome.results {
        out.push_str(&render::render_text(&result.report));
        out.push_str(&format!("Decision: {}\n\n", result.decision));
    }
    if outcome.cancelled {
        out.push_str("Batch cancelled before all artifacts were scanned\n");
    }
    out
}

fn main() -> Result<()> {
    let args = args::Args::parse();

    // RUST_LOG wins; otherwise -v selects debug for our crates.
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if args.verbose {
        EnvFilter::new("pklguard=debug")
    } else {
        EnvFilter::new("pklguard=warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let rules = match &args.rules {
        Some(path) => RuleSet::load(path)
            .with_context(|| format!("failed to load rules from {}", path.display()))?,
        None => RuleSet::builtin().context("built-in rule table is invalid")?,
    };
    debug!(
        "rules {} v{}: {} deny rule(s)",
        rules.ruleset,
        rules.version,
        rules.deny.len()
    );

    let fetcher = RoutingFetcher::new(HttpFetcher::new(&args.endpoint).with_revision(&args.revision));
    let overrides: Overrides = args.allow.iter().cloned().collect();

    let outcome = BatchDriver::new(&rules, fetcher).run(&args.artifacts, &overrides, &CancelToken::new());

    let output = match args.format {
        args::OutputFormat::Json => serde_json::to_string_pretty(&outcome)?,
        args::OutputFormat::Text => render_outcome_text(&outcome),
    };

    match args.out {
        Some(path) => std::fs::write(&path, &output)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => print!("{output}"),
    }

    std::process::exit(outcome.exit_code());
}
