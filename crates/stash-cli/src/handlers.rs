//! Run the cache and report the outcome.

use crate::config::OutputFormat;
use anyhow::Context;
use stash_cache::{CacheOrchestrator, RunReport, build_store};
use stash_core::{CacheConfig, ErrorKind};
use tracing::{error, info};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILED: u8 = 1;
pub const EXIT_CONFIG: u8 = 2;

pub async fn run(config: CacheConfig, output: OutputFormat) -> anyhow::Result<u8> {
    if config.mode.is_none() {
        info!("Neither rebuild nor restore set, exiting");
        print_report(&RunReport::empty(None), output)?;
        return Ok(EXIT_OK);
    }

    let store = build_store(&config.storage)
        .await
        .context("failed to initialise object store")?;

    let report = match CacheOrchestrator::new(config, store).run().await {
        Ok(report) => report,
        Err(e) if e.kind() == ErrorKind::Config => {
            error!(error = %e, "Invalid configuration");
            return Ok(EXIT_CONFIG);
        }
        Err(e) => return Err(e).context("cache run failed"),
    };

    print_report(&report, output)?;
    Ok(exit_status(&report))
}

/// Cold caches still exit 0; a failed or timed-out mount fails the step.
pub fn exit_status(report: &RunReport) -> u8 {
    if report.success() { EXIT_OK } else { EXIT_FAILED }
}

fn print_report(report: &RunReport, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Text => print!("{}", report),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(report).context("failed to serialise report")?
        ),
    }
    Ok(())
}
