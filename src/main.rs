//! # Tide Calendar Application Entry Point
//!
//! Thin CLI wrapper around the generation pipeline: loads the TOML
//! configuration, opens the calendar registry, runs one generation (or the
//! age-based cleanup maintenance task), and prints the run statistics and
//! subscription URL.

// Test modules
#[cfg(test)]
mod tests;

use anyhow::{bail, Context};
use std::env;
use tide_cal_lib::{config::Config, generator, registry::CalendarRegistry};
use tracing_subscriber::EnvFilter;

struct CliArgs {
    config_path: String,
    cleanup_days: Option<i64>,
    force_id: Option<String>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut parsed = CliArgs {
        config_path: "tide-cal.toml".to_string(),
        cleanup_days: None,
        force_id: None,
    };

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config_path = args.next().context("--config requires a path")?;
            }
            "--cleanup" => {
                let days = args.next().context("--cleanup requires a day count")?;
                parsed.cleanup_days = Some(days.parse().context("--cleanup expects an integer")?);
            }
            "--force-id" => {
                parsed.force_id = Some(args.next().context("--force-id requires a calendar id")?);
            }
            other => bail!("unknown argument: {other}"),
        }
    }
    Ok(parsed)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = parse_args()?;
    let config = Config::load_from_path(&args.config_path);
    let registry = CalendarRegistry::new(&config.output.data_dir)?;

    // Maintenance mode: prune stale calendars and exit
    if let Some(days) = args.cleanup_days {
        let deleted = registry.cleanup(days)?;
        println!("Deleted {deleted} calendar(s) older than {days} days");
        return Ok(());
    }

    let rt = tokio::runtime::Runtime::new()?;
    let stats = rt.block_on(generator::generate(
        &config,
        &registry,
        args.force_id.as_deref(),
    ))?;

    println!("Generated calendar {}", stats.calendar_id);
    println!(
        "Fetched {} tide predictions, kept {} tide events ({} low, {} high)",
        stats.fetched_count, stats.kept_count, stats.kept_low_count, stats.kept_high_count
    );
    if stats.sun_events_count > 0 {
        println!("Added {} sunrise/sunset events", stats.sun_events_count);
    }
    if stats.warnings > 0 {
        println!("{} warnings (missing sunrise/sunset data)", stats.warnings);
    }
    if stats.errors > 0 {
        println!("{} events skipped due to serialization errors", stats.errors);
    }
    println!("Completed in {:.2}s", stats.duration.as_secs_f64());

    if let Some(base_url) = &config.output.base_url {
        println!(
            "Calendar URL: {}",
            CalendarRegistry::calendar_url(&stats.calendar_id, base_url)
        );
    }

    Ok(())
}
