use anyhow::{Context, Result};
use clap::Parser;
use docharvest::{clear_cache, queries::read_queries, HarvestConfig, Orchestrator, RunEvent, RunReport};
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

mod cli;

use cli::{Cli, Command, RunArgs};

/// The main entry point of the application.
///
/// Parses the command line, initializes logging, loads the layered configuration and
/// dispatches to the selected command.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let mut config =
        HarvestConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(cache) = &cli.cache {
        config.cache_file = cache.clone();
    }
    debug!(?config, "Configuration loaded");

    match &cli.command {
        Command::Run(args) => run(config, args, cli.quiet).await,
        Command::ClearCache => {
            if clear_cache(&config.cache_file)? {
                println!("Cache cleared: {}", config.cache_file.display());
            } else {
                println!("No cache found at {}", config.cache_file.display());
            }
            Ok(())
        }
    }
}

async fn run(mut config: HarvestConfig, args: &RunArgs, quiet: bool) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let queries = read_queries(&args.queries)
        .with_context(|| format!("failed to read queries from {}", args.queries.display()))?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current download");
            on_ctrl_c.cancel();
        }
    });

    let spinner = if quiet || args.json {
        ProgressBar::hidden()
    } else {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        spinner.enable_steady_tick(Duration::from_millis(120));
        spinner
    };
    spinner.set_message("Harvest started. Please wait until completion.");

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let progress = spinner.clone();
    let renderer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                RunEvent::QueryStarted { index, query } => {
                    progress.set_message(format!("[{}] Searching for '{}'...", index + 1, query))
                }
                RunEvent::PageStarted { query, page } if page > 0 => {
                    progress.set_message(format!("'{}': result page {}", query, page + 1))
                }
                RunEvent::Downloaded { path, .. } => {
                    progress.set_message(format!("Saved {}", path.display()))
                }
                _ => {}
            }
        }
    });

    let orchestrator = Orchestrator::from_config(config)?.with_events(tx);
    let outcome = orchestrator.run(&queries, &cancel).await;
    drop(orchestrator);
    let _ = renderer.await;
    spinner.finish_and_clear();

    let report = outcome.context("harvest failed")?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }
    Ok(())
}

fn print_summary(report: &RunReport) {
    let elapsed = report.finished_at - report.started_at;

    println!("\n=== Harvest Summary ===");
    for query in &report.queries {
        println!(
            "{}: {} downloaded, {} already cached, {} wrong type, {} failed",
            query.query, query.downloaded, query.duplicates, query.rejected, query.failed
        );
    }
    println!("Processing time: {}s", elapsed.num_seconds());
    if report.cancelled {
        println!(
            "Harvest cancelled. {} files saved in: {}",
            report.total_downloaded(),
            report.output_dir.display()
        );
    } else {
        println!(
            "Harvest completed. Files saved in: {}",
            report.output_dir.display()
        );
    }
}
