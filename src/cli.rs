//! Command line definitions.

use clap::{Args, Parser, Subcommand};
use docharvest::{FileType, HarvestConfig, SearchStrategy};
use std::path::PathBuf;

/// Search the web for documents of one file type and download each one exactly once.
#[derive(Parser, Debug)]
#[command(name = "docharvest")]
#[command(author, version, about)]
pub struct Cli {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML file with configuration defaults
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Fingerprint cache file shared by all runs
    #[arg(long, global = true)]
    pub cache: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Search and download documents for every query in a CSV file
    Run(RunArgs),
    /// Delete the fingerprint cache so earlier downloads are fetched again
    ClearCache,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// CSV file with a `queries` column
    #[arg(long)]
    pub queries: PathBuf,

    /// Directory receiving one folder per query
    #[arg(short, long)]
    pub output: PathBuf,

    /// Document type to search for
    #[arg(short, long, value_enum)]
    pub extension: Option<FileType>,

    /// How candidate URLs are discovered
    #[arg(short, long, value_enum)]
    pub strategy: Option<SearchStrategy>,

    /// Result pages per query (paged strategy)
    #[arg(short, long, value_parser = clap::value_parser!(u32).range(1..))]
    pub pages: Option<u32>,

    /// Downloads per query (direct strategy)
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Applies the flags given on the command line on top of `config`.
    pub fn apply(&self, config: &mut HarvestConfig) {
        config.output_dir = self.output.clone();
        if let Some(file_type) = self.extension {
            config.file_type = file_type;
        }
        if let Some(strategy) = self.strategy {
            config.strategy = strategy;
        }
        if let Some(pages) = self.pages {
            config.pages = pages;
        }
        if let Some(max_results) = self.max_results {
            config.max_results = max_results;
        }
    }
}
