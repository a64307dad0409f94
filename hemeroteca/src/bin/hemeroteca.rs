//! Command line front end: build shard indexes, query words, scan documents.
//!
//! Usage:
//!     hemeroteca --config hemeroteca.toml build
//!     hemeroteca query Água --normalize
//!     hemeroteca combine and agua epidemia
//!     hemeroteca scan token --word Agua --word Epidemia corpus/alfonso_xii

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hemeroteca::corpus::list_documents;
use hemeroteca::fuzzy::{self, ScanMode};
use hemeroteca::progress::ProgressObserver;
use hemeroteca::timeline::{year_series, WordTimeline};
use hemeroteca::{CombineMode, Config, SearchService};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index every corpus subfolder not indexed yet
    Build {
        /// Skip creating the uniqueness index after loading
        #[arg(long)]
        no_unique_index: bool,
    },
    /// Resolve one word and print its year series
    Query {
        word: String,
        /// Neighbors requested from each shard
        #[arg(short)]
        k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        /// Divide counts by the documents published each year
        #[arg(long)]
        normalize: bool,
    },
    /// Resolve several words and combine them with AND or OR
    Combine {
        mode: CombineMode,
        #[arg(required = true)]
        words: Vec<String>,
        #[arg(short)]
        k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
        #[arg(long)]
        normalize: bool,
    },
    /// Scan document files directly with edit distance
    Scan {
        /// `token` or `contiguous`
        mode: ScanMode,
        #[arg(short, long = "word", required = true)]
        words: Vec<String>,
        /// Document files, or folders searched recursively
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// One bar per shard being built.
struct TerminalProgress {
    bars: MultiProgress,
    active: Mutex<HashMap<String, ProgressBar>>,
    style: ProgressStyle,
}

impl TerminalProgress {
    fn new() -> Result<Self> {
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {prefix:>16} [{bar:40.cyan/blue}] {pos}/{len} ({eta})")?
            .progress_chars("#>-");
        Ok(Self {
            bars: MultiProgress::new(),
            active: Mutex::new(HashMap::new()),
            style,
        })
    }
}

impl ProgressObserver for TerminalProgress {
    fn task_started(&self, name: &str, total: u64) {
        let bar = self.bars.add(ProgressBar::new(total));
        bar.set_style(self.style.clone());
        bar.set_prefix(name.to_string());
        self.active.lock().insert(name.to_string(), bar);
    }

    fn advance(&self, name: &str, steps: u64) {
        if let Some(bar) = self.active.lock().get(name) {
            bar.inc(steps);
        }
    }

    fn task_finished(&self, name: &str) {
        if let Some(bar) = self.active.lock().remove(name) {
            bar.finish();
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn expand_documents(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut documents = Vec::new();
    for input in inputs {
        if input.is_dir() {
            documents.extend(list_documents(input).with_context(|| format!("Failed to list {}", input.display()))?);
        } else {
            documents.push(input.clone());
        }
    }
    Ok(documents)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::default(),
    };

    match args.command {
        Command::Build { no_unique_index } => {
            if no_unique_index {
                config.create_unique_index = false;
            }
            let service = SearchService::open(config).context("Failed to open search service")?;
            let progress = TerminalProgress::new()?;
            let report = service.build(&progress).context("Build failed")?;
            print_json(&report)?;
        }
        Command::Query {
            word,
            k,
            threshold,
            normalize,
        } => {
            config.neighbors = k.unwrap_or(config.neighbors);
            config.threshold = threshold.unwrap_or(config.threshold);
            let service = SearchService::open(config).context("Failed to open search service")?;
            let docs_per_year = service.shards().docs_per_year();
            let result = service.search_word(word.clone()).await?;
            let timeline = WordTimeline {
                series: year_series(&result.years, &docs_per_year, normalize),
                word,
                normalized: normalize,
                result,
            };
            print_json(&timeline)?;
        }
        Command::Combine {
            mode,
            words,
            k,
            threshold,
            normalize,
        } => {
            let k = k.unwrap_or(config.neighbors);
            let threshold = threshold.unwrap_or(config.threshold);
            let service = SearchService::open(config).context("Failed to open search service")?;
            let docs_per_year = service.shards().docs_per_year();
            let timeline = service.words_timeline(&words, mode, &docs_per_year, k, threshold, normalize)?;
            print_json(&timeline)?;
        }
        Command::Scan { mode, words, files } => {
            let documents = expand_documents(&files)?;
            let report = fuzzy::scan(&documents, &words, mode);
            print_json(&report)?;
        }
    }

    Ok(())
}
