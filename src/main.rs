//! tracesift CLI: curates a directory of sandbox reports.
//!
//! Usage:
//!   tracesift /data/cape_reports
//!   tracesift /data/cape_reports -w 16 -t 5 -a terms.txt -o /data/curated
//!   tracesift /data/cape_reports --classifier-cmd "avclass -f -"
//!   tracesift extract /data/cape_reports -i "Agenttesla, Reline" -n 50
//!   tracesift extract /data/cape_reports -m avclass_mapping.json -i Virlock
//!   tracesift rename /data/cape_reports

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;

use tracesift::dedup::DuplicateStrategy;
use tracesift::extract::{self, LabelMapping, LabelQuery, LabelSource, Selection};
use tracesift::io::IOLimits;
use tracesift::logging::{init_tracing_json, init_tracing_with_level};
use tracesift::store::ReportStore;
use tracesift::PipelineConfig;

#[derive(Parser)]
#[command(name = "tracesift")]
#[command(about = "Validate, deduplicate, anonymize and label sandbox reports")]
#[command(args_conflicts_with_subcommands = true, subcommand_negates_reqs = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Copy reports out of a curated directory, chosen per family
    Extract(ExtractArgs),
    /// Rename reports to the sha256 digest of their sample
    Rename {
        /// Directory containing the JSON reports
        json_dir: PathBuf,

        /// Do not print what was renamed
        #[arg(short, long)]
        silent: bool,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Directory containing the JSON reports
    #[arg(required = true)]
    json_dir: Option<PathBuf>,

    /// Number of worker threads [default: 10]
    #[arg(short, long)]
    workers: Option<usize>,

    /// Do not print the run summary
    #[arg(short, long)]
    silent: bool,

    /// Reports with at most this many VirusTotal positives are tagged
    /// undetected or benign [default: 10]
    #[arg(short = 't', long)]
    vt_positives_threshold: Option<u32>,

    /// File with one term to anonymize per line [default: terms_to_anonymize.txt]
    #[arg(short, long)]
    anonymize_terms: Option<PathBuf>,

    /// Directory for listings, relocated reports and results [default: .]
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// JSON configuration file; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Which duplicate to keep: lowest-id or largest
    #[arg(long)]
    duplicates: Option<DuplicateStrategy>,

    /// External family classifier command, split on whitespace
    #[arg(long)]
    classifier_cmd: Option<String>,

    /// Timeout in seconds for one classifier invocation
    #[arg(long)]
    classifier_timeout: Option<u64>,
}

#[derive(Args)]
struct ExtractArgs {
    /// Directory of curated reports
    dataset_dir: PathBuf,

    /// Directory the copies go to
    #[arg(short, long, default_value = "extracted_reports")]
    output_dir: PathBuf,

    /// Label that selects reports: avclass or cape
    #[arg(short, long, default_value = "avclass")]
    label: LabelSource,

    /// Families to extract, comma separated; every family when omitted
    #[arg(short, long)]
    include: Option<String>,

    /// Families to leave out when every family is extracted, comma separated
    #[arg(short, long)]
    exclude: Option<String>,

    /// Reports per included family, or in total when no family is named
    #[arg(short = 'n', long, default_value_t = 100)]
    n_extract: usize,

    /// Take reports in id order instead of shuffling them
    #[arg(long)]
    first: bool,

    /// Shuffle seed; drawn from the clock when omitted
    #[arg(long, conflicts_with = "first")]
    seed: Option<u64>,

    /// Family mapping file to pick reports from instead of reading labels
    #[arg(short, long, requires = "include")]
    mapping: Option<PathBuf>,

    /// Do not print the extraction manifest
    #[arg(short, long)]
    silent: bool,
}

impl RunArgs {
    fn into_config(self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?,
            None => PipelineConfig::default(),
        };
        config.input_dir = self.json_dir.context("a report directory is required")?;
        config.silent |= self.silent;
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(threshold) = self.vt_positives_threshold {
            config.label.vt_positives_threshold = threshold;
        }
        if let Some(path) = self.anonymize_terms {
            config.anonymize_terms_path = Some(path);
        }
        if let Some(dir) = self.output_dir {
            config.output.output_dir = dir;
        }
        if let Some(strategy) = self.duplicates {
            config.dedup.strategy = strategy;
        }
        if let Some(cmd) = self.classifier_cmd {
            config.label.classifier.command =
                Some(cmd.split_whitespace().map(str::to_string).collect());
        }
        if let Some(secs) = self.classifier_timeout {
            config.label.classifier.timeout_secs = secs;
        }
        Ok(config)
    }
}

impl ExtractArgs {
    fn selection(&self) -> Selection {
        if self.first {
            return Selection::First;
        }
        let seed = self.seed.unwrap_or_else(|| {
            Utc::now()
                .timestamp_nanos_opt()
                .map_or(0, |nanos| nanos.unsigned_abs())
        });
        tracing::info!(seed, "Shuffling candidate reports");
        Selection::Shuffled { seed }
    }

    fn execute(self) -> Result<()> {
        let selection = self.selection();
        let include = self
            .include
            .as_deref()
            .map(extract::parse_families)
            .unwrap_or_default();
        let extraction = match &self.mapping {
            Some(path) => {
                let mapping = LabelMapping::load(path)
                    .with_context(|| format!("loading label mapping {}", path.display()))?;
                extract::select_from_mapping(
                    &mapping,
                    &self.dataset_dir,
                    &include,
                    self.n_extract,
                    selection,
                )
            }
            None => {
                let store = ReportStore::open(&self.dataset_dir, IOLimits::default())?;
                let query = LabelQuery {
                    source: self.label,
                    include,
                    exclude: self
                        .exclude
                        .as_deref()
                        .map(extract::parse_families)
                        .unwrap_or_default(),
                    limit: self.n_extract,
                    selection,
                };
                extract::select_by_label(&store, &query)?
            }
        };
        let manifest = extract::copy_extraction(&extraction, &self.output_dir)
            .with_context(|| format!("extracting into {}", self.output_dir.display()))?;
        if !self.silent {
            print_json(&manifest)?;
        }
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn init_logging(log_json: bool, silent: bool) {
    let level = if silent { "warn" } else { "info" };
    if log_json {
        init_tracing_json(level);
    } else {
        init_tracing_with_level(level);
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Extract(args)) => {
            init_logging(cli.log_json, args.silent);
            args.execute()
        }
        Some(Commands::Rename { json_dir, silent }) => {
            init_logging(cli.log_json, silent);
            let store = ReportStore::open(&json_dir, IOLimits::default())?;
            let summary = extract::rename_by_digest(&store)
                .with_context(|| format!("renaming reports in {}", json_dir.display()))?;
            if !silent {
                print_json(&summary)?;
            }
            Ok(())
        }
        None => {
            let config = cli.run.into_config()?;
            init_logging(cli.log_json, config.silent);

            let summary = tracesift::run(&config)
                .with_context(|| format!("processing reports in {}", config.input_dir.display()))?;

            if !config.silent {
                println!("{summary}");
            }
            Ok(())
        }
    }
}
