//! CLI for the tweet batch jobs.
//!
//! Usage:
//!   tweet-batch load-csv [FILE] [--delimiter C] [--no-header] [--limit N] [--strict]
//!   tweet-batch index [--query field=value]
//!
//! Data goes to stdout, the run summary to stderr. Exits 1 if the run aborted.

use std::path::PathBuf;
use std::process;

use batchpipe::PipelineReport;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tweet_batch::{Config, Query, SearchIndex, index_table, load_csv, logging, open_database};

#[derive(Parser)]
#[command(
    name = "tweet-batch",
    version,
    about = "Load tweets into a table, or index them from one"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Database file (default: temporary database)
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Stop after reading N records
    #[arg(long, global = true)]
    limit: Option<u64>,

    /// Abort on the first processing or write failure
    #[arg(long, global = true)]
    strict: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load a delimited tweet file into the tweet table and dump it
    LoadCsv {
        /// Delimited input file (default: csv.path from the config)
        file: Option<PathBuf>,

        /// Field delimiter
        #[arg(long)]
        delimiter: Option<char>,

        /// The first line is data, not a header
        #[arg(long)]
        no_header: bool,

        /// Rows per transaction
        #[arg(long)]
        commit_interval: Option<usize>,
    },
    /// Index the tweet table and search it
    Index {
        /// `*` or `field=value`
        #[arg(long, default_value = "*")]
        query: String,
    },
}

impl Cli {
    /// Config file (or defaults) with command-line overrides applied.
    fn resolve_config(&self) -> Result<Config, String> {
        let mut config = match &self.config {
            Some(path) => Config::load(path).map_err(|e| e.to_string())?,
            None => Config::default(),
        };
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(path) = &self.database {
            config.database.path = Some(path.clone());
        }
        if self.limit.is_some() {
            config.pipeline.limit = self.limit;
        }
        if self.strict {
            config.pipeline.strict = true;
        }
        if let Command::LoadCsv {
            file,
            delimiter,
            no_header,
            commit_interval,
        } = &self.command
        {
            if let Some(file) = file {
                config.csv.path = file.clone();
            }
            if let Some(delimiter) = delimiter {
                config.csv.delimiter = *delimiter;
            }
            if *no_header {
                config.csv.header = false;
            }
            if let Some(n) = commit_interval {
                config.pipeline.commit_interval = *n;
            }
        }
        config.validate().map_err(|e| e.to_string())?;
        Ok(config)
    }
}

fn print_json<T: Serialize>(label: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{label}: {json}"),
        Err(e) => eprintln!("Error encoding {label}: {e}"),
    }
}

/// Print the summary; true if the run completed.
fn finish(report: &PipelineReport) -> bool {
    eprintln!("{report}");
    if let Some(cause) = report.cause() {
        eprintln!("Pipeline error: {cause}");
        return false;
    }
    true
}

/// Run the selected job. The database is dropped, and a temporary one
/// removed, before this returns.
fn run(cli: &Cli, config: &Config) -> anyhow::Result<bool> {
    let db = open_database(config)?;

    match &cli.command {
        Command::LoadCsv { .. } => {
            let outcome = load_csv(config, &db)?;
            for tweet in &outcome.rows {
                print_json("tweet", tweet);
            }
            Ok(finish(&outcome.report))
        }
        Command::Index { query } => {
            let query = Query::parse(query)?;
            let mut index = SearchIndex::new(config.index.name.clone());
            let outcome = index_table(config, &db, &mut index, &query)?;
            println!("Total tweets = {}", outcome.hits.total);
            for hit in &outcome.hits.hits {
                print_json("tweet", &hit.source);
            }
            Ok(finish(&outcome.report))
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.resolve_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };
    logging::init(&config.logging.level);

    match run(&cli, &config) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {e:#}");
            process::exit(1);
        }
    }
}
