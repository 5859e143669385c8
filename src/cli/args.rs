//! Command line argument parsing for the revdex CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// revdex - build and query compressed inverted indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "revdex")]
#[command(about = "Build and query compressed disk-resident inverted indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct RevdexArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl RevdexArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Build an index from a tab-separated occurrence file
    Build(BuildArgs),

    /// Show the postings of one term
    Lookup(LookupArgs),

    /// Show index statistics
    Stats(StatsArgs),

    /// List dictionary terms in order
    Terms(TermsArgs),

    /// Sort a file of big-endian u32 values with bounded memory
    Sort(SortArgs),
}

/// Arguments for building an index
#[derive(Parser, Debug, Clone)]
pub struct BuildArgs {
    /// Occurrence file with `term<TAB>doc_id<TAB>freq` lines in doc id order
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Index directory to write
    #[arg(long, value_name = "DIR", env = "REVDEX_INDEX")]
    pub index: PathBuf,

    /// Index writer configuration file (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Flush a segment after this many buffered postings
    #[arg(long, value_name = "N", conflicts_with = "max_buffered_bytes")]
    pub max_elements: Option<usize>,

    /// Flush a segment once the buffer holds roughly this many bytes
    #[arg(long, value_name = "N")]
    pub max_buffered_bytes: Option<usize>,

    /// Write segments on a background thread
    #[arg(long)]
    pub pipelined: bool,
}

/// Arguments for looking up a term
#[derive(Parser, Debug, Clone)]
pub struct LookupArgs {
    /// Index directory
    #[arg(long, value_name = "DIR", env = "REVDEX_INDEX")]
    pub index: PathBuf,

    /// Term to look up
    #[arg(value_name = "TERM")]
    pub term: String,

    /// Maximum number of postings to print
    #[arg(short, long, default_value = "20")]
    pub limit: usize,
}

/// Arguments for showing statistics
#[derive(Parser, Debug, Clone)]
pub struct StatsArgs {
    /// Index directory
    #[arg(long, value_name = "DIR", env = "REVDEX_INDEX")]
    pub index: PathBuf,
}

/// Arguments for listing terms
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    /// Index directory
    #[arg(long, value_name = "DIR", env = "REVDEX_INDEX")]
    pub index: PathBuf,

    /// Maximum number of terms to print
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for sorting a file
#[derive(Parser, Debug, Clone)]
pub struct SortArgs {
    /// File of big-endian u32 values
    #[arg(short, long, value_name = "FILE")]
    pub input: PathBuf,

    /// Destination of the sorted values
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Values per sorted run
    #[arg(long, value_name = "N")]
    pub max_elements: Option<usize>,

    /// Directory for run files (defaults to the output's directory)
    #[arg(long, value_name = "DIR")]
    pub temp_dir: Option<PathBuf>,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}
