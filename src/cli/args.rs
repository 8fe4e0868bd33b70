//! Command line argument parsing for the Glaive CLI using clap.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Glaive - inspect and maintain segmented search indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "glaive")]
#[command(about = "Inspect and maintain segmented search indexes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct GlaiveArgs {
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

    /// Index manager configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "GLAIVE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl GlaiveArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Show the latest snapshot
    Snapshot(IndexArgs),

    /// Show document and segment statistics
    Stats(IndexArgs),

    /// List lock markers
    Locks(LocksArgs),

    /// Add documents from a JSON Lines file
    Add(AddArgs),

    /// Delete documents containing a term
    Delete(DeleteArgs),

    /// Run a background merge
    Merge(MergeArgs),

    /// Delete files no snapshot needs anymore
    Purge(IndexArgs),
}

/// Arguments naming only an index
#[derive(Parser, Debug, Clone)]
pub struct IndexArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Arguments for listing locks
#[derive(Parser, Debug, Clone)]
pub struct LocksArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Remove markers whose holders are provably gone
    #[arg(long)]
    pub clear_stale: bool,
}

/// Arguments for adding documents
#[derive(Parser, Debug, Clone)]
pub struct AddArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Document file, one JSON object of string fields per line
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,

    /// Create the index if it doesn't exist
    #[arg(long)]
    pub create: bool,

    /// Replace every existing document
    #[arg(long)]
    pub truncate: bool,

    /// Merge all segments while committing
    #[arg(long)]
    pub optimize: bool,
}

/// Arguments for deleting documents
#[derive(Parser, Debug, Clone)]
pub struct DeleteArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Field to match
    #[arg(long)]
    pub field: String,

    /// Term to match
    #[arg(long)]
    pub term: String,
}

/// Arguments for merging
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Merge every segment into one
    #[arg(long)]
    pub optimize: bool,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_levels() {
        // Default verbosity
        let args = GlaiveArgs::try_parse_from(["glaive", "stats", "idx"]).unwrap();
        assert_eq!(args.verbosity(), 1);

        let args = GlaiveArgs::try_parse_from(["glaive", "-vv", "stats", "idx"]).unwrap();
        assert_eq!(args.verbosity(), 2);

        // Quiet flag
        let args = GlaiveArgs::try_parse_from(["glaive", "-vvv", "--quiet", "stats", "idx"]).unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_output_format() {
        let args =
            GlaiveArgs::try_parse_from(["glaive", "--format", "json", "snapshot", "idx"]).unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_locks_args() {
        let args =
            GlaiveArgs::try_parse_from(["glaive", "locks", "/data/idx", "--clear-stale"]).unwrap();
        if let Command::Locks(locks_args) = args.command {
            assert_eq!(locks_args.index_path, PathBuf::from("/data/idx"));
            assert!(locks_args.clear_stale);
        } else {
            panic!("Expected Locks command");
        }
    }

    #[test]
    fn test_merge_args() {
        let args = GlaiveArgs::try_parse_from(["glaive", "merge", "idx", "--optimize"]).unwrap();
        assert!(matches!(args.command, Command::Merge(MergeArgs { optimize: true, .. })));
    }

    #[test]
    fn test_delete_requires_term() {
        assert!(GlaiveArgs::try_parse_from(["glaive", "delete", "idx", "--field", "title"]).is_err());
    }
}
