//! Command-line argument parsing for rfpanalyst
//!
//! Provides clap-based CLI with subcommands and verbosity control.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::logging::Verbosity;

/// rfpanalyst - staged proposal reports from RFP documents with local Ollama models
#[derive(Parser, Debug)]
#[command(name = "rfpanalyst")]
#[command(author = "Jerome (Kubashen) Naidoo")]
#[command(version)]
#[command(about = "Turn an RFP document into strategy, risk, KSF and outline reports", long_about = None)]
pub struct Args {
    /// Configuration file path (default: ~/.rfpanalyst/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbosity level: -q (quiet), default (normal), -v (verbose), -vv (very verbose)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (warnings and results only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a text file and generate report stages
    Run {
        /// RFP document (UTF-8 text)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Stage to produce, with its dependencies (repeatable; default: all)
        #[arg(short, long = "stage", value_name = "NAME")]
        stages: Vec<String>,

        /// Manual run counter; change it to force regeneration
        #[arg(long, default_value_t = 0)]
        run_id: u64,

        /// Write one Markdown file per stage and a JSON export bundle here
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Embed with the local hashing embedder instead of Ollama
        #[arg(long)]
        offline: bool,
    },

    /// Regenerate the unlocked items of one report stage
    Refine {
        /// RFP document (UTF-8 text)
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Report stage to refine
        #[arg(short, long)]
        stage: String,

        /// Item numbers to keep unchanged, comma separated
        #[arg(short, long, value_delimiter = ',')]
        lock: Vec<usize>,

        /// What to change
        #[arg(short, long)]
        instruction: String,

        /// Manual run counter used for the stages it depends on
        #[arg(long, default_value_t = 0)]
        run_id: u64,

        /// Write the refined stage as Markdown here
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,

        /// Embed with the local hashing embedder instead of Ollama
        #[arg(long)]
        offline: bool,
    },

    /// List pipeline stages and their dependencies
    Stages,

    /// Display current configuration
    Config {
        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },
}

impl Args {
    /// Get verbosity level based on flags
    pub fn verbosity(&self) -> Verbosity {
        if self.quiet {
            Verbosity::Quiet
        } else {
            match self.verbose {
                0 => Verbosity::Normal,
                1 => Verbosity::Verbose,
                _ => Verbosity::VeryVerbose,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_quiet() {
        let args = Args::parse_from(["rfpanalyst", "-q", "stages"]);
        assert_eq!(args.verbosity(), Verbosity::Quiet);
    }

    #[test]
    fn test_verbosity_levels() {
        assert_eq!(Args::parse_from(["rfpanalyst", "stages"]).verbosity(), Verbosity::Normal);
        assert_eq!(Args::parse_from(["rfpanalyst", "-v", "stages"]).verbosity(), Verbosity::Verbose);
        assert_eq!(
            Args::parse_from(["rfpanalyst", "stages", "-vv"]).verbosity(),
            Verbosity::VeryVerbose
        );
    }

    #[test]
    fn test_run_arguments() {
        let args = Args::parse_from([
            "rfpanalyst", "run", "rfp.txt", "--stage", "ksf", "-s", "risk", "--run-id", "3", "--offline",
        ]);
        match args.command {
            Commands::Run {
                file,
                stages,
                run_id,
                out,
                offline,
            } => {
                assert_eq!(file, PathBuf::from("rfp.txt"));
                assert_eq!(stages, vec!["ksf", "risk"]);
                assert_eq!(run_id, 3);
                assert!(out.is_none());
                assert!(offline);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_refine_lock_list() {
        let args = Args::parse_from([
            "rfpanalyst",
            "refine",
            "rfp.txt",
            "--stage",
            "ksf",
            "--lock",
            "1,3",
            "--instruction",
            "더 구체적으로",
        ]);
        match args.command {
            Commands::Refine { stage, lock, .. } => {
                assert_eq!(stage, "ksf");
                assert_eq!(lock, vec![1, 3]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Args::try_parse_from(["rfpanalyst"]).is_err());
    }
}
