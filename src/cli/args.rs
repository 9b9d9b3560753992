//! CLI argument definitions using clap
//!
//! Commands:
//! - aerograph run --graph <path> --queries <path> [--config <path>] [--strategy scan|dispatch]
//! - aerograph check-config [--config <path>]

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// aerograph - batched lazy execution of graph queries
#[derive(Parser, Debug)]
#[command(name = "aerograph")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Defer every query in a file, run them in batches, print outcomes
    Run {
        /// Path to engine configuration file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Path to graph JSON file
        #[arg(long)]
        graph: PathBuf,

        /// Path to query file, one query per line
        #[arg(long)]
        queries: PathBuf,

        /// How batches are driven
        #[arg(long, value_enum, default_value_t = Strategy::Scan)]
        strategy: Strategy,
    },

    /// Load and validate a configuration file, print the effective values
    CheckConfig {
        /// Path to engine configuration file
        #[arg(long, default_value = "./aerograph.json")]
        config: PathBuf,
    },
}

/// Propagation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Long-lived workers scanning the registry
    Scan,
    /// Bounded advance tasks submitted to the worker pool
    Dispatch,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults_to_scan() {
        let cli = Cli::try_parse_from([
            "aerograph", "run", "--graph", "g.json", "--queries", "q.txt",
        ])
        .unwrap();
        match cli.command {
            Command::Run {
                config, strategy, ..
            } => {
                assert!(config.is_none());
                assert_eq!(strategy, Strategy::Scan);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_dispatch_strategy() {
        let cli = Cli::try_parse_from([
            "aerograph", "run", "--graph", "g.json", "--queries", "q.txt", "--strategy",
            "dispatch",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Run {
                strategy: Strategy::Dispatch,
                ..
            }
        ));
    }

    #[test]
    fn test_run_requires_inputs() {
        assert!(Cli::try_parse_from(["aerograph", "run", "--graph", "g.json"]).is_err());
    }
}
