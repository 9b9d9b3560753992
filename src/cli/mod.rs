//! CLI module for aerograph
//!
//! Provides command-line interface for:
//! - run: defer a file of queries, run them batched, print outcomes
//! - check-config: validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Strategy};
pub use commands::{check_config, run, run_command, run_queries};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{read_graph, read_queries, write_error, write_line, write_response};
