//! Clap CLI definitions for Parley.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  parley serve                          Host the demo calculator
  parley call add 2 3                   Call it on the default address
  parley call divide 1 0 --json         Print the outcome as JSON
  parley call multiply 6 7 --watch      Also subscribe a result listener
  parley info                           Show registered methods and fingerprint";

/// Parley: remote method invocation between peers.
#[derive(Parser)]
#[command(name = "parley", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Host the demo calculator until interrupted.
    Serve {
        /// Listen address (overrides `node.listen_addr`).
        #[arg(long)]
        listen: Option<String>,
    },
    /// Call the calculator on a serving node.
    Call {
        /// Operation to invoke.
        #[arg(value_enum)]
        op: Operation,
        #[arg(allow_hyphen_values = true)]
        a: i64,
        #[arg(allow_hyphen_values = true)]
        b: i64,
        /// Address of the serving node (defaults to `node.listen_addr`).
        #[arg(long)]
        connect: Option<String>,
        /// Subscribe a listener closure before calling.
        #[arg(long)]
        watch: bool,
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the registered capabilities, method ids and fingerprint.
    Info,
    /// Generate shell completion scripts.
    Completion {
        /// Shell to generate completions for.
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Operation {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl Operation {
    /// The remote method name.
    pub fn method(self) -> &'static str {
        match self {
            Operation::Add => "add",
            Operation::Subtract => "subtract",
            Operation::Multiply => "multiply",
            Operation::Divide => "divide",
        }
    }
}
