//! Parley CLI: serve the demo calculator or call it on another node.

mod cli;
mod cmd;
mod demo;
mod ui;

use crate::cli::*;
use clap::Parser;

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing_stderr();

    let outcome = match cli.command {
        Commands::Serve { listen } => cmd::run(cmd::serve(cli.config, listen)),
        Commands::Call {
            op,
            a,
            b,
            connect,
            watch,
            json,
        } => cmd::run(cmd::call(
            cli.config,
            cmd::CallArgs {
                op,
                a,
                b,
                connect,
                watch,
                json,
            },
        )),
        Commands::Info => cmd::info(cli.config),
        Commands::Completion { shell } => {
            cmd::completion(shell);
            Ok(())
        }
    };

    if let Err(e) = outcome {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
