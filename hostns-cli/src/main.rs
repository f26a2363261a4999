//! enter-host-ns
//!
//! Runs a command in the host's namespaces from inside a container, in the
//! directory the caller was in.

use anyhow::Result;
use clap::Parser;
use hostns_core::Error;
use std::process;
use tracing::{debug, Level};

mod cli;

use cli::Cli;

fn main() {
    // Parse command-line arguments; every failure exits 1
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.exit_code() == 0 => e.exit(),
        Err(e) => {
            let _ = e.print();
            process::exit(1);
        }
    };

    // Logs go to stderr, stdout belongs to the executed command
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli) {
        match e.downcast_ref::<Error>() {
            Some(Error::Usage { .. }) => eprintln!("{e}"),
            _ => eprintln!("error: {e:#}"),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    debug!(args = ?cli.command, "Escaping to host namespaces");

    match hostns_namespace::escape_and_exec(env!("CARGO_BIN_NAME"), cli.command)? {}
}
