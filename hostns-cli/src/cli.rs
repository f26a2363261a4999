//! CLI argument definitions

use std::ffi::OsString;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "enter-host-ns")]
#[command(
    about = "Run a command in the host namespaces, keeping the current directory",
    long_about = None
)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Command to run, followed by its arguments
    #[arg(value_name = "COMMAND", trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<OsString>,
}
