#![warn(missing_docs)]

//! gfapi-rs command line tools

use anyhow::Result;
use clap::Parser;
use gfapi_client::cli::Cli;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

fn main() -> Result<()> {
    let cli = Cli::parse();
    // selftest routes --log-file/--log-level through its connection
    if !cli.configures_logging() {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(EnvFilter::from_default_env())
            .init();
    }

    tracing::debug!("gfapi starting");

    cli.run()
}
