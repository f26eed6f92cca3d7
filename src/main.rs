mod app;
mod cli;
mod db;
mod logging;
mod paths;
mod settings;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    logging::setup_logger(cli.verbose);
    app::run(cli)
}
