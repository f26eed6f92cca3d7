use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "watchtrack",
    version,
    about = "Track watch progress of video pages and browse saved progress"
)]
pub struct Cli {
    /// Config file (defaults to <config dir>/watchtrack/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Progress database (defaults to $WATCHTRACK_DB or <data dir>/watchtrack/watchtrack.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Raise log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Drive a recorded page scenario through the tracker in virtual time
    Replay { scenario: PathBuf },
    /// Print saved progress records
    List {
        #[arg(long)]
        site: Option<String>,
    },
    /// Remove a saved progress record by key
    Forget { key: String },
    /// List the active site profiles
    Sites,
    Tui,
}
