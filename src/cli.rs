use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "mindfeed",
    version,
    about = "Personalized Bluesky feed ranked against your likes"
)]
pub struct Args {
    /// TOML config file; built-in defaults apply when it does not exist
    #[arg(long, short, env = "MINDFEED_CONFIG", default_value = "mindfeed.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run one sync now
    Sync,
    /// Run syncs at the configured times until interrupted
    Daemon,
    /// Print the ranked feed
    Feed {
        #[arg(long, short)]
        limit: Option<usize>,
    },
    /// Show the last run and store sizes
    Status,
    /// Download the embedding model files
    FetchModel,
    /// Clear the candidate snapshot
    Reset {
        /// Also forget every stored like
        #[arg(long, default_value_t = false)]
        likes: bool,
    },
}
