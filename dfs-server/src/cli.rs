use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "dfs-server", version, about = "Distributed file cache server")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the file server with config file
    Start {
        #[arg(short, long)]
        config: PathBuf,
    },
}
