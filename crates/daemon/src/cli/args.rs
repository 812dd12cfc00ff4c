pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "orbit")]
#[command(about = "Publish local folders to a peer-to-peer network under mutable names")]
pub struct Args {
    /// Path to the orbit config directory (defaults to ~/.orbit)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    #[command(subcommand)]
    pub command: crate::Command,
}
