use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "anidbcli", version, about = "AniDB hashing and metadata client")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Computes ed2k hashes and prints `ed2k://` links.
    Ed2k(Ed2kArgs),
    /// Identifies, mylist-adds, and optionally renames files against AniDB.
    Api(ApiArgs),
}

#[derive(clap::Args)]
pub struct Ed2kArgs {
    /// Copies the generated links to the system clipboard instead of (or
    /// in addition to) printing them.
    #[arg(long)]
    pub clipboard: bool,

    pub files: Vec<PathBuf>,
}

#[derive(clap::Args)]
pub struct ApiArgs {
    #[arg(long)]
    pub username: String,
    #[arg(long)]
    pub password: String,
    #[arg(long)]
    pub apikey: Option<String>,

    /// Adds identified files to the caller's mylist.
    #[arg(long)]
    pub add: bool,
    #[arg(long)]
    pub unwatched: bool,
    #[arg(long)]
    pub state: Option<u8>,

    /// Renames identified files using `%field%` tokens.
    #[arg(long)]
    pub rename: Option<String>,
    #[arg(long)]
    pub link: bool,
    #[arg(long)]
    pub softlink: bool,
    #[arg(long = "keep-structure")]
    pub keep_structure: bool,
    #[arg(long = "date-format")]
    pub date_format: Option<String>,
    #[arg(long = "delete-empty")]
    pub delete_empty: bool,
    /// Stops the whole run on the first failed record instead of
    /// continuing with the rest.
    #[arg(long)]
    pub abort: bool,

    /// Reuses a recent session instead of logging in fresh every run.
    #[arg(long)]
    pub persistent: bool,
    #[arg(long = "show-ed2k")]
    pub show_ed2k: bool,
    /// Dry-runs the pipeline: hashes and plans renames but never talks to
    /// the server.
    #[arg(long = "suppress-network-activity")]
    pub suppress_network_activity: bool,

    pub files: Vec<PathBuf>,
}
