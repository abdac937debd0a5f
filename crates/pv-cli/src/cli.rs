use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "pv",
    about = "PeerVault: versioned records over replicated peers",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Raise log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Configuration file
    #[arg(short, long, global = true, default_value = "peervault.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a record to an in-process network and read it back
    Put(PutArgs),
    /// Extend a record's history and show what each replica retains
    History(HistoryArgs),
    /// Race two writers on the same parent version
    Race(RaceArgs),
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
pub struct KeyArgs {
    #[arg(long, default_value = "alice")]
    pub location: String,
    #[arg(long, default_value = "default")]
    pub domain: String,
    #[arg(long, default_value = "record")]
    pub content: String,
}

#[derive(Args)]
pub struct PutArgs {
    #[command(flatten)]
    pub key: KeyArgs,
    pub payload: String,
    /// Time to live in seconds (0 never expires)
    #[arg(long, default_value = "0")]
    pub ttl: u64,
    /// Write without a version key
    #[arg(long)]
    pub unversioned: bool,
    /// Also print the payload's content hash
    #[arg(long)]
    pub hash: bool,
}

#[derive(Args)]
pub struct HistoryArgs {
    #[command(flatten)]
    pub key: KeyArgs,
    /// Revisions to write
    #[arg(short = 'n', long, default_value = "8")]
    pub revisions: u32,
    /// Remove the whole record afterwards
    #[arg(long)]
    pub remove: bool,
}

#[derive(Args)]
pub struct RaceArgs {
    #[command(flatten)]
    pub key: KeyArgs,
}
