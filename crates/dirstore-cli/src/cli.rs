use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "dirstore",
    about = "Inspect and maintain a dirstore DN2ID database",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Storage configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Database directory; overrides the configuration file
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// Base DN the index is scoped to; its values must not contain `/`
    #[arg(short, long, global = true, default_value = "dc=example,dc=com")]
    pub base_dn: String,

    /// Index name within the base DN
    #[arg(long, global = true, default_value = "dn2id")]
    pub index: String,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Bulk-load DN mappings from a file of `[id] dn` lines
    Import(ImportArgs),
    /// Look up the entry ID of a DN
    Get(DnArgs),
    /// Map a DN to an entry ID
    Put(PutArgs),
    /// Remove the mapping of a DN
    Remove(DnArgs),
    /// List the immediate children of a DN
    Children(DnArgs),
    /// List every descendant of a DN
    Subtree(DnArgs),
    /// List the trees in the database
    Trees,
    /// Show storage mode and sizes
    Status,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Input file, `-` for stdin
    pub input: PathBuf,
}

#[derive(Args)]
pub struct DnArgs {
    pub dn: String,
}

#[derive(Args)]
pub struct PutArgs {
    pub dn: String,
    /// Entry ID; defaults to one above the highest ID in the index
    #[arg(long)]
    pub id: Option<u64>,
}
