//! Command-line interface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (TOML, YAML or JSON, by extension).
    #[arg(short, long, env = "APTBLOB_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Bring the index up to date with the packages in the container.
    Reconcile,
    /// Handle a storage notification, running when it names a package.
    Event {
        /// Read the payload from this file instead of stdin.
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Print the cache record for a local package file.
    Extract {
        path: PathBuf,
        /// Value of the `Filename` field; defaults to the file name.
        #[arg(long)]
        filename: Option<String>,
    },
}
