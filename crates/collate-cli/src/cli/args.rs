use clap::{Parser, Subcommand};

use super::commands::run::RunArgs;
use super::commands::show::ShowArgs;

#[derive(Parser)]
#[command(
    name = "collate",
    version,
    about = "Collect bucket objects into one archive and publish a time-limited link"
)]
pub struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Assemble an archive from a manifest, upload it and print its link
    Run(RunArgs),
    /// List the entries of a local archive
    Show(ShowArgs),
}
