//! `collate show` - List the entries of a local archive.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use collate_core::archive::list_entries;

use crate::exit_codes;

#[derive(Debug, Args, Clone)]
pub struct ShowArgs {
    /// Path to the archive (.tar.gz)
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: ShowFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ShowFormat {
    /// Human-readable table
    Table,
    /// JSON object with entry metadata
    Json,
}

pub fn cmd_show(args: ShowArgs) -> Result<i32> {
    let file = File::open(&args.archive)
        .with_context(|| format!("failed to open archive: {}", args.archive.display()))?;
    let entries = list_entries(file)
        .with_context(|| format!("failed to read archive: {}", args.archive.display()))?;

    match args.format {
        ShowFormat::Json => {
            let json = serde_json::json!({
                "archive": args.archive.display().to_string(),
                "entries": entries,
                "count": entries.len(),
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        ShowFormat::Table => {
            eprintln!("Archive: {}", args.archive.display());
            eprintln!("Entries: {}", entries.len());
            eprintln!();
            println!("{:<48} {:>12}  {:<20}", "NAME", "SIZE", "MODIFIED");
            println!("{:-<84}", "");
            for entry in &entries {
                println!(
                    "{:<48} {:>12}  {:<20}",
                    entry.name,
                    entry.size,
                    entry.modified.format("%Y-%m-%d %H:%M:%S")
                );
            }
            let empty = entries.iter().filter(|e| e.size == 0).count();
            if empty > 0 {
                eprintln!();
                eprintln!("⚠️  {} empty entr{}", empty, if empty == 1 { "y" } else { "ies" });
            }
        }
    }

    Ok(exit_codes::SUCCESS)
}
