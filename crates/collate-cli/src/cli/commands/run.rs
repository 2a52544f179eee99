//! `collate run` - Assemble, persist and publish one archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};
use collate_core::{
    CollateConfig, FetchFailurePolicy, ManifestSource, ObjectStoreBackend, Pipeline, RunOutcome,
};

use crate::exit_codes;

#[derive(Debug, Args, Clone)]
#[command(group(
    ArgGroup::new("manifest")
        .args(["dir", "keys_file", "store_prefix", "key"])
        .multiple(false)
))]
pub struct RunArgs {
    /// YAML config file; flags override its values
    #[arg(long, env = "COLLATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Source store URL (e.g., s3://bucket/prefix, file:///path)
    #[arg(long, env = "COLLATE_SOURCE_URL")]
    pub source: Option<String>,

    /// Destination store URL for the finished archive
    #[arg(long, env = "COLLATE_DEST_URL")]
    pub dest: Option<String>,

    /// Archive the files named in a local directory
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Archive the keys listed in a file, one per line
    #[arg(long, value_name = "FILE")]
    pub keys_file: Option<PathBuf>,

    /// Archive every source key under a prefix
    #[arg(long, value_name = "PREFIX")]
    pub store_prefix: Option<String>,

    /// Archive an explicit key (repeatable)
    #[arg(long, value_name = "KEY")]
    pub key: Vec<String>,

    /// Link lifetime (e.g., 5m, 1h)
    #[arg(long, env = "COLLATE_LINK_TTL", value_parser = humantime::parse_duration)]
    pub ttl: Option<Duration>,

    /// Local directory the archive is assembled in
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Number of objects fetched at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Give up on a single object after this long (e.g., 30s)
    #[arg(long, value_parser = humantime::parse_duration)]
    pub fetch_timeout: Option<Duration>,

    /// Leave failed objects out instead of keeping empty entries
    #[arg(long)]
    pub omit_failed: bool,

    /// Write a JSON run report to this file
    #[arg(long, value_name = "FILE")]
    pub report: Option<PathBuf>,

    /// Exit with code 4 if any object failed
    #[arg(long)]
    pub fail_on_partial: bool,
}

impl RunArgs {
    fn manifest(&self) -> Option<ManifestSource> {
        if let Some(dir) = &self.dir {
            Some(ManifestSource::Directory(dir.clone()))
        } else if let Some(path) = &self.keys_file {
            Some(ManifestSource::File(path.clone()))
        } else if let Some(prefix) = &self.store_prefix {
            Some(ManifestSource::StorePrefix(prefix.clone()))
        } else if !self.key.is_empty() {
            Some(ManifestSource::Keys(self.key.clone()))
        } else {
            None
        }
    }

    /// Layer flags over a loaded config.
    fn apply(&self, config: &mut CollateConfig) {
        if let Some(source) = &self.source {
            config.source = Some(source.clone());
        }
        if let Some(dest) = &self.dest {
            config.destination = Some(dest.clone());
        }
        if let Some(manifest) = self.manifest() {
            config.manifest = Some(manifest);
        }
        if let Some(ttl) = self.ttl {
            config.link_ttl = ttl;
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(n) = self.concurrency {
            config.fetch.concurrency = n;
        }
        if let Some(timeout) = self.fetch_timeout {
            config.fetch.timeout = Some(timeout);
        }
        if self.omit_failed {
            config.on_fetch_failure = FetchFailurePolicy::Omit;
        }
    }
}

pub async fn cmd_run(args: RunArgs) -> Result<i32> {
    // 1. Load and validate configuration
    let mut config = match &args.config {
        Some(path) => match CollateConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("❌ {}", e);
                return Ok(exit_codes::CONFIG_ERROR);
            }
        },
        None => CollateConfig::default(),
    };
    args.apply(&mut config);
    tracing::debug!(config = ?config, "effective configuration");

    let resolved = match config.validate() {
        Ok(resolved) => resolved,
        Err(e) => {
            eprintln!("❌ {}", e);
            return Ok(exit_codes::CONFIG_ERROR);
        }
    };

    // 2. Connect to stores
    let source = ObjectStoreBackend::from_spec(&resolved.source)
        .await
        .with_context(|| format!("failed to connect to {}", resolved.source.display_name()))?;
    let destination = Arc::new(
        ObjectStoreBackend::from_spec(&resolved.destination)
            .await
            .with_context(|| {
                format!("failed to connect to {}", resolved.destination.display_name())
            })?,
    );

    eprintln!(
        "Collecting {} from {} into {}",
        resolved.manifest,
        resolved.source.display_name(),
        resolved.destination.display_name()
    );

    // 3. Run
    let pipeline = Pipeline::new(
        resolved.settings,
        Arc::new(source),
        destination.clone(),
        destination,
    );
    let outcome = match pipeline.run(&resolved.manifest).await {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("❌ {} failed: {}", e.stage(), e);
            return Ok(e.exit_code());
        }
    };

    // 4. Report
    print_summary(&outcome);
    println!("{}", outcome.link.url);

    if let Some(path) = &args.report {
        // The link is already published at this point
        if let Err(e) = write_report(path, &outcome) {
            eprintln!("❌ {:#}", e);
            return Ok(exit_codes::REPORT_FAILED);
        }
        eprintln!("   Report: {}", path.display());
    }

    if args.fail_on_partial && outcome.report.is_partial() {
        return Ok(exit_codes::PARTIAL);
    }
    Ok(exit_codes::SUCCESS)
}

fn write_report(path: &Path, outcome: &RunOutcome) -> Result<()> {
    let json = serde_json::to_vec_pretty(outcome)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write report: {}", path.display()))
}

fn print_summary(outcome: &RunOutcome) {
    let report = &outcome.report;
    let counts = report.counts();

    for failure in report.failures() {
        eprintln!(
            "⚠️  {}: {}",
            failure.key,
            failure.outcome.reason().unwrap_or("failed")
        );
    }
    eprintln!(
        "✅ Published {} ({} bytes): {} written, {} failed",
        report.archive,
        report.archive_size,
        counts.written,
        counts.failed()
    );
    eprintln!(
        "   Link expires {} ({})",
        outcome.link.expires_at.to_rfc3339(),
        humantime::format_duration(outcome.link.ttl)
    );
    if let Some(path) = &outcome.local_path {
        eprintln!("   Local copy: {}", path.display());
    }
}
