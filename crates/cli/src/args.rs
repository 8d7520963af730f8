//! Command line arguments

use crate::logging::DEFAULT_SYSLOG_SOCKET;
use clap::Parser;
use engine::RateLimit;
use std::path::PathBuf;

/// Snapvault - Archive read-only btrfs snapshots to a Swift container
#[derive(Parser, Debug, Clone)]
#[command(name = "snapvault")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subvolume whose read-only snapshots are archived
    pub path: PathBuf,

    /// Swift container receiving the snapshots (falls back to the config file)
    #[arg(long)]
    pub container_name: Option<String>,

    /// Directory where artifacts are staged before upload (default: system temp dir)
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Prepare everything but upload nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Encrypt artifacts with age for this recipient
    #[arg(long)]
    pub age_recipient: Option<String>,

    /// Cap the staging speed, in bytes per second (suffixes K, M, G, T)
    #[arg(long, value_name = "RATE")]
    pub rate_limit: Option<RateLimit>,

    /// Log to syslog through a Unix socket instead of stderr
    #[arg(
        long,
        value_name = "SOCKET",
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = DEFAULT_SYSLOG_SOCKET
    )]
    pub syslog: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Config file (default: <config dir>/snapvault/config.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,
}
