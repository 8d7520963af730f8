//! Config file and effective settings
//!
//! Config file location: `<config dir>/snapvault/config.toml`. Flags given on
//! the command line win over file values; OpenStack credentials come from the
//! `OS_*` environment variables only.

use crate::args::Cli;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use engine::RateLimit;
use std::path::{Path, PathBuf};
use store::config::{MAX_SINGLE_OBJECT_BYTES, MIN_SEGMENT_BYTES};
use store::SwiftConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub sync: SyncSection,
    pub swift: SwiftSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub container_name: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub age_recipient: Option<String>,
    /// Staging speed cap, e.g. "10M"
    pub rate_limit: Option<RateLimit>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwiftSection {
    /// Artifacts above this size are uploaded in segments
    pub segment_size_bytes: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub region: Option<String>,
}

impl FileConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(container) = &self.sync.container_name {
            if container.trim().is_empty() {
                bail!("sync.container_name must not be empty");
            }
        }
        if let Some(recipient) = &self.sync.age_recipient {
            if recipient.trim().is_empty() {
                bail!("sync.age_recipient must not be empty");
            }
        }
        if let Some(size) = self.swift.segment_size_bytes {
            if !(MIN_SEGMENT_BYTES..=MAX_SINGLE_OBJECT_BYTES).contains(&size) {
                bail!(
                    "swift.segment_size_bytes must be between {} and {}",
                    MIN_SEGMENT_BYTES,
                    MAX_SINGLE_OBJECT_BYTES
                );
            }
        }
        if let Some(timeout) = self.swift.timeout_secs {
            if !(1..=86_400).contains(&timeout) {
                bail!("swift.timeout_secs must be between 1 and 86400");
            }
        }
        Ok(())
    }

    /// Overlay the `[swift]` section onto credentials read elsewhere
    pub fn apply_swift(&self, mut config: SwiftConfig) -> SwiftConfig {
        if let Some(size) = self.swift.segment_size_bytes {
            config = config.with_segment_size(size);
        }
        if let Some(timeout) = self.swift.timeout_secs {
            config = config.with_timeout_secs(timeout);
        }
        if let Some(region) = &self.swift.region {
            config = config.with_region(region.clone());
        }
        config
    }
}

/// Get the default config file path
pub fn config_file_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("snapvault").join("config.toml"))
}

/// Load the config file
///
/// An explicitly given file must exist; the default location is optional.
pub fn load(explicit: Option<&Path>) -> Result<FileConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match config_file_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(FileConfig::default()),
        },
    };

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

/// Settings of one run after merging flags over the config file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub path: PathBuf,
    pub container_name: String,
    pub work_dir: PathBuf,
    pub age_recipient: Option<String>,
    pub rate_limit: Option<RateLimit>,
    pub dry_run: bool,
}

impl Settings {
    pub fn resolve(cli: &Cli, file: &FileConfig) -> Result<Self> {
        let container_name = cli
            .container_name
            .clone()
            .or_else(|| file.sync.container_name.clone())
            .filter(|name| !name.trim().is_empty())
            .context("--container-name is required (or set sync.container_name in the config file)")?;

        Ok(Self {
            path: cli.path.clone(),
            container_name,
            work_dir: cli
                .work_dir
                .clone()
                .or_else(|| file.sync.work_dir.clone())
                .unwrap_or_else(std::env::temp_dir),
            age_recipient: cli
                .age_recipient
                .clone()
                .or_else(|| file.sync.age_recipient.clone()),
            rate_limit: cli.rate_limit.or(file.sync.rate_limit),
            dry_run: cli.dry_run,
        })
    }
}
