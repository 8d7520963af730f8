//! Wiring of one `snapvault` invocation

use crate::args::Cli;
use crate::config::{self, Settings};
use crate::logging::{self, LogOptions};
use crate::report;
use anyhow::{Context, Result};
use btrfs::{AgeCli, BtrfsCli};
use engine::{SyncOptions, SyncOrchestrator};
use std::io::IsTerminal;
use std::sync::Arc;
use store::{SwiftConfig, SwiftStore};
use tracing::{error, info, warn};

/// Exit code for setup and precondition failures
pub const EXIT_ERROR: u8 = 2;
/// Exit code after Ctrl-C
pub const EXIT_INTERRUPTED: u8 = 130;

/// Run the command and map the outcome to a process exit code
pub async fn execute(cli: Cli) -> u8 {
    let guard = logging::init(&LogOptions {
        verbose: cli.verbose,
        syslog: cli.syslog.clone(),
    });
    let interactive = !guard.is_syslog() && std::io::stderr().is_terminal();

    match run(cli, interactive, guard.is_syslog()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_ERROR
        }
    }
}

async fn run(cli: Cli, interactive: bool, syslog: bool) -> Result<u8> {
    let file = config::load(cli.config.as_deref())?;
    let settings = Settings::resolve(&cli, &file)?;

    // Every external precondition is checked before anything is sent
    let btrfs = Arc::new(BtrfsCli::new().context("Cannot archive btrfs snapshots")?);
    let age = match &settings.age_recipient {
        Some(recipient) => Some((
            Arc::new(AgeCli::new().context("Cannot encrypt artifacts")?),
            recipient.clone(),
        )),
        None => None,
    };
    let swift = file.apply_swift(SwiftConfig::from_env().context("Failed to read OpenStack credentials")?);
    let store = Arc::new(SwiftStore::new(swift).context("Failed to set up the Swift client")?);

    let options = SyncOptions {
        container: settings.container_name.clone(),
        work_dir: settings.work_dir.clone(),
        dry_run: settings.dry_run,
        show_progress: interactive,
        rate_limit: settings.rate_limit,
    };
    let mut orchestrator = SyncOrchestrator::new(btrfs.clone(), btrfs, store, options);
    if let Some((encryptor, recipient)) = age {
        orchestrator = orchestrator.with_encryption(encryptor, recipient);
    }

    info!(
        "Archiving snapshots of {} into container {}{}",
        settings.path.display(),
        settings.container_name,
        if settings.dry_run { " (dry run)" } else { "" }
    );
    if let Some(limit) = settings.rate_limit {
        info!("Staging limited to {}B/s", limit);
    }

    let report = tokio::select! {
        report = orchestrator.run(&settings.path) => report
            .with_context(|| format!("Failed to archive snapshots of {}", settings.path.display()))?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning the transfer in progress");
            return Ok(EXIT_INTERRUPTED);
        }
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if syslog {
        for line in report::render(&report, false) {
            info!("{}", line);
        }
    } else {
        for line in report::render(&report, interactive) {
            println!("{}", line);
        }
    }

    Ok(report.exit_code() as u8)
}
