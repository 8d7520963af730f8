//! Human readable run report

use engine::{ItemOutcome, ItemReport, SyncReport, SyncState};
use indicatif::HumanBytes;
use owo_colors::{OwoColorize, Style};

fn paint(text: &str, style: Style, color: bool) -> String {
    if color {
        text.style(style).to_string()
    } else {
        text.to_string()
    }
}

fn describe(item: &ItemReport) -> String {
    match &item.parent {
        Some(parent) => format!("{} (changes since {})", item.snapshot, parent),
        None => format!("{} (whole snapshot)", item.snapshot),
    }
}

/// One line per plan item, then a summary line
pub fn render(report: &SyncReport, color: bool) -> Vec<String> {
    let mut lines = Vec::with_capacity(report.items.len() + 1);

    for item in &report.items {
        let line = match &item.outcome {
            ItemOutcome::Uploaded { bytes } => format!(
                "{} {} {}",
                paint("uploaded    ", Style::new().green(), color),
                describe(item),
                paint(&HumanBytes(*bytes).to_string(), Style::new().dimmed(), color)
            ),
            ItemOutcome::WouldUpload { bytes } => format!(
                "{} {} {}",
                paint("would upload", Style::new().cyan(), color),
                describe(item),
                paint(&HumanBytes(*bytes).to_string(), Style::new().dimmed(), color)
            ),
            ItemOutcome::Failed { stage, error } => format!(
                "{} {}: {} failed: {}",
                paint("failed      ", Style::new().red().bold(), color),
                describe(item),
                stage,
                error
            ),
            ItemOutcome::Skipped => format!(
                "{} {}",
                paint("skipped     ", Style::new().yellow(), color),
                describe(item)
            ),
        };
        lines.push(line);
    }

    let summary = if report.items.is_empty() {
        "Nothing to upload, container is up to date".to_string()
    } else {
        let done = report.count(|o| matches!(o, ItemOutcome::Uploaded { .. } | ItemOutcome::WouldUpload { .. }));
        let failed = report.count(|o| matches!(o, ItemOutcome::Failed { .. }));
        let skipped = report.count(|o| matches!(o, ItemOutcome::Skipped));
        let verb = if report.dry_run { "would be uploaded" } else { "uploaded" };
        format!("{} {}, {} failed, {} skipped", done, verb, failed, skipped)
    };
    let summary_style = match report.state {
        SyncState::Done => Style::new().bold(),
        _ => Style::new().red().bold(),
    };
    lines.push(paint(&summary, summary_style, color));

    lines
}
