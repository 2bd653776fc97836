//! Result files written after a presence run.

use anyhow::{Context, Result};
use consent_crawler::probe::pool::PresenceSummary;
use consent_crawler::ProbeOutcome;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

const SUMMARY_FILE: &str = "crawl_summary.txt";
const UNCRAWLED_FILE: &str = "uncrawled_domains.txt";

/// File holding the URLs of one outcome bucket.
pub fn bucket_file(outcome: ProbeOutcome) -> &'static str {
    match outcome {
        ProbeOutcome::Cookiebot => "cookiebot_responses.txt",
        ProbeOutcome::OneTrust => "onetrust_responses.txt",
        ProbeOutcome::Termly => "termly_responses.txt",
        ProbeOutcome::NoCmp => "nocmp_responses.txt",
        ProbeOutcome::Ok => "ok_responses.txt",
        ProbeOutcome::ConnectFail => "failed_urls.txt",
        ProbeOutcome::HttpError => "http_responses.txt",
        ProbeOutcome::Bot => "bot_responses.txt",
        ProbeOutcome::Timeout => "crawler_timeouts.txt",
    }
}

/// A fresh timestamped directory under `base`.
pub fn timestamped_dir(base: &Path) -> PathBuf {
    base.join(chrono::Local::now().format("%Y%m%d_%H%M%S").to_string())
}

/// Write one file per bucket plus the summary. Returns the summary path.
pub fn save_presence_results(dir: &Path, summary: &PresenceSummary) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("failed to create output directory {}", dir.display()))?;

    for outcome in ProbeOutcome::ALL {
        // OK only occurs with the CMP check off
        if outcome == ProbeOutcome::Ok && summary.count(outcome) == 0 {
            continue;
        }
        let urls = summary.buckets.get(&outcome).map(Vec::as_slice).unwrap_or(&[]);
        let path = dir.join(bucket_file(outcome));
        write_lines(&path, urls)?;
        info!("saved {} {} results to {}", urls.len(), outcome.bucket(), path.display());
    }

    if summary.interrupted() {
        write_lines(&dir.join(UNCRAWLED_FILE), &summary.unprocessed)?;
    }

    let path = dir.join(SUMMARY_FILE);
    std::fs::write(&path, render_summary(summary))
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("crawl summary saved to {}", path.display());
    Ok(path)
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut body = String::new();
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    std::fs::write(path, body).with_context(|| format!("failed to write {}", path.display()))
}

pub fn render_summary(summary: &PresenceSummary) -> String {
    let mut out = String::from("CMP Presence Crawl Summary\n");
    out.push_str(&"=".repeat(30));
    out.push_str("\n\n");
    for outcome in ProbeOutcome::ALL {
        if outcome == ProbeOutcome::Ok && summary.count(outcome) == 0 {
            continue;
        }
        let _ = writeln!(out, "{}: {}", capitalize(outcome.bucket()), summary.count(outcome));
    }
    if summary.interrupted() {
        let _ = writeln!(out, "Uncrawled: {}", summary.unprocessed.len());
    }
    let _ = writeln!(out, "\nTotal: {}", summary.completed());
    let _ = writeln!(out, "Elapsed: {:.2}s", summary.elapsed.as_secs_f64());
    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
