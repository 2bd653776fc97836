//! Domain-list intake from repeated `-u` values and domain files.

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Collect domains from `urls` then `files`, in first-seen order with
/// duplicates removed. Blank lines and `#` comments are skipped.
pub fn collect_domains(urls: &[String], files: &[PathBuf]) -> Result<Vec<String>> {
    let mut raw: Vec<String> = urls.to_vec();
    for file in files {
        raw.extend(read_domain_file(file)?);
    }
    Ok(dedupe(raw))
}

fn read_domain_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read domain file {}", path.display()))?;
    Ok(parse_domain_lines(&text))
}

pub fn parse_domain_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn dedupe(domains: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    domains
        .into_iter()
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty() && seen.insert(d.clone()))
        .collect()
}
