//! Explicit configuration values threaded into every probe, extraction and
//! matching run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// User agent sent with every presence probe.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
                                      AppleWebKit/537.36 (KHTML, like Gecko) \
                                      Chrome/70.0.3538.77 Safari/537.36";

/// Selector heuristics for an "accept/agree" control, tried in order.
pub const DEFAULT_ACCEPT_SELECTORS: [&str; 6] = [
    "[id*='accept']",
    "[class*='accept']",
    "[id*='agree']",
    "[class*='agree']",
    "[aria-label*='Accept']",
    "[aria-label*='Agree']",
];

/// Presence probe settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    /// Hard limit for one domain, enforced by the pool.
    pub task_timeout_ms: u64,
    /// When false, a 2xx page is reported as OK without fingerprinting.
    pub check_cmp: bool,
    pub workers: usize,
    pub batches: usize,
    pub user_agent: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 20_000,
            read_timeout_ms: 30_000,
            task_timeout_ms: 120_000,
            check_cmp: true,
            workers: 4,
            batches: 1,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ProbeConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_millis(self.task_timeout_ms)
    }
}

/// Consent extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    pub page_load_timeout_ms: u64,
    /// Upper bound for `document.readyState == "complete"`.
    pub ready_timeout_ms: u64,
    /// Pause after clicking an accept control, before re-reading cookies.
    pub settle_delay_ms: u64,
    /// Pause between successive domain launches.
    pub inter_crawl_delay_ms: u64,
    /// Number of browser sessions run in parallel.
    pub sessions: usize,
    pub headless: bool,
    pub accept_selectors: Vec<String>,
    pub chromium_path: Option<PathBuf>,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            page_load_timeout_ms: 30_000,
            ready_timeout_ms: 15_000,
            settle_delay_ms: 2_000,
            inter_crawl_delay_ms: 1_000,
            sessions: 1,
            headless: false,
            accept_selectors: DEFAULT_ACCEPT_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            chromium_path: None,
        }
    }
}

impl ExtractorConfig {
    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_millis(self.page_load_timeout_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn inter_crawl_delay(&self) -> Duration {
        Duration::from_millis(self.inter_crawl_delay_ms)
    }
}

/// Matcher settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// Export cookies with no joined declaration (label -1) instead of dropping them.
    pub include_unmatched: bool,
}
