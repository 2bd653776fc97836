//! Append-only persistence for crawl records, cookies and declarations.
//!
//! [`CrawlStore`] is the only seam the probe, the extractor and the matcher
//! see. Rows are written once, scoped to their owning crawl id, and never
//! updated. [`SqliteStore`] is the production engine; [`MemoryStore`] backs
//! tests.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{backup, backup_path, SqliteStore};

use crate::error::Result;
use crate::types::{
    ConsentDeclaration, Cookie, CrawlRecord, NewCrawlRecord, StoredCookie, StoredDeclaration,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything the matcher reads, in id order.
#[derive(Debug, Clone, Default)]
pub struct MatchInput {
    pub crawls: Vec<CrawlRecord>,
    pub cookies: Vec<StoredCookie>,
    pub declarations: Vec<StoredDeclaration>,
}

/// Repository over the three record kinds.
pub trait CrawlStore: Send + Sync {
    /// Insert one crawl record and return its id.
    fn create_crawl_record(&self, record: &NewCrawlRecord) -> Result<i64>;

    /// Append cookies owned by `crawl_id`. Returns rows written.
    fn append_cookies(&self, crawl_id: i64, cookies: &[Cookie]) -> Result<usize>;

    /// Append declarations owned by `crawl_id`. Returns rows written.
    fn append_consent_declarations(
        &self,
        crawl_id: i64,
        declarations: &[ConsentDeclaration],
    ) -> Result<usize>;

    fn read_for_matching(&self) -> Result<MatchInput>;

    /// Write a crawl record together with its children.
    fn record_crawl(
        &self,
        record: &NewCrawlRecord,
        cookies: &[Cookie],
        declarations: &[ConsentDeclaration],
    ) -> Result<i64> {
        let id = self.create_crawl_record(record)?;
        if !cookies.is_empty() {
            self.append_cookies(id, cookies)?;
        }
        if !declarations.is_empty() {
            self.append_consent_declarations(id, declarations)?;
        }
        Ok(id)
    }
}

/// Rows removed by [`SqliteStore::clean`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupStats {
    pub empty_cookie_names_removed: usize,
    pub empty_consent_names_removed: usize,
    pub orphaned_cookies_removed: usize,
    pub orphaned_consent_data_removed: usize,
}

/// Aggregate database statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub total_crawls: u64,
    pub successful_crawls: u64,
    pub failed_crawls: u64,
    pub success_rate: f64,
    /// `cmp_type` → successful crawls.
    pub cmp_distribution: BTreeMap<String, u64>,
    pub total_cookies: u64,
    /// Distinct (name, domain) pairs.
    pub unique_cookies: u64,
    pub average_cookies_per_crawl: f64,
    pub consent_data_entries: u64,
    pub domains_with_consent_data: u64,
    pub purpose_categories: BTreeMap<String, u64>,
    /// Ten most frequent failure messages.
    pub common_errors: BTreeMap<String, u64>,
    pub secure_cookies: u64,
    pub http_only_cookies: u64,
    pub same_site_distribution: BTreeMap<String, u64>,
}
