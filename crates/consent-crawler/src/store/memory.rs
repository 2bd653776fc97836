//! In-memory [`CrawlStore`] for tests and dry runs.

use super::{CrawlStore, MatchInput};
use crate::error::{CrawlError, Result};
use crate::types::{
    ConsentDeclaration, Cookie, CrawlRecord, NewCrawlRecord, StoredCookie, StoredDeclaration,
};
use std::sync::RwLock;

#[derive(Default)]
struct Tables {
    crawls: Vec<CrawlRecord>,
    cookies: Vec<StoredCookie>,
    declarations: Vec<StoredDeclaration>,
}

impl Tables {
    fn has_crawl(&self, id: i64) -> bool {
        self.crawls.iter().any(|c| c.id == id)
    }
}

/// Ids start at 1 and grow monotonically, like SQLite rowids.
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    /// Crawl records written so far.
    pub fn crawls(&self) -> Vec<CrawlRecord> {
        self.read().crawls.clone()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_crawl(crawl_id: i64) -> CrawlError {
    CrawlError::InvalidInput(format!("crawl record {crawl_id} does not exist"))
}

impl CrawlStore for MemoryStore {
    fn create_crawl_record(&self, record: &NewCrawlRecord) -> Result<i64> {
        let mut tables = self.write();
        let id = tables.crawls.len() as i64 + 1;
        tables.crawls.push(CrawlRecord {
            id,
            domain: record.domain.clone(),
            timestamp: record.timestamp,
            success: record.success,
            cmp_type: record.cmp_type.clone(),
            cookies_collected: record.cookies_collected,
            error_message: record.error_message.clone(),
        });
        Ok(id)
    }

    fn append_cookies(&self, crawl_id: i64, cookies: &[Cookie]) -> Result<usize> {
        let mut tables = self.write();
        if !tables.has_crawl(crawl_id) {
            return Err(missing_crawl(crawl_id));
        }
        for cookie in cookies {
            let id = tables.cookies.len() as i64 + 1;
            tables.cookies.push(StoredCookie {
                id,
                crawl_id,
                cookie: cookie.clone(),
            });
        }
        Ok(cookies.len())
    }

    fn append_consent_declarations(
        &self,
        crawl_id: i64,
        declarations: &[ConsentDeclaration],
    ) -> Result<usize> {
        let mut tables = self.write();
        if !tables.has_crawl(crawl_id) {
            return Err(missing_crawl(crawl_id));
        }
        for declaration in declarations {
            let id = tables.declarations.len() as i64 + 1;
            tables.declarations.push(StoredDeclaration {
                id,
                crawl_id,
                declaration: declaration.clone(),
            });
        }
        Ok(declarations.len())
    }

    fn read_for_matching(&self) -> Result<MatchInput> {
        let tables = self.read();
        Ok(MatchInput {
            crawls: tables.crawls.clone(),
            cookies: tables.cookies.clone(),
            declarations: tables.declarations.clone(),
        })
    }
}
