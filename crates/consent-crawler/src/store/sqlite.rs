//! SQLite-backed crawl store.

use super::{CleanupStats, CrawlStore, DatabaseStats, MatchInput};
use crate::error::Result;
use crate::types::{
    ConsentDeclaration, Cookie, CrawlRecord, NewCrawlRecord, StoredCookie, StoredDeclaration,
};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS crawl_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    domain TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    success INTEGER NOT NULL,
    cmp_type TEXT,
    cookies_collected INTEGER NOT NULL DEFAULT 0,
    error_message TEXT
);
CREATE TABLE IF NOT EXISTS cookies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER NOT NULL REFERENCES crawl_results(id),
    name TEXT,
    domain TEXT,
    value TEXT,
    path TEXT,
    expiry INTEGER,
    secure INTEGER,
    http_only INTEGER,
    same_site TEXT
);
CREATE TABLE IF NOT EXISTS consent_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    crawl_id INTEGER NOT NULL REFERENCES crawl_results(id),
    cookie_name TEXT,
    cookie_domain TEXT,
    purpose_category TEXT,
    purpose_description TEXT,
    cmp_type TEXT
);
CREATE INDEX IF NOT EXISTS idx_cookies_crawl ON cookies(crawl_id);
CREATE INDEX IF NOT EXISTS idx_consent_crawl ON consent_data(crawl_id);
";

/// Crawl store on a single SQLite connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        // a panicked writer cannot leave a half-open statement behind
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Drop rows with empty names and rows whose crawl record is gone.
    pub fn clean(&self) -> Result<CleanupStats> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let stats = CleanupStats {
            empty_cookie_names_removed: tx
                .execute("DELETE FROM cookies WHERE name IS NULL OR name = ''", [])?,
            empty_consent_names_removed: tx.execute(
                "DELETE FROM consent_data WHERE cookie_name IS NULL OR cookie_name = ''",
                [],
            )?,
            orphaned_cookies_removed: tx.execute(
                "DELETE FROM cookies WHERE crawl_id NOT IN (SELECT id FROM crawl_results)",
                [],
            )?,
            orphaned_consent_data_removed: tx.execute(
                "DELETE FROM consent_data WHERE crawl_id NOT IN (SELECT id FROM crawl_results)",
                [],
            )?,
        };
        tx.commit()?;
        info!(?stats, "database cleaned");
        Ok(stats)
    }

    pub fn stats(&self) -> Result<DatabaseStats> {
        let conn = self.conn();
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };

        let total_crawls = count("SELECT COUNT(*) FROM crawl_results")?;
        let successful_crawls = count("SELECT COUNT(*) FROM crawl_results WHERE success = 1")?;
        let average: Option<f64> = conn.query_row(
            "SELECT AVG(cookies_collected) FROM crawl_results WHERE success = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(DatabaseStats {
            total_crawls,
            successful_crawls,
            failed_crawls: count("SELECT COUNT(*) FROM crawl_results WHERE success = 0")?,
            success_rate: if total_crawls > 0 {
                successful_crawls as f64 / total_crawls as f64
            } else {
                0.0
            },
            cmp_distribution: grouped(
                &conn,
                "SELECT cmp_type, COUNT(*) FROM crawl_results
                 WHERE success = 1 GROUP BY cmp_type",
            )?,
            total_cookies: count("SELECT COUNT(*) FROM cookies")?,
            unique_cookies: count("SELECT COUNT(DISTINCT name || domain) FROM cookies")?,
            average_cookies_per_crawl: average.map(round2).unwrap_or(0.0),
            consent_data_entries: count("SELECT COUNT(*) FROM consent_data")?,
            domains_with_consent_data: count("SELECT COUNT(DISTINCT crawl_id) FROM consent_data")?,
            purpose_categories: grouped(
                &conn,
                "SELECT purpose_category, COUNT(*) FROM consent_data GROUP BY purpose_category",
            )?,
            common_errors: grouped(
                &conn,
                "SELECT error_message, COUNT(*) FROM crawl_results
                 WHERE success = 0 AND error_message IS NOT NULL
                 GROUP BY error_message ORDER BY COUNT(*) DESC LIMIT 10",
            )?,
            secure_cookies: count("SELECT COUNT(*) FROM cookies WHERE secure = 1")?,
            http_only_cookies: count("SELECT COUNT(*) FROM cookies WHERE http_only = 1")?,
            same_site_distribution: grouped(
                &conn,
                "SELECT same_site, COUNT(*) FROM cookies
                 WHERE same_site IS NOT NULL GROUP BY same_site",
            )?,
        })
    }
}

/// `key, count` rows into a map; a NULL key becomes "unknown".
fn grouped(conn: &Connection, sql: &str) -> Result<BTreeMap<String, u64>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        let key: Option<String> = row.get(0)?;
        let n: i64 = row.get(1)?;
        Ok((key.unwrap_or_else(|| "unknown".to_string()), n.max(0) as u64))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (key, n) = row?;
        *map.entry(key).or_insert(0) += n;
    }
    Ok(map)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn insert_crawl(conn: &Connection, record: &NewCrawlRecord) -> rusqlite::Result<i64> {
    conn.execute(
        "INSERT INTO crawl_results
            (domain, timestamp, success, cmp_type, cookies_collected, error_message)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.domain,
            record.timestamp,
            record.success,
            record.cmp_type,
            record.cookies_collected,
            record.error_message,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn insert_cookies(conn: &Connection, crawl_id: i64, cookies: &[Cookie]) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO cookies
            (crawl_id, name, domain, value, path, expiry, secure, http_only, same_site)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for c in cookies {
        stmt.execute(params![
            crawl_id,
            c.name,
            c.domain,
            c.value,
            c.path,
            c.expiry,
            c.secure,
            c.http_only,
            c.same_site,
        ])?;
    }
    Ok(())
}

fn insert_declarations(
    conn: &Connection,
    crawl_id: i64,
    declarations: &[ConsentDeclaration],
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO consent_data
            (crawl_id, cookie_name, cookie_domain, purpose_category,
             purpose_description, cmp_type)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for d in declarations {
        stmt.execute(params![
            crawl_id,
            d.cookie_name,
            d.cookie_domain,
            d.purpose_category,
            d.purpose_description,
            d.cmp_type,
        ])?;
    }
    Ok(())
}

impl CrawlStore for SqliteStore {
    fn create_crawl_record(&self, record: &NewCrawlRecord) -> Result<i64> {
        Ok(insert_crawl(&self.conn(), record)?)
    }

    fn append_cookies(&self, crawl_id: i64, cookies: &[Cookie]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_cookies(&tx, crawl_id, cookies)?;
        tx.commit()?;
        Ok(cookies.len())
    }

    fn append_consent_declarations(
        &self,
        crawl_id: i64,
        declarations: &[ConsentDeclaration],
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_declarations(&tx, crawl_id, declarations)?;
        tx.commit()?;
        Ok(declarations.len())
    }

    /// The record and its children land together or not at all.
    fn record_crawl(
        &self,
        record: &NewCrawlRecord,
        cookies: &[Cookie],
        declarations: &[ConsentDeclaration],
    ) -> Result<i64> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let id = insert_crawl(&tx, record)?;
        insert_cookies(&tx, id, cookies)?;
        insert_declarations(&tx, id, declarations)?;
        tx.commit()?;
        Ok(id)
    }

    fn read_for_matching(&self) -> Result<MatchInput> {
        let conn = self.conn();

        let mut stmt = conn.prepare(
            "SELECT id, domain, timestamp, success, cmp_type, cookies_collected, error_message
             FROM crawl_results ORDER BY id",
        )?;
        let crawls = stmt
            .query_map([], |row| {
                Ok(CrawlRecord {
                    id: row.get(0)?,
                    domain: row.get(1)?,
                    timestamp: row.get(2)?,
                    success: row.get(3)?,
                    cmp_type: row.get(4)?,
                    cookies_collected: row.get(5)?,
                    error_message: row.get(6)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, crawl_id, name, domain, value, path, expiry, secure, http_only, same_site
             FROM cookies ORDER BY id",
        )?;
        let cookies = stmt
            .query_map([], |row| {
                Ok(StoredCookie {
                    id: row.get(0)?,
                    crawl_id: row.get(1)?,
                    cookie: Cookie {
                        name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        domain: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        value: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        path: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        expiry: row.get(6)?,
                        secure: row.get::<_, Option<bool>>(7)?.unwrap_or(false),
                        http_only: row.get::<_, Option<bool>>(8)?.unwrap_or(false),
                        same_site: row.get(9)?,
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT id, crawl_id, cookie_name, cookie_domain, purpose_category,
                    purpose_description, cmp_type
             FROM consent_data ORDER BY id",
        )?;
        let declarations = stmt
            .query_map([], |row| {
                Ok(StoredDeclaration {
                    id: row.get(0)?,
                    crawl_id: row.get(1)?,
                    declaration: ConsentDeclaration {
                        cookie_name: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                        cookie_domain: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                        purpose_category: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                        purpose_description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
                        cmp_type: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
                    },
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(MatchInput {
            crawls,
            cookies,
            declarations,
        })
    }
}

/// `<dir>/<stem>_backup.<ext>` next to the database.
pub fn backup_path(db_path: &Path) -> PathBuf {
    let stem = db_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "database".to_string());
    let name = match db_path.extension() {
        Some(ext) => format!("{stem}_backup.{}", ext.to_string_lossy()),
        None => format!("{stem}_backup"),
    };
    db_path.with_file_name(name)
}

/// Copy the database file to [`backup_path`].
pub fn backup(db_path: &Path) -> Result<PathBuf> {
    let target = backup_path(db_path);
    std::fs::copy(db_path, &target)?;
    info!("database backed up to {}", target.display());
    Ok(target)
}
