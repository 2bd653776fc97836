//! Cookie-consent matcher.
//!
//! Joins stored cookies with the declaration for the same (name, domain) in
//! the same crawl, then merges observations across crawls into one
//! [`MatchedCookie`] per `"<domain>_<name>"`. Output depends only on stored
//! rows: inputs are put into a canonical order first, so repeated runs over
//! the same data serialize to identical bytes.

pub mod analysis;
pub mod labels;

pub use analysis::{consistency_report, matching_analysis, LabelConflict, MatchingAnalysis};
pub use labels::{label_name, purpose_label, Purpose};

use crate::config::MatchConfig;
use crate::error::Result;
use crate::store::{CrawlStore, MatchInput};
use crate::types::{cmp_code, ConsentDeclaration, CrawlRecord, StoredCookie};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::info;

/// Default path for cookies stored without one.
const DEFAULT_PATH: &str = "/";
/// `same_site` written when the browser reported none.
const DEFAULT_SAME_SITE: &str = "no_restriction";

/// Per-observation cookie attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableData {
    pub value: String,
    /// Unix seconds; `null` for session cookies.
    pub expiry: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: String,
}

/// One exported cookie entity. Fixed fields come from its first observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchedCookie {
    pub name: String,
    pub domain: String,
    pub path: String,
    pub cmp_origin: i32,
    pub label: i32,
    pub purpose_description: String,
    pub crawl_domain: String,
    pub variable_data: Vec<VariableData>,
}

/// Counts over cookie instances considered by one matcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStatistics {
    pub total_unique_cookies: usize,
    pub matched_cookies: usize,
    pub unmatched_cookies: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MatchOutput {
    /// Export mapping, keyed `"<domain>_<name>"`.
    pub cookies: BTreeMap<String, MatchedCookie>,
    pub statistics: MatchStatistics,
}

impl MatchOutput {
    /// Pretty JSON of the export mapping.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.cookies)?)
    }
}

/// One cookie observed in one successful crawl, with its joined declaration.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Instance<'a> {
    pub crawl: &'a CrawlRecord,
    pub cookie: &'a StoredCookie,
    pub declaration: Option<&'a ConsentDeclaration>,
}

impl Instance<'_> {
    /// Joined with a declaration that names a category.
    pub fn is_matched(&self) -> bool {
        self.declaration
            .map(|d| !d.purpose_category.is_empty())
            .unwrap_or(false)
    }

    pub fn key(&self) -> String {
        export_key(&self.cookie.cookie.domain, &self.cookie.cookie.name)
    }
}

pub fn export_key(domain: &str, name: &str) -> String {
    format!("{domain}_{name}")
}

/// Cookie instances of successful crawls in canonical order: crawl domain,
/// cookie name, crawl id, cookie id. One instance per (crawl, domain, name);
/// the lowest-id cookie and the lowest-id declaration win.
pub(crate) fn instances(input: &MatchInput) -> Vec<Instance<'_>> {
    let crawls: HashMap<i64, &CrawlRecord> = input
        .crawls
        .iter()
        .filter(|c| c.success)
        .map(|c| (c.id, c))
        .collect();

    let mut declarations: Vec<_> = input.declarations.iter().collect();
    declarations.sort_by_key(|d| d.id);
    let mut declared: HashMap<(i64, &str, &str), &ConsentDeclaration> = HashMap::new();
    for d in declarations {
        declared
            .entry((
                d.crawl_id,
                d.declaration.cookie_name.as_str(),
                d.declaration.cookie_domain.as_str(),
            ))
            .or_insert(&d.declaration);
    }

    let mut cookies: Vec<_> = input
        .cookies
        .iter()
        .filter(|c| !c.cookie.name.is_empty())
        .collect();
    cookies.sort_by_key(|c| c.id);

    let mut seen = HashSet::new();
    let mut out: Vec<Instance<'_>> = cookies
        .into_iter()
        .filter_map(|c| {
            let crawl = *crawls.get(&c.crawl_id)?;
            let name = c.cookie.name.as_str();
            let domain = c.cookie.domain.as_str();
            if !seen.insert((c.crawl_id, domain, name)) {
                return None;
            }
            Some(Instance {
                crawl,
                cookie: c,
                declaration: declared.get(&(c.crawl_id, name, domain)).copied(),
            })
        })
        .collect();

    out.sort_by(|a, b| {
        (a.crawl.domain.as_str(), a.cookie.cookie.name.as_str(), a.crawl.id, a.cookie.id).cmp(&(
            b.crawl.domain.as_str(),
            b.cookie.cookie.name.as_str(),
            b.crawl.id,
            b.cookie.id,
        ))
    });
    out
}

fn variable_data(cookie: &StoredCookie) -> VariableData {
    let c = &cookie.cookie;
    VariableData {
        value: c.value.clone(),
        expiry: c.expiry,
        secure: c.secure,
        http_only: c.http_only,
        same_site: c
            .same_site
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SAME_SITE.to_string()),
    }
}

/// Build the export from already-read store rows.
pub fn match_cookies(input: &MatchInput, config: &MatchConfig) -> MatchOutput {
    let mut output = MatchOutput::default();

    for inst in instances(input) {
        let matched = inst.is_matched();
        if matched {
            output.statistics.matched_cookies += 1;
        } else {
            output.statistics.unmatched_cookies += 1;
            if !config.include_unmatched {
                continue;
            }
        }

        let data = variable_data(inst.cookie);
        output
            .cookies
            .entry(inst.key())
            .and_modify(|entry| entry.variable_data.push(data.clone()))
            .or_insert_with(|| {
                let c = &inst.cookie.cookie;
                MatchedCookie {
                    name: c.name.clone(),
                    domain: c.domain.clone(),
                    path: if c.path.is_empty() {
                        DEFAULT_PATH.to_string()
                    } else {
                        c.path.clone()
                    },
                    cmp_origin: cmp_code(inst.crawl.cmp_type.as_deref()),
                    label: purpose_label(inst.declaration.map(|d| d.purpose_category.as_str())),
                    purpose_description: inst
                        .declaration
                        .map(|d| d.purpose_description.clone())
                        .unwrap_or_default(),
                    crawl_domain: inst.crawl.domain.clone(),
                    variable_data: vec![data.clone()],
                }
            });
    }

    output.statistics.total_unique_cookies = output.cookies.len();
    info!(
        unique = output.statistics.total_unique_cookies,
        matched = output.statistics.matched_cookies,
        unmatched = output.statistics.unmatched_cookies,
        "cookie matching complete"
    );
    output
}

/// Read the store and build the export.
pub fn run(store: &dyn CrawlStore, config: &MatchConfig) -> Result<MatchOutput> {
    let input = store.read_for_matching()?;
    Ok(match_cookies(&input, config))
}
