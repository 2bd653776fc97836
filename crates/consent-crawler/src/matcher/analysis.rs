//! Read-only reports over the same joined instances the export uses.

use super::{instances, purpose_label, Instance};
use crate::store::MatchInput;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingRate {
    pub total_cookies: usize,
    pub matched_cookies: usize,
    pub matching_rate: f64,
}

impl MatchingRate {
    fn from_pairs(total: usize, matched: usize) -> Self {
        Self {
            total_cookies: total,
            matched_cookies: matched,
            matching_rate: if total > 0 {
                matched as f64 / total as f64
            } else {
                0.0
            },
        }
    }
}

/// How many distinct (name, domain) pairs were joined with a declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchingAnalysis {
    pub total_unique_cookies: usize,
    pub matched_with_consent: usize,
    pub unmatched_cookies: usize,
    pub matching_rate: f64,
    /// Keyed by the crawl's `cmp_type` ("unknown" when missing).
    pub by_cmp_type: BTreeMap<String, MatchingRate>,
}

#[derive(Default)]
struct PairSets<'a> {
    all: BTreeSet<(&'a str, &'a str)>,
    matched: BTreeSet<(&'a str, &'a str)>,
}

impl<'a> PairSets<'a> {
    fn add(&mut self, inst: &Instance<'a>) {
        let pair = (inst.cookie.cookie.name.as_str(), inst.cookie.cookie.domain.as_str());
        self.all.insert(pair);
        if inst.is_matched() {
            self.matched.insert(pair);
        }
    }
}

/// Overall and per-CMP matching rate over successful crawls.
pub fn matching_analysis(input: &MatchInput) -> MatchingAnalysis {
    let mut overall = PairSets::default();
    let mut per_cmp: BTreeMap<String, PairSets<'_>> = BTreeMap::new();

    for inst in instances(input) {
        overall.add(&inst);
        let cmp = inst
            .crawl
            .cmp_type
            .clone()
            .unwrap_or_else(|| "unknown".to_string());
        per_cmp.entry(cmp).or_default().add(&inst);
    }

    let rate = MatchingRate::from_pairs(overall.all.len(), overall.matched.len());
    MatchingAnalysis {
        total_unique_cookies: rate.total_cookies,
        matched_with_consent: rate.matched_cookies,
        unmatched_cookies: rate.total_cookies - rate.matched_cookies,
        matching_rate: rate.matching_rate,
        by_cmp_type: per_cmp
            .into_iter()
            .map(|(cmp, sets)| (cmp, MatchingRate::from_pairs(sets.all.len(), sets.matched.len())))
            .collect(),
    }
}

/// A merged export entity whose crawls declared different purposes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConflict {
    pub key: String,
    pub name: String,
    pub domain: String,
    /// Label → crawl domains that declared it.
    pub labels: BTreeMap<i32, Vec<String>>,
}

/// Entities the export merges despite disagreeing labels. The export itself
/// keeps the first observation's label; this only reports.
pub fn consistency_report(input: &MatchInput) -> Vec<LabelConflict> {
    let mut by_key: BTreeMap<String, LabelConflict> = BTreeMap::new();

    for inst in instances(input).iter().filter(|i| i.is_matched()) {
        let label = purpose_label(inst.declaration.map(|d| d.purpose_category.as_str()));
        by_key
            .entry(inst.key())
            .or_insert_with(|| LabelConflict {
                key: inst.key(),
                name: inst.cookie.cookie.name.clone(),
                domain: inst.cookie.cookie.domain.clone(),
                labels: BTreeMap::new(),
            })
            .labels
            .entry(label)
            .or_default()
            .push(inst.crawl.domain.clone());
    }

    by_key
        .into_values()
        .filter(|c| c.labels.len() > 1)
        .collect()
}
