//! Presence probe: script-free CMP classification from raw HTTP responses.
//!
//! [`Prober`] classifies a single domain. [`pool::PresencePool`] runs many
//! of them at once, each inside an isolated worker.

pub mod http;
pub mod pool;

use crate::fingerprint::FingerprintRegistry;
use crate::resolve::candidate_urls;
use crate::types::{ProbeOutcome, ProbeReport};
use http::{Fetch, FetchFailure};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classifies one domain at a time using the shared registry.
#[derive(Clone)]
pub struct Prober {
    fetcher: Arc<dyn Fetch>,
    registry: Arc<FingerprintRegistry>,
    check_cmp: bool,
}

impl Prober {
    pub fn new(fetcher: Arc<dyn Fetch>, registry: Arc<FingerprintRegistry>, check_cmp: bool) -> Self {
        Self {
            fetcher,
            registry,
            check_cmp,
        }
    }

    /// Walk the candidate URLs until one answers, then classify.
    ///
    /// Returns the answering URL (final URL after redirects for 2xx pages)
    /// or the original input when nothing answered.
    pub async fn probe(&self, input: &str) -> ProbeReport {
        for url in candidate_urls(input) {
            let page = match self.fetcher.get(&url).await {
                Ok(page) => page,
                Err(e) => match e.kind {
                    FetchFailure::Transient => {
                        debug!(url = %url, "connection/timeout error, trying next prefix: {}", e.message);
                        continue;
                    }
                    FetchFailure::Fatal => {
                        debug!(url = %url, "SSL/scheme error: {}", e.message);
                        return report(input, input, ProbeOutcome::ConnectFail);
                    }
                    FetchFailure::Unexpected => {
                        warn!(url = %url, "unexpected fetch error: {}", e.message);
                        return report(input, input, ProbeOutcome::ConnectFail);
                    }
                },
            };

            if !(200..300).contains(&page.status) {
                let outcome = match page.status {
                    403 | 406 => ProbeOutcome::Bot,
                    _ => ProbeOutcome::HttpError,
                };
                return report(input, &url, outcome);
            }

            let outcome = if self.check_cmp {
                self.registry
                    .classify(&page.body)
                    .map(ProbeOutcome::from_cmp)
                    .unwrap_or(ProbeOutcome::NoCmp)
            } else {
                ProbeOutcome::Ok
            };
            return report(input, &page.final_url, outcome);
        }

        report(input, input, ProbeOutcome::ConnectFail)
    }
}

fn report(input: &str, url: &str, outcome: ProbeOutcome) -> ProbeReport {
    ProbeReport {
        input: input.to_string(),
        url: url.to_string(),
        outcome,
    }
}
