//! Runs many consent crawls with a bounded number of parallel sessions and
//! persists each one as it finishes.

use super::{ConsentCrawl, ConsentExtractor};
use crate::shutdown::Shutdown;
use crate::store::CrawlStore;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

/// Totals of one consent run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConsentSummary {
    pub total_domains: usize,
    pub successful_crawls: usize,
    pub failed_crawls: usize,
    /// Detected CMP → successful crawls.
    pub cmp_types: BTreeMap<String, usize>,
    pub total_cookies: usize,
    pub domains_with_consent_data: usize,
    /// Crawls that finished but could not be written.
    pub persist_failures: usize,
    pub elapsed_secs: f64,
    /// Domains never started because of an interrupt.
    pub unprocessed: Vec<String>,
}

impl ConsentSummary {
    fn record(&mut self, crawl: &ConsentCrawl) {
        if crawl.success {
            self.successful_crawls += 1;
            self.total_cookies += crawl.cookies_after.len();
            if !crawl.declarations.is_empty() {
                self.domains_with_consent_data += 1;
            }
            *self.cmp_types.entry(crawl.cmp_name().to_string()).or_insert(0) += 1;
        } else {
            self.failed_crawls += 1;
        }
    }

    pub fn interrupted(&self) -> bool {
        !self.unprocessed.is_empty()
    }
}

struct Finished {
    crawl: ConsentCrawl,
    persisted: bool,
}

pub struct ConsentCrawler {
    extractor: Arc<ConsentExtractor>,
    store: Arc<dyn CrawlStore>,
}

impl ConsentCrawler {
    pub fn new(extractor: Arc<ConsentExtractor>, store: Arc<dyn CrawlStore>) -> Self {
        Self { extractor, store }
    }

    /// Crawl `domains` in order, up to `sessions` at once, pausing the
    /// inter-crawl delay between launches.
    pub async fn run(&self, domains: &[String], shutdown: &Shutdown) -> ConsentSummary {
        let start = Instant::now();
        let config = self.extractor.config();
        let sessions = config.sessions.max(1);
        let delay = config.inter_crawl_delay();
        let mut summary = ConsentSummary {
            total_domains: domains.len(),
            ..Default::default()
        };
        info!(domains = domains.len(), sessions, "starting consent crawl");

        let permits = Arc::new(Semaphore::new(sessions));
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut signal = shutdown.clone();

        for (i, domain) in domains.iter().enumerate() {
            let permit = if shutdown.is_triggered() {
                None
            } else {
                tokio::select! {
                    biased;
                    _ = signal.wait() => None,
                    permit = Arc::clone(&permits).acquire_owned() => permit.ok(),
                }
            };
            // the interrupt may land while waiting for a free session
            let permit = permit.filter(|_| !shutdown.is_triggered());
            let Some(permit) = permit else {
                summary.unprocessed.extend(domains[i..].iter().cloned());
                break;
            };

            // counted from the moment a session frees up, not from the last spawn
            if i > 0 && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = signal.wait() => {}
                }
                if shutdown.is_triggered() {
                    drop(permit);
                    summary.unprocessed.extend(domains[i..].iter().cloned());
                    break;
                }
            }

            while let Some(done) = tasks.try_join_next() {
                absorb(done, &mut summary);
            }

            info!("progress: {}/{} - {domain}", i + 1, domains.len());
            let extractor = Arc::clone(&self.extractor);
            let store = Arc::clone(&self.store);
            let domain = domain.clone();
            tasks.spawn(async move {
                let _permit = permit;
                let crawl = extractor.crawl_domain(&domain).await;
                let persisted = match store.record_crawl(
                    &crawl.record(),
                    &crawl.cookies_after,
                    &crawl.declarations,
                ) {
                    Ok(id) => {
                        info!(domain = %domain, crawl_id = id, "crawl persisted");
                        true
                    }
                    Err(e) => {
                        error!(domain = %domain, "failed to persist crawl: {e}");
                        false
                    }
                };
                Finished { crawl, persisted }
            });
        }

        while let Some(done) = tasks.join_next().await {
            absorb(done, &mut summary);
        }

        summary.elapsed_secs = start.elapsed().as_secs_f64();
        if summary.interrupted() {
            warn!(
                remaining = summary.unprocessed.len(),
                "consent crawl interrupted, domains not processed"
            );
        }
        info!(
            successful = summary.successful_crawls,
            failed = summary.failed_crawls,
            "consent crawl completed in {:.2}s",
            summary.elapsed_secs
        );
        summary
    }
}

fn absorb(done: Result<Finished, tokio::task::JoinError>, summary: &mut ConsentSummary) {
    match done {
        Ok(finished) => {
            summary.record(&finished.crawl);
            if !finished.persisted {
                summary.persist_failures += 1;
            }
        }
        Err(e) => {
            error!("consent crawl task failed: {e}");
            summary.failed_crawls += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::browser::{BrowserError, BrowserLauncher, BrowserSession};
    use super::super::tests::{cookie, fast_config, FakeLauncher, FakePage};
    use super::*;
    use crate::config::ExtractorConfig;
    use crate::fingerprint::FingerprintRegistry;
    use crate::shutdown::{self, ShutdownTrigger};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::time::Duration;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("site{i}.com")).collect()
    }

    fn crawler(
        launcher: Arc<dyn BrowserLauncher>,
        sessions: usize,
        store: Arc<MemoryStore>,
    ) -> ConsentCrawler {
        let config = ExtractorConfig {
            sessions,
            ..fast_config()
        };
        let extractor = ConsentExtractor::new(
            launcher,
            Arc::new(FingerprintRegistry::rendered().unwrap()),
            config,
        );
        ConsentCrawler::new(Arc::new(extractor), store)
    }

    #[tokio::test]
    async fn test_every_domain_persisted_once() {
        let launcher = FakeLauncher::new(FakePage {
            html: r#"<div data-cookiefirst-category="Necessary" data-cookiefirst-name="CookieConsent"
                          data-cookiefirst-domain="site.com">consent</div>
                     <script src="https://consent.cookiebot.com/uc.js"></script>"#
                .into(),
            cookies_before: vec![cookie("CookieConsent"), cookie("_ga")],
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(launcher.clone(), 3, store.clone())
            .run(&names(5), &Shutdown::never())
            .await;

        assert_eq!(summary.total_domains, 5);
        assert_eq!(summary.successful_crawls, 5);
        assert_eq!(summary.cmp_types["cookiebot"], 5);
        assert_eq!(summary.total_cookies, 10);
        assert_eq!(summary.domains_with_consent_data, 5);
        assert!(!summary.interrupted());

        let input = store.read_for_matching().unwrap();
        assert_eq!(input.crawls.len(), 5);
        assert_eq!(input.cookies.len(), 10);
        assert_eq!(input.declarations.len(), 5);
        let calls = launcher.calls.lock().unwrap();
        assert_eq!(calls.launched, 5);
        assert_eq!(calls.closed, 5);
    }

    #[tokio::test]
    async fn test_failed_crawls_still_recorded() {
        let launcher = FakeLauncher::new(FakePage {
            never_ready: true,
            ..Default::default()
        });
        let store = Arc::new(MemoryStore::new());
        let summary = crawler(launcher, 1, store.clone()).run(&names(2), &Shutdown::never()).await;

        assert_eq!(summary.failed_crawls, 2);
        let crawls = store.crawls();
        assert_eq!(crawls.len(), 2);
        assert!(crawls.iter().all(|c| !c.success));
        assert_eq!(crawls[0].error_message.as_deref(), Some("Page load timeout"));
    }

    #[tokio::test]
    async fn test_delay_separates_sequential_crawls() {
        let launcher = FakeLauncher::new(FakePage {
            navigate_delay: Duration::from_millis(150),
            ..Default::default()
        });
        let config = ExtractorConfig {
            sessions: 1,
            inter_crawl_delay_ms: 300,
            ..fast_config()
        };
        let extractor = ConsentExtractor::new(
            launcher.clone(),
            Arc::new(FingerprintRegistry::rendered().unwrap()),
            config,
        );
        let store = Arc::new(MemoryStore::new());
        let summary = ConsentCrawler::new(Arc::new(extractor), store.clone())
            .run(&names(3), &Shutdown::never())
            .await;
        assert_eq!(summary.successful_crawls, 3);

        let events = launcher.calls.lock().unwrap().events.clone();
        let kinds: Vec<_> = events.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, ["launch", "close", "launch", "close", "launch", "close"]);
        for pair in events.windows(2).filter(|w| w[0].0 == "close") {
            let gap = pair[1].1.duration_since(pair[0].1);
            assert!(gap >= Duration::from_millis(300), "gap {gap:?} shorter than the delay");
        }
        assert_eq!(store.crawls().len(), 3);
    }

    #[tokio::test]
    async fn test_interrupt_during_delay_stops_launches() {
        let (trigger, signal) = shutdown::channel();
        let launcher = FakeLauncher::new(FakePage::default());
        let config = ExtractorConfig {
            sessions: 1,
            inter_crawl_delay_ms: 5_000,
            ..fast_config()
        };
        let extractor = ConsentExtractor::new(
            launcher.clone(),
            Arc::new(FingerprintRegistry::rendered().unwrap()),
            config,
        );
        let crawler = ConsentCrawler::new(Arc::new(extractor), Arc::new(MemoryStore::new()));
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            trigger.trigger();
        });

        let domains = names(3);
        let summary = tokio::time::timeout(Duration::from_secs(3), crawler.run(&domains, &signal))
            .await
            .expect("interrupt should cut the delay short");
        assert_eq!(summary.successful_crawls, 1);
        assert_eq!(summary.unprocessed, domains[1..].to_vec());
        assert_eq!(launcher.calls.lock().unwrap().launched, 1);
    }

    /// Fires the interrupt as soon as the first session launches.
    struct InterruptingLauncher {
        inner: Arc<FakeLauncher>,
        trigger: ShutdownTrigger,
    }

    #[async_trait]
    impl BrowserLauncher for InterruptingLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
            self.trigger.trigger();
            self.inner.launch().await
        }
    }

    #[tokio::test]
    async fn test_interrupt_lists_unstarted_domains() {
        let (trigger, signal) = shutdown::channel();
        let inner = FakeLauncher::new(FakePage::default());
        let launcher = Arc::new(InterruptingLauncher {
            inner: inner.clone(),
            trigger,
        });
        let store = Arc::new(MemoryStore::new());
        let domains = names(4);
        let summary = crawler(launcher, 1, store.clone()).run(&domains, &signal).await;

        // the in-flight crawl completes and is kept
        assert_eq!(summary.successful_crawls, 1);
        assert_eq!(summary.unprocessed, domains[1..].to_vec());
        assert_eq!(store.crawls().len(), 1);
        assert_eq!(inner.calls.lock().unwrap().launched, 1);
    }
}
