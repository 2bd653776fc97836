//! End-to-end presence runs over a scripted network.

use async_trait::async_trait;
use consent_crawler::probe::http::{Fetch, FetchError, FetchFailure, FetchedPage};
use consent_crawler::probe::pool::{InProcessExecutor, PresencePool, ProbeExecutor, WorkerFault};
use consent_crawler::probe::Prober;
use consent_crawler::shutdown::{self, ShutdownTrigger};
use consent_crawler::store::{CrawlStore, MemoryStore};
use consent_crawler::{FingerprintRegistry, NewCrawlRecord, ProbeOutcome, ProbeReport, Shutdown};
use std::sync::Arc;
use std::time::Duration;

const COOKIEBOT: &str =
    r#"<script id="Cookiebot" src="https://consent.cookiebot.com/uc.js"></script>"#;
const ONETRUST: &str =
    r#"<script src="https://cdn.cookielaw.org/scripttemplates/otSDKStub.js"></script>"#;
const PLAIN: &str = "<html><body>hello</body></html>";

/// Answers on the `https://www.` prefix according to the host name.
struct ScriptedNetwork;

#[async_trait]
impl Fetch for ScriptedNetwork {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let host = url
            .strip_prefix("https://www.")
            .ok_or_else(|| FetchError::new(FetchFailure::Transient, url, "connection refused"))?;

        let (status, body) = match host {
            h if h.starts_with("cookiebot") => (200, COOKIEBOT),
            h if h.starts_with("onetrust") => (200, ONETRUST),
            "blocked.com" => (403, ""),
            "slow.com" => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                (200, PLAIN)
            }
            _ => (200, PLAIN),
        };
        Ok(FetchedPage {
            url: url.to_string(),
            final_url: format!("{url}/"),
            status,
            body: body.to_string(),
        })
    }
}

fn prober() -> Prober {
    Prober::new(
        Arc::new(ScriptedNetwork),
        Arc::new(FingerprintRegistry::presence().unwrap()),
        true,
    )
}

fn scenario_domains() -> Vec<String> {
    [
        "cookiebot1.com",
        "cookiebot2.com",
        "cookiebot3.com",
        "onetrust1.com",
        "onetrust2.com",
        "blocked.com",
        "slow.com",
        "plain1.com",
        "plain2.com",
        "plain3.com",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[tokio::test]
async fn ten_domain_bucket_counts() {
    for batches in [1, 3] {
        let pool = PresencePool::new(
            Arc::new(InProcessExecutor::new(prober())),
            4,
            Duration::from_millis(300),
        );
        let summary = pool
            .run(&scenario_domains(), batches, &Shutdown::never(), |_| {})
            .await;

        assert_eq!(summary.count(ProbeOutcome::Cookiebot), 3, "batches={batches}");
        assert_eq!(summary.count(ProbeOutcome::OneTrust), 2);
        assert_eq!(summary.count(ProbeOutcome::Bot), 1);
        assert_eq!(summary.count(ProbeOutcome::Timeout), 1);
        assert_eq!(summary.count(ProbeOutcome::NoCmp), 3);
        assert_eq!(summary.completed(), 10);
        assert!(summary.unprocessed.is_empty());
        assert_eq!(summary.buckets[&ProbeOutcome::Timeout], vec!["slow.com"]);
        assert_eq!(summary.buckets[&ProbeOutcome::Bot], vec!["https://www.blocked.com"]);
    }
}

#[tokio::test]
async fn presence_records_persisted_per_domain() {
    let store = MemoryStore::new();
    let pool = PresencePool::new(
        Arc::new(InProcessExecutor::new(prober())),
        2,
        Duration::from_millis(300),
    );
    pool.run(&scenario_domains(), 1, &Shutdown::never(), |report| {
        store
            .create_crawl_record(&NewCrawlRecord::from_probe(report))
            .unwrap();
    })
    .await;

    let crawls = store.crawls();
    assert_eq!(crawls.len(), 10);
    let blocked = crawls.iter().find(|c| c.domain == "blocked.com").unwrap();
    assert!(!blocked.success);
    assert_eq!(blocked.error_message.as_deref(), Some("BOT"));
    let cb = crawls.iter().find(|c| c.domain == "cookiebot2.com").unwrap();
    assert!(cb.success);
    assert_eq!(cb.cmp_type.as_deref(), Some("cookiebot"));
}

/// Probes nothing; fires the interrupt when it sees `stop.com`.
struct InterruptOn {
    trigger: ShutdownTrigger,
}

#[async_trait]
impl ProbeExecutor for InterruptOn {
    async fn execute(&self, domain: &str) -> Result<ProbeReport, WorkerFault> {
        if domain == "stop.com" {
            self.trigger.trigger();
        }
        Ok(ProbeReport {
            input: domain.to_string(),
            url: domain.to_string(),
            outcome: ProbeOutcome::NoCmp,
        })
    }
}

#[tokio::test]
async fn interrupt_keeps_completed_and_lists_rest() {
    let (trigger, signal) = shutdown::channel();
    let pool = PresencePool::new(Arc::new(InterruptOn { trigger }), 1, Duration::from_secs(5));
    let domains: Vec<String> = ["a.com", "b.com", "stop.com", "c.com", "d.com"]
        .iter()
        .map(|s| s.to_string())
        .collect();

    let mut seen = Vec::new();
    let summary = pool
        .run(&domains, 2, &signal, |r| seen.push(r.input.clone()))
        .await;

    assert_eq!(seen, vec!["a.com", "b.com", "stop.com"]);
    assert_eq!(summary.count(ProbeOutcome::NoCmp), 3);
    assert_eq!(summary.unprocessed, vec!["c.com", "d.com"]);
    assert!(summary.interrupted());
}
