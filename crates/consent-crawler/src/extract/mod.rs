//! Browser-driven consent extraction.
//!
//! Each domain gets a fresh [`BrowserSession`] driven through a fixed phase
//! sequence:
//!
//! ```text
//! INIT → NAVIGATE → WAIT_LOAD → DETECT_CMP → EXTRACT_DECLARED_PURPOSES
//!      → COLLECT_COOKIES_PRE → INTERACT_CONSENT → COLLECT_COOKIES_POST
//!      → TEARDOWN
//! ```
//!
//! Only a failed launch, NAVIGATE or WAIT_LOAD ends the crawl early (still
//! through TEARDOWN). Every later step degrades to an empty result.

pub mod browser;
pub mod chromium;
pub mod crawler;
pub mod scrapers;

pub use browser::{BrowserError, BrowserLauncher, BrowserSession, ElementState};
pub use chromium::{find_chromium, ChromiumLauncher};
pub use crawler::{ConsentCrawler, ConsentSummary};

use crate::config::ExtractorConfig;
use crate::error::CrawlError;
use crate::fingerprint::FingerprintRegistry;
use crate::resolve::browser_url;
use crate::types::{CmpKind, ConsentDeclaration, Cookie, NewCrawlRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Extraction phases, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Init,
    Navigate,
    WaitLoad,
    DetectCmp,
    ExtractDeclaredPurposes,
    CollectCookiesPre,
    InteractConsent,
    CollectCookiesPost,
    Teardown,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Navigate => "navigate",
            Phase::WaitLoad => "wait_load",
            Phase::DetectCmp => "detect_cmp",
            Phase::ExtractDeclaredPurposes => "declared_purposes",
            Phase::CollectCookiesPre => "collect_cookies_pre",
            Phase::InteractConsent => "interact_consent",
            Phase::CollectCookiesPost => "collect_cookies_post",
            Phase::Teardown => "teardown",
        }
    }
}

/// Everything one domain crawl produced.
#[derive(Debug, Clone, Serialize)]
pub struct ConsentCrawl {
    pub domain: String,
    pub url: String,
    pub success: bool,
    pub cmp: Option<CmpKind>,
    pub cookies_before: Vec<Cookie>,
    pub cookies_after: Vec<Cookie>,
    pub declarations: Vec<ConsentDeclaration>,
    /// Selector of the accept control that was clicked.
    pub clicked: Option<String>,
    /// Terminal failure reason.
    pub error: Option<String>,
    /// Steps that degraded without ending the crawl.
    pub degraded: Vec<String>,
    /// Phases entered, in order.
    pub phases: Vec<Phase>,
    pub finished_at: DateTime<Utc>,
}

impl ConsentCrawl {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            url: browser_url(domain),
            success: false,
            cmp: None,
            cookies_before: Vec::new(),
            cookies_after: Vec::new(),
            declarations: Vec::new(),
            clicked: None,
            error: None,
            degraded: Vec::new(),
            phases: Vec::new(),
            finished_at: Utc::now(),
        }
    }

    fn enter(&mut self, phase: Phase) {
        debug!(domain = %self.domain, phase = phase.as_str(), "entering phase");
        self.phases.push(phase);
    }

    fn degrade(&mut self, phase: Phase, err: impl std::fmt::Display) {
        let err = CrawlError::ExtractionPartial {
            phase: phase.as_str().to_string(),
            message: err.to_string(),
        };
        warn!(domain = %self.domain, "{err}");
        self.degraded.push(err.to_string());
    }

    pub fn cmp_name(&self) -> &'static str {
        self.cmp.map(|c| c.as_str()).unwrap_or("unknown")
    }

    /// The crawl record to persist. Cookies collected is the post-interaction
    /// count.
    pub fn record(&self) -> NewCrawlRecord {
        NewCrawlRecord {
            domain: self.domain.clone(),
            timestamp: self.finished_at,
            success: self.success,
            cmp_type: Some(self.cmp_name().to_string()),
            cookies_collected: self.cookies_after.len() as u32,
            error_message: self.error.clone(),
        }
    }
}

/// Runs the phase sequence for one domain at a time.
pub struct ConsentExtractor {
    launcher: Arc<dyn BrowserLauncher>,
    registry: Arc<FingerprintRegistry>,
    config: ExtractorConfig,
}

impl ConsentExtractor {
    pub fn new(
        launcher: Arc<dyn BrowserLauncher>,
        registry: Arc<FingerprintRegistry>,
        config: ExtractorConfig,
    ) -> Self {
        Self {
            launcher,
            registry,
            config,
        }
    }

    pub fn config(&self) -> &ExtractorConfig {
        &self.config
    }

    /// Crawl one domain. Never fails: failures are recorded on the result.
    pub async fn crawl_domain(&self, domain: &str) -> ConsentCrawl {
        let mut crawl = ConsentCrawl::new(domain);
        info!(domain = %domain, "crawling domain");

        crawl.enter(Phase::Init);
        match self.launcher.launch().await {
            Ok(mut session) => {
                if let Err(reason) = self.drive(session.as_mut(), &mut crawl).await {
                    crawl.error = Some(reason);
                }
                crawl.enter(Phase::Teardown);
                if let Err(e) = session.close().await {
                    debug!(domain = %domain, "browser close failed: {e}");
                }
            }
            Err(e) => {
                crawl.error = Some(e.to_string());
                crawl.enter(Phase::Teardown);
            }
        }

        crawl.finished_at = Utc::now();
        match &crawl.error {
            None => info!(
                domain = %domain,
                cmp = crawl.cmp_name(),
                cookies = crawl.cookies_after.len(),
                "crawl succeeded"
            ),
            Some(reason) => warn!(domain = %domain, "failed to crawl: {reason}"),
        }
        crawl
    }

    /// NAVIGATE through COLLECT_COOKIES_POST. `Err` only for fatal phases.
    async fn drive(
        &self,
        session: &mut dyn BrowserSession,
        crawl: &mut ConsentCrawl,
    ) -> Result<(), String> {
        crawl.enter(Phase::Navigate);
        session
            .navigate(&crawl.url, self.config.page_load_timeout())
            .await
            .map_err(fatal_reason)?;

        crawl.enter(Phase::WaitLoad);
        session
            .wait_ready(self.config.ready_timeout())
            .await
            .map_err(fatal_reason)?;

        crawl.enter(Phase::DetectCmp);
        let source = match session.page_source().await {
            Ok(source) => source,
            Err(e) => {
                crawl.degrade(Phase::DetectCmp, e);
                String::new()
            }
        };
        crawl.cmp = self.registry.classify(&source);
        info!(domain = %crawl.domain, cmp = crawl.cmp_name(), "detected CMP");

        crawl.enter(Phase::ExtractDeclaredPurposes);
        crawl.declarations = scrapers::scrape(crawl.cmp, &source);

        crawl.enter(Phase::CollectCookiesPre);
        crawl.cookies_before = match session.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                crawl.degrade(Phase::CollectCookiesPre, e);
                Vec::new()
            }
        };

        crawl.enter(Phase::InteractConsent);
        self.interact(session, crawl).await;

        crawl.enter(Phase::CollectCookiesPost);
        crawl.cookies_after = match session.cookies().await {
            Ok(cookies) => cookies,
            Err(e) => {
                crawl.degrade(Phase::CollectCookiesPost, e);
                Vec::new()
            }
        };

        crawl.success = true;
        Ok(())
    }

    /// Click the first visible, enabled accept control, at most once.
    async fn interact(&self, session: &mut dyn BrowserSession, crawl: &mut ConsentCrawl) {
        for selector in &self.config.accept_selectors {
            let found = match session.query(selector).await {
                Ok(found) => found,
                Err(e) => {
                    crawl.degrade(Phase::InteractConsent, e);
                    continue;
                }
            };
            let Some(index) = found.iter().position(ElementState::clickable) else {
                continue;
            };

            match session.click(selector, index).await {
                Ok(()) => {
                    debug!(domain = %crawl.domain, selector = %selector, "clicked consent button");
                    crawl.clicked = Some(selector.clone());
                    tokio::time::sleep(self.config.settle_delay()).await;
                }
                Err(e) => crawl.degrade(Phase::InteractConsent, e),
            }
            return;
        }
        debug!(domain = %crawl.domain, "no consent banner interaction");
    }
}

/// Failure reason recorded for an aborted crawl.
fn fatal_reason(err: BrowserError) -> String {
    match err {
        BrowserError::Timeout(_) => "Page load timeout".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    /// Scripted page behaviour for [`FakeSession`].
    #[derive(Clone, Default)]
    pub struct FakePage {
        pub html: String,
        pub navigate_error: Option<fn() -> BrowserError>,
        pub never_ready: bool,
        pub elements: HashMap<String, Vec<ElementState>>,
        pub cookies_before: Vec<Cookie>,
        /// Cookies added by a successful click.
        pub cookies_on_accept: Vec<Cookie>,
        pub broken_cookie_jar: bool,
        /// How long `navigate` takes.
        pub navigate_delay: Duration,
    }

    #[derive(Default)]
    pub struct Calls {
        pub clicks: Vec<(String, usize)>,
        pub closed: usize,
        pub launched: usize,
        /// `("launch" | "close", when)` in call order.
        pub events: Vec<(&'static str, Instant)>,
    }

    pub struct FakeSession {
        page: FakePage,
        accepted: bool,
        calls: Arc<Mutex<Calls>>,
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, _url: &str, _timeout: Duration) -> Result<(), BrowserError> {
            if !self.page.navigate_delay.is_zero() {
                tokio::time::sleep(self.page.navigate_delay).await;
            }
            match self.page.navigate_error {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }

        async fn wait_ready(&mut self, timeout: Duration) -> Result<(), BrowserError> {
            if self.page.never_ready {
                Err(BrowserError::Timeout(timeout))
            } else {
                Ok(())
            }
        }

        async fn page_source(&mut self) -> Result<String, BrowserError> {
            Ok(self.page.html.clone())
        }

        async fn query(&mut self, selector: &str) -> Result<Vec<ElementState>, BrowserError> {
            Ok(self.page.elements.get(selector).cloned().unwrap_or_default())
        }

        async fn click(&mut self, selector: &str, index: usize) -> Result<(), BrowserError> {
            self.calls
                .lock()
                .unwrap()
                .clicks
                .push((selector.to_string(), index));
            self.accepted = true;
            Ok(())
        }

        async fn cookies(&mut self) -> Result<Vec<Cookie>, BrowserError> {
            if self.page.broken_cookie_jar {
                return Err(BrowserError::Protocol("cookie jar unavailable".into()));
            }
            let mut jar = self.page.cookies_before.clone();
            if self.accepted {
                jar.extend(self.page.cookies_on_accept.iter().cloned());
            }
            Ok(jar)
        }

        async fn close(self: Box<Self>) -> Result<(), BrowserError> {
            let mut calls = self.calls.lock().unwrap();
            calls.closed += 1;
            calls.events.push(("close", Instant::now()));
            Ok(())
        }
    }

    /// Serves the same [`FakePage`] to every session.
    pub struct FakeLauncher {
        pub page: FakePage,
        pub fail_launch: bool,
        pub calls: Arc<Mutex<Calls>>,
    }

    impl FakeLauncher {
        pub fn new(page: FakePage) -> Arc<Self> {
            Arc::new(Self {
                page,
                fail_launch: false,
                calls: Arc::new(Mutex::new(Calls::default())),
            })
        }
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
            {
                let mut calls = self.calls.lock().unwrap();
                calls.launched += 1;
                calls.events.push(("launch", Instant::now()));
            }
            if self.fail_launch {
                return Err(BrowserError::Launch("no browser".into()));
            }
            Ok(Box::new(FakeSession {
                page: self.page.clone(),
                accepted: false,
                calls: Arc::clone(&self.calls),
            }))
        }
    }

    pub fn cookie(name: &str) -> Cookie {
        Cookie {
            name: name.into(),
            domain: ".site.com".into(),
            value: "1".into(),
            path: "/".into(),
            expiry: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    pub fn fast_config() -> ExtractorConfig {
        ExtractorConfig {
            settle_delay_ms: 0,
            inter_crawl_delay_ms: 0,
            ..Default::default()
        }
    }

    fn extractor(launcher: Arc<FakeLauncher>) -> ConsentExtractor {
        ConsentExtractor::new(
            launcher,
            Arc::new(FingerprintRegistry::rendered().unwrap()),
            fast_config(),
        )
    }

    const ALL_PHASES: [Phase; 9] = [
        Phase::Init,
        Phase::Navigate,
        Phase::WaitLoad,
        Phase::DetectCmp,
        Phase::ExtractDeclaredPurposes,
        Phase::CollectCookiesPre,
        Phase::InteractConsent,
        Phase::CollectCookiesPost,
        Phase::Teardown,
    ];

    #[tokio::test]
    async fn test_no_accept_control_succeeds_unchanged() {
        let launcher = FakeLauncher::new(FakePage {
            html: "<p>plain</p>".into(),
            cookies_before: vec![cookie("a"), cookie("b")],
            cookies_on_accept: vec![cookie("c")],
            ..Default::default()
        });
        let crawl = extractor(launcher.clone()).crawl_domain("site.com").await;

        assert!(crawl.success);
        assert!(crawl.error.is_none());
        assert_eq!(crawl.cookies_before.len(), 2);
        assert_eq!(crawl.cookies_before.len(), crawl.cookies_after.len());
        assert!(crawl.clicked.is_none());
        assert_eq!(crawl.phases, ALL_PHASES);
        assert_eq!(crawl.url, "https://site.com");
        assert_eq!(crawl.record().cmp_type.as_deref(), Some("unknown"));
        assert_eq!(launcher.calls.lock().unwrap().closed, 1);
    }

    #[tokio::test]
    async fn test_first_clickable_selector_clicked_once() {
        let mut elements = HashMap::new();
        // hidden match on the first heuristic is skipped
        elements.insert(
            "[id*='accept']".to_string(),
            vec![ElementState { visible: false, enabled: true }],
        );
        elements.insert(
            "[class*='accept']".to_string(),
            vec![
                ElementState { visible: true, enabled: false },
                ElementState { visible: true, enabled: true },
            ],
        );
        elements.insert(
            "[id*='agree']".to_string(),
            vec![ElementState { visible: true, enabled: true }],
        );
        let launcher = FakeLauncher::new(FakePage {
            html: r#"<script src="https://consent.cookiebot.com/uc.js"></script>
                     <div data-cookiefirst-category="Marketing" data-cookiefirst-name="_fbp"
                          data-cookiefirst-domain=".site.com">Tracks visits</div>"#
                .into(),
            elements,
            cookies_before: vec![cookie("a")],
            cookies_on_accept: vec![cookie("_fbp")],
            ..Default::default()
        });
        let crawl = extractor(launcher.clone()).crawl_domain("site.com").await;

        assert!(crawl.success);
        assert_eq!(crawl.cmp, Some(CmpKind::Cookiebot));
        assert_eq!(crawl.declarations.len(), 1);
        assert_eq!(
            launcher.calls.lock().unwrap().clicks,
            vec![("[class*='accept']".to_string(), 1)]
        );
        assert_eq!(crawl.cookies_after.len(), 2);
        assert_eq!(crawl.record().cookies_collected, 2);
    }

    #[tokio::test]
    async fn test_navigation_timeout_is_terminal() {
        let launcher = FakeLauncher::new(FakePage {
            navigate_error: Some(|| BrowserError::Timeout(Duration::ZERO)),
            ..Default::default()
        });
        let crawl = extractor(launcher.clone()).crawl_domain("slow.com").await;

        assert!(!crawl.success);
        assert_eq!(crawl.error.as_deref(), Some("Page load timeout"));
        assert_eq!(crawl.phases, [Phase::Init, Phase::Navigate, Phase::Teardown]);
        assert_eq!(launcher.calls.lock().unwrap().closed, 1);
        let record = crawl.record();
        assert!(!record.success);
        assert_eq!(record.cookies_collected, 0);
    }

    #[tokio::test]
    async fn test_ready_wait_exceeded_is_terminal() {
        let launcher = FakeLauncher::new(FakePage {
            never_ready: true,
            ..Default::default()
        });
        let crawl = extractor(launcher).crawl_domain("stuck.com").await;
        assert!(!crawl.success);
        assert_eq!(
            crawl.phases,
            [Phase::Init, Phase::Navigate, Phase::WaitLoad, Phase::Teardown]
        );
    }

    #[tokio::test]
    async fn test_launch_failure_recorded() {
        let launcher = Arc::new(FakeLauncher {
            page: FakePage::default(),
            fail_launch: true,
            calls: Arc::new(Mutex::new(Calls::default())),
        });
        let crawl = extractor(launcher).crawl_domain("any.com").await;
        assert!(!crawl.success);
        assert_eq!(crawl.phases, [Phase::Init, Phase::Teardown]);
        assert!(crawl.error.unwrap().contains("no browser"));
    }

    #[tokio::test]
    async fn test_cookie_errors_degrade() {
        let launcher = FakeLauncher::new(FakePage {
            html: "<p>onetrust banner</p>".into(),
            broken_cookie_jar: true,
            ..Default::default()
        });
        let crawl = extractor(launcher).crawl_domain("site.com").await;
        assert!(crawl.success);
        assert_eq!(crawl.cmp, Some(CmpKind::OneTrust));
        assert!(crawl.cookies_after.is_empty());
        assert_eq!(crawl.degraded.len(), 2);
        assert!(crawl.degraded[0].contains("collect_cookies_pre"));
    }
}
