//! Chromium sessions via chromiumoxide.

use super::browser::{BrowserError, BrowserLauncher, BrowserSession, ElementState};
use crate::config::ExtractorConfig;
use crate::types::Cookie;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::{Cookie as CdpCookie, CookieSameSite};
use chromiumoxide::page::Page;
use futures::StreamExt;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::debug;

/// Interval between `document.readyState` polls.
const READY_POLL: Duration = Duration::from_millis(250);

/// Find the Chromium binary path.
pub fn find_chromium() -> Option<PathBuf> {
    if let Ok(p) = std::env::var("CONSENT_CRAWLER_CHROMIUM") {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
    }

    for name in ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    if cfg!(target_os = "macos") {
        let common =
            PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Launches one Chromium process per session, each with its own profile.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    executable: PathBuf,
    headless: bool,
    request_timeout: Duration,
}

impl ChromiumLauncher {
    pub fn new(config: &ExtractorConfig) -> Result<Self, BrowserError> {
        let executable = config
            .chromium_path
            .clone()
            .or_else(find_chromium)
            .ok_or_else(|| {
                BrowserError::Launch(
                    "Chromium not found. Install Chrome/Chromium or set CONSENT_CRAWLER_CHROMIUM."
                        .into(),
                )
            })?;
        Ok(Self {
            executable,
            headless: config.headless,
            request_timeout: config.page_load_timeout(),
        })
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let profile = std::env::temp_dir().join(format!("consent-crawler-{}", uuid::Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .chrome_executable(&self.executable)
            .user_data_dir(&profile)
            .request_timeout(self.request_timeout)
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            // no tracking protection or third-party cookie blocking
            .arg("--disable-features=TrackingProtection3pcd,ThirdPartyStoragePartitioning");
        if !self.headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                let _ = std::fs::remove_dir_all(&profile);
                return Err(BrowserError::Launch(format!("failed to create page: {e}")));
            }
        };

        debug!(profile = %profile.display(), "chromium session started");
        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler,
            profile,
        }))
    }
}

/// One Chromium process with a single tab.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
    profile: PathBuf,
}

#[derive(Deserialize)]
struct ElementProbe {
    visible: bool,
    enabled: bool,
}

impl ChromiumSession {
    async fn eval<T: serde::de::DeserializeOwned>(&self, script: String) -> Result<T, BrowserError> {
        eval_on(&self.page, script).await
    }
}

async fn eval_on<T: serde::de::DeserializeOwned>(page: &Page, script: String) -> Result<T, BrowserError> {
    page.evaluate(script)
        .await
        .map_err(|e| BrowserError::Script(e.to_string()))?
        .into_value()
        .map_err(|e| BrowserError::Script(format!("failed to convert JS result: {e}")))
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(BrowserError::Navigation(e.to_string())),
            Err(_) => Err(BrowserError::Timeout(timeout)),
        }
    }

    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), BrowserError> {
        let page = &self.page;
        poll_ready(timeout, READY_POLL, || async move {
            let state: String = eval_on(page, "document.readyState".to_string()).await?;
            Ok(state == "complete")
        })
        .await
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn query(&mut self, selector: &str) -> Result<Vec<ElementState>, BrowserError> {
        let selector = serde_json::to_string(selector)
            .map_err(|e| BrowserError::Script(e.to_string()))?;
        let script = format!(
            "Array.from(document.querySelectorAll({selector})).map(e => {{
                const r = e.getBoundingClientRect();
                const s = window.getComputedStyle(e);
                return {{
                    visible: r.width > 0 && r.height > 0
                        && s.visibility !== 'hidden' && s.display !== 'none',
                    enabled: !e.disabled
                }};
            }})"
        );
        let found: Vec<ElementProbe> = self.eval(script).await?;
        Ok(found
            .into_iter()
            .map(|p| ElementState {
                visible: p.visible,
                enabled: p.enabled,
            })
            .collect())
    }

    async fn click(&mut self, selector: &str, index: usize) -> Result<(), BrowserError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        let element = elements.get(index).ok_or_else(|| {
            BrowserError::Protocol(format!("no element {index} for selector {selector}"))
        })?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(())
    }

    async fn cookies(&mut self) -> Result<Vec<Cookie>, BrowserError> {
        let cookies = self
            .page
            .get_cookies()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))?;
        Ok(cookies.into_iter().map(from_cdp).collect())
    }

    async fn close(mut self: Box<Self>) -> Result<(), BrowserError> {
        let _ = self.page.clone().close().await;
        let closed = self.browser.close().await;
        let _ = self.browser.wait().await;
        self.handler.abort();
        let _ = std::fs::remove_dir_all(&self.profile);
        closed
            .map(|_| ())
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}

fn from_cdp(c: CdpCookie) -> Cookie {
    Cookie {
        expiry: (!c.session && c.expires > 0.0).then(|| c.expires as i64),
        same_site: c.same_site.map(|s| {
            match s {
                CookieSameSite::Strict => "Strict",
                CookieSameSite::Lax => "Lax",
                CookieSameSite::None => "None",
            }
            .to_string()
        }),
        name: c.name,
        domain: c.domain,
        value: c.value,
        path: c.path,
        secure: c.secure,
        http_only: c.http_only,
    }
}

/// Poll `check` until it reports ready or `timeout` passes. A failing check
/// counts as not ready yet: evaluation errors while a navigation commits are
/// expected and transient.
async fn poll_ready<F, Fut>(
    timeout: Duration,
    interval: Duration,
    mut check: F,
) -> Result<(), BrowserError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<bool, BrowserError>>,
{
    let start = Instant::now();
    loop {
        match check().await {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) => debug!("readiness check failed, retrying: {e}"),
        }
        if start.elapsed() >= timeout {
            return Err(BrowserError::Timeout(timeout));
        }
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn test_poll_ready_retries_past_eval_errors() {
        let attempts = Cell::new(0);
        let result = poll_ready(Duration::from_secs(2), Duration::from_millis(10), || {
            attempts.set(attempts.get() + 1);
            let n = attempts.get();
            async move {
                match n {
                    1 | 2 => Err(BrowserError::Script("execution context destroyed".into())),
                    3 => Ok(false),
                    _ => Ok(true),
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.get(), 4);
    }

    #[tokio::test]
    async fn test_poll_ready_times_out_on_persistent_errors() {
        let result = poll_ready(Duration::from_millis(100), Duration::from_millis(10), || async {
            Err(BrowserError::Script("no page".into()))
        })
        .await;
        assert!(matches!(result, Err(BrowserError::Timeout(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_session_reads_cookies() {
        let config = ExtractorConfig {
            headless: true,
            ..Default::default()
        };
        let launcher = ChromiumLauncher::new(&config).expect("chromium not found");
        let mut session = launcher.launch().await.expect("launch failed");

        session
            .navigate(
                "data:text/html,<button id='accept-all'>OK</button>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");
        session
            .wait_ready(Duration::from_secs(5))
            .await
            .expect("page never became ready");

        let found = session.query("[id*='accept']").await.expect("query failed");
        assert_eq!(found.len(), 1);
        assert!(found[0].clickable());
        session.click("[id*='accept']", 0).await.expect("click failed");

        assert!(session.page_source().await.unwrap().contains("accept-all"));
        session.close().await.expect("close failed");
    }
}
