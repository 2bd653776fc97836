//! Single-attempt HTTP fetching for the presence probe.
//!
//! Not a browser. One GET per candidate URL, no retries. Every failure is
//! classified so the probe can decide whether another prefix is worth
//! trying.

use crate::config::ProbeConfig;
use crate::error::CrawlError;
use async_trait::async_trait;
use std::time::Duration;

/// Maximum redirects followed before the attempt counts as a scheme fault.
const MAX_REDIRECTS: usize = 30;

/// A response that reached the client, whatever its status.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested.
    pub url: String,
    /// URL after redirects.
    pub final_url: String,
    pub status: u16,
    pub body: String,
}

/// How a failed attempt affects the prefix loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchFailure {
    /// TLS, scheme, URL or redirect-loop fault: stop, CONNECT_FAIL.
    Fatal,
    /// Connection refused/reset, DNS, connect or read timeout: next prefix.
    Transient,
    /// Anything else: stop, CONNECT_FAIL.
    Unexpected,
}

/// A failed attempt.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{kind:?} failure fetching {url}: {message}")]
pub struct FetchError {
    pub kind: FetchFailure,
    pub url: String,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchFailure, url: &str, message: impl Into<String>) -> Self {
        Self {
            kind,
            url: url.to_string(),
            message: message.into(),
        }
    }
}

/// One GET attempt against one URL.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// reqwest-backed fetcher with split connect/read timeouts.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &ProbeConfig) -> Result<Self, CrawlError> {
        Self::with_timeouts(
            config.connect_timeout(),
            config.read_timeout(),
            &config.user_agent,
        )
    }

    pub fn with_timeouts(
        connect_timeout: Duration,
        read_timeout: Duration,
        user_agent: &str,
    ) -> Result<Self, CrawlError> {
        let client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(user_agent)
            .build()
            .map_err(|e| CrawlError::Client(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::new(classify(&e), url, error_chain(&e)))?;

        let status = resp.status().as_u16();
        let final_url = resp.url().to_string();
        let body = resp
            .text()
            .await
            .map_err(|e| FetchError::new(classify(&e), url, error_chain(&e)))?;

        Ok(FetchedPage {
            url: url.to_string(),
            final_url,
            status,
            body,
        })
    }
}

/// Map a reqwest error onto the prefix-loop policy.
pub fn classify(err: &reqwest::Error) -> FetchFailure {
    if err.is_redirect() || err.is_builder() || is_tls_fault(err) {
        FetchFailure::Fatal
    } else if err.is_connect() || err.is_timeout() || err.is_request() {
        FetchFailure::Transient
    } else {
        FetchFailure::Unexpected
    }
}

/// TLS failures surface as connect errors. The TLS layer reports them as
/// `InvalidData` I/O errors somewhere in the source chain; the messages are
/// never inspected since they embed the requested URL.
fn is_tls_fault(err: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        if let Some(io) = inner.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::InvalidData {
                return true;
            }
        }
        source = inner.source();
    }
    false
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ")
}
