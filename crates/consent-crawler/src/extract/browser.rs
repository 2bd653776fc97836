//! Narrow browser capability used by the extraction state machine.
//!
//! A session is one independent browser (own profile, own cookie jar) that
//! is driven strictly sequentially by a single crawl.

use crate::error::CrawlError;
use crate::types::Cookie;
use async_trait::async_trait;
use std::time::Duration;

#[derive(thiserror::Error, Debug)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("script evaluation failed: {0}")]
    Script(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl From<BrowserError> for CrawlError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Timeout(d) => CrawlError::Timeout(format!("browser step exceeded {d:?}")),
            other => CrawlError::Browser(other.to_string()),
        }
    }
}

/// Visibility and interactivity of one element matched by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ElementState {
    pub visible: bool,
    pub enabled: bool,
}

impl ElementState {
    pub fn clickable(&self) -> bool {
        self.visible && self.enabled
    }
}

/// A single live browser session.
#[async_trait]
pub trait BrowserSession: Send {
    /// Open `url`, failing if the load does not finish within `timeout`.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), BrowserError>;

    /// Block until the document reports ready.
    async fn wait_ready(&mut self, timeout: Duration) -> Result<(), BrowserError>;

    /// Serialized DOM of the rendered page.
    async fn page_source(&mut self) -> Result<String, BrowserError>;

    /// Elements matching a CSS selector, in document order.
    async fn query(&mut self, selector: &str) -> Result<Vec<ElementState>, BrowserError>;

    /// Click the `index`-th element matching `selector`.
    async fn click(&mut self, selector: &str, index: usize) -> Result<(), BrowserError>;

    async fn cookies(&mut self) -> Result<Vec<Cookie>, BrowserError>;

    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Starts fresh sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}
