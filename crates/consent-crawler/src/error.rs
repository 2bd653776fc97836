//! Error taxonomy for crawling, extraction and persistence.

use crate::types::ProbeOutcome;

/// Errors that can occur anywhere in the crawler core.
#[derive(thiserror::Error, Debug)]
pub enum CrawlError {
    /// Scheme/TLS fault, or every candidate URL failed to connect.
    #[error("Connect failed: {0}")]
    ConnectFail(String),

    /// Connect, read, page-load or task-level timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Non-2xx response that is not a bot block.
    #[error("HTTP error: status {0}")]
    HttpError(u16),

    /// 403 or 406 response.
    #[error("Blocked as bot: status {0}")]
    BotBlocked(u16),

    /// A probe worker process died or produced unusable output.
    #[error("Worker crashed: {0}")]
    WorkerCrash(String),

    /// A consent-extraction sub-step failed; the session carried on.
    #[error("Extraction step '{phase}' degraded: {message}")]
    ExtractionPartial { phase: String, message: String },

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("HTTP client error: {0}")]
    Client(String),

    #[error("Store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CrawlError {
    /// The presence bucket this error lands a domain in.
    pub fn outcome(&self) -> ProbeOutcome {
        match self {
            CrawlError::Timeout(_) | CrawlError::WorkerCrash(_) => ProbeOutcome::Timeout,
            CrawlError::HttpError(_) => ProbeOutcome::HttpError,
            CrawlError::BotBlocked(_) => ProbeOutcome::Bot,
            CrawlError::ConnectFail(_)
            | CrawlError::ExtractionPartial { .. }
            | CrawlError::Browser(_)
            | CrawlError::Client(_)
            | CrawlError::Store(_)
            | CrawlError::Io(_)
            | CrawlError::Json(_)
            | CrawlError::InvalidInput(_) => ProbeOutcome::ConnectFail,
        }
    }
}

/// Convenience result type.
pub type Result<T, E = CrawlError> = std::result::Result<T, E>;
