//! Core data types shared by the probe, the extractor, the store and the matcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Code used for "unknown" in every exported code table.
pub const UNKNOWN_CODE: i32 = -1;

/// A supported consent management platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CmpKind {
    Cookiebot,
    OneTrust,
    Termly,
}

impl CmpKind {
    /// Detection precedence shared by every classifier: first match wins.
    pub const PRECEDENCE: [CmpKind; 3] = [CmpKind::Cookiebot, CmpKind::OneTrust, CmpKind::Termly];

    pub fn as_str(&self) -> &'static str {
        match self {
            CmpKind::Cookiebot => "cookiebot",
            CmpKind::OneTrust => "onetrust",
            CmpKind::Termly => "termly",
        }
    }

    /// Stable export code: 0 cookiebot, 1 onetrust, 2 termly.
    pub fn code(&self) -> i32 {
        match self {
            CmpKind::Cookiebot => 0,
            CmpKind::OneTrust => 1,
            CmpKind::Termly => 2,
        }
    }

    /// Parse a stored CMP identifier. Anything unrecognised is `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cookiebot" => Some(CmpKind::Cookiebot),
            "onetrust" => Some(CmpKind::OneTrust),
            "termly" => Some(CmpKind::Termly),
            _ => None,
        }
    }

    /// Position in [`CmpKind::PRECEDENCE`].
    pub fn precedence(&self) -> usize {
        match self {
            CmpKind::Cookiebot => 0,
            CmpKind::OneTrust => 1,
            CmpKind::Termly => 2,
        }
    }
}

impl std::fmt::Display for CmpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalise a free-text CMP identifier to its export code (-1 for unknown).
pub fn cmp_code(cmp_type: Option<&str>) -> i32 {
    cmp_type
        .and_then(CmpKind::from_name)
        .map(|c| c.code())
        .unwrap_or(UNKNOWN_CODE)
}

/// The classification of a single presence probe. Exactly one per domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ProbeOutcome {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "CONNECT_FAIL")]
    ConnectFail,
    #[serde(rename = "HTTP_ERROR")]
    HttpError,
    #[serde(rename = "BOT")]
    Bot,
    #[serde(rename = "TIMEOUT")]
    Timeout,
    #[serde(rename = "NOCMP")]
    NoCmp,
    #[serde(rename = "COOKIEBOT")]
    Cookiebot,
    #[serde(rename = "ONETRUST")]
    OneTrust,
    #[serde(rename = "TERMLY")]
    Termly,
}

impl ProbeOutcome {
    pub const ALL: [ProbeOutcome; 9] = [
        ProbeOutcome::Cookiebot,
        ProbeOutcome::OneTrust,
        ProbeOutcome::Termly,
        ProbeOutcome::NoCmp,
        ProbeOutcome::Ok,
        ProbeOutcome::ConnectFail,
        ProbeOutcome::HttpError,
        ProbeOutcome::Bot,
        ProbeOutcome::Timeout,
    ];

    /// Upper-case label, as persisted in `error_message` for failures.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok => "OK",
            ProbeOutcome::ConnectFail => "CONNECT_FAIL",
            ProbeOutcome::HttpError => "HTTP_ERROR",
            ProbeOutcome::Bot => "BOT",
            ProbeOutcome::Timeout => "TIMEOUT",
            ProbeOutcome::NoCmp => "NOCMP",
            ProbeOutcome::Cookiebot => "COOKIEBOT",
            ProbeOutcome::OneTrust => "ONETRUST",
            ProbeOutcome::Termly => "TERMLY",
        }
    }

    /// Name of the summary bucket a domain with this outcome is counted in.
    pub fn bucket(&self) -> &'static str {
        match self {
            ProbeOutcome::Ok => "ok",
            ProbeOutcome::ConnectFail => "failed",
            ProbeOutcome::HttpError => "http_error",
            ProbeOutcome::Bot => "bot",
            ProbeOutcome::Timeout => "timeout",
            ProbeOutcome::NoCmp => "nocmp",
            ProbeOutcome::Cookiebot => "cookiebot",
            ProbeOutcome::OneTrust => "onetrust",
            ProbeOutcome::Termly => "termly",
        }
    }

    pub fn from_cmp(cmp: CmpKind) -> Self {
        match cmp {
            CmpKind::Cookiebot => ProbeOutcome::Cookiebot,
            CmpKind::OneTrust => ProbeOutcome::OneTrust,
            CmpKind::Termly => ProbeOutcome::Termly,
        }
    }

    pub fn cmp(&self) -> Option<CmpKind> {
        match self {
            ProbeOutcome::Cookiebot => Some(CmpKind::Cookiebot),
            ProbeOutcome::OneTrust => Some(CmpKind::OneTrust),
            ProbeOutcome::Termly => Some(CmpKind::Termly),
            ProbeOutcome::Ok
            | ProbeOutcome::ConnectFail
            | ProbeOutcome::HttpError
            | ProbeOutcome::Bot
            | ProbeOutcome::Timeout
            | ProbeOutcome::NoCmp => None,
        }
    }

    /// Whether the site answered with a 2xx page.
    pub fn is_reachable(&self) -> bool {
        match self {
            ProbeOutcome::Ok
            | ProbeOutcome::NoCmp
            | ProbeOutcome::Cookiebot
            | ProbeOutcome::OneTrust
            | ProbeOutcome::Termly => true,
            ProbeOutcome::ConnectFail
            | ProbeOutcome::HttpError
            | ProbeOutcome::Bot
            | ProbeOutcome::Timeout => false,
        }
    }
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of probing one domain: the URL that answered (or the original
/// input when nothing did) and its classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub input: String,
    pub url: String,
    pub outcome: ProbeOutcome,
}

/// A cookie as read from a browser session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub domain: String,
    pub value: String,
    pub path: String,
    /// Unix seconds; `None` for session cookies.
    pub expiry: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<String>,
}

/// A cookie purpose declared by a CMP on the crawled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentDeclaration {
    pub cookie_name: String,
    pub cookie_domain: String,
    /// Free-text category as the CMP prints it.
    pub purpose_category: String,
    pub purpose_description: String,
    pub cmp_type: String,
}

/// A crawl outcome ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCrawlRecord {
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub cmp_type: Option<String>,
    pub cookies_collected: u32,
    pub error_message: Option<String>,
}

impl NewCrawlRecord {
    /// Record for a presence probe: reachable outcomes count as success.
    pub fn from_probe(report: &ProbeReport) -> Self {
        let success = report.outcome.is_reachable();
        Self {
            domain: report.input.clone(),
            timestamp: Utc::now(),
            success,
            cmp_type: Some(
                report
                    .outcome
                    .cmp()
                    .map(|c| c.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
            ),
            cookies_collected: 0,
            error_message: (!success).then(|| report.outcome.label().to_string()),
        }
    }
}

/// A persisted crawl record. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRecord {
    pub id: i64,
    pub domain: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub cmp_type: Option<String>,
    pub cookies_collected: u32,
    pub error_message: Option<String>,
}

/// A persisted cookie row owned by a crawl record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCookie {
    pub id: i64,
    pub crawl_id: i64,
    pub cookie: Cookie,
}

/// A persisted declaration row owned by a crawl record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDeclaration {
    pub id: i64,
    pub crawl_id: i64,
    pub declaration: ConsentDeclaration,
}
