//! CMP fingerprint registry: an immutable, ordered list of
//! `(cmp, pattern)` signatures shared by the presence probe and the
//! consent extractor.
//!
//! Signatures are kept sorted by [`CmpKind::PRECEDENCE`], so the first
//! matching signature always names the winning family: a page carrying both
//! Cookiebot and OneTrust markers is Cookiebot.

use crate::types::CmpKind;
use regex::{Regex, RegexBuilder};

/// Cookiebot CDN domain and loader script.
const COOKIEBOT_PATTERNS: &[&str] = &[r"https://consent\.cookiebot\.(com|eu)/", r"cb-main\.js"];

/// OneTrust CDN hosts, including the CookiePro and Optanon legacy hosts.
const ONETRUST_PATTERNS: &[&str] = &[
    r"https://cdn-apac\.onetrust\.com",
    r"https://cdn-ukwest\.onetrust\.com",
    r"https://cmp-cdn\.cookielaw\.org",
    r"https://cdn\.cookielaw\.org",
    r"https://optanon\.blob\.core\.windows\.net",
    r"https://cookie-cdn\.cookiepro\.com",
    r"https://cookiepro\.blob\.core\.windows\.net",
];

const TERMLY_PATTERNS: &[&str] = &[r"https://app\.termly\.io/"];

/// Vendor names that show up in a rendered DOM even when the loader URL is
/// proxied or inlined.
const RENDERED_MARKERS: &[(CmpKind, &str)] = &[
    (CmpKind::Cookiebot, "cookiebot"),
    (CmpKind::OneTrust, "onetrust"),
    (CmpKind::OneTrust, "cookielaw"),
    (CmpKind::OneTrust, "optanon"),
    (CmpKind::OneTrust, "cookiepro"),
    (CmpKind::Termly, "termly"),
];

/// One compiled signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub cmp: CmpKind,
    pattern: Regex,
}

impl Signature {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, haystack: &str) -> bool {
        self.pattern.is_match(haystack)
    }
}

/// Ordered signature set. Read-only after construction.
#[derive(Debug, Clone)]
pub struct FingerprintRegistry {
    signatures: Vec<Signature>,
}

impl FingerprintRegistry {
    /// Build a registry from raw `(cmp, regex)` pairs. Patterns match
    /// case-insensitively; order within a family is preserved.
    pub fn from_patterns<'a, I>(entries: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (CmpKind, &'a str)>,
    {
        let mut signatures = entries
            .into_iter()
            .map(|(cmp, raw)| {
                RegexBuilder::new(raw)
                    .case_insensitive(true)
                    .build()
                    .map(|pattern| Signature { cmp, pattern })
            })
            .collect::<Result<Vec<_>, _>>()?;
        // stable: keeps declaration order inside a family
        signatures.sort_by_key(|s| s.cmp.precedence());
        Ok(Self { signatures })
    }

    /// CDN/script signatures used against raw HTTP bodies.
    pub fn presence() -> Result<Self, regex::Error> {
        Self::from_patterns(cdn_patterns())
    }

    /// CDN signatures plus vendor-name markers, for fully rendered pages.
    pub fn rendered() -> Result<Self, regex::Error> {
        let markers = RENDERED_MARKERS.iter().map(|&(cmp, m)| (cmp, m));
        Self::from_patterns(cdn_patterns().chain(markers))
    }

    /// First family (in precedence order) with a matching signature.
    pub fn classify(&self, body: &str) -> Option<CmpKind> {
        self.signatures
            .iter()
            .find(|s| s.is_match(body))
            .map(|s| s.cmp)
    }

    pub fn signatures(&self) -> &[Signature] {
        &self.signatures
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}

fn cdn_patterns() -> impl Iterator<Item = (CmpKind, &'static str)> {
    let cookiebot = COOKIEBOT_PATTERNS.iter().map(|p| (CmpKind::Cookiebot, *p));
    let onetrust = ONETRUST_PATTERNS.iter().map(|p| (CmpKind::OneTrust, *p));
    let termly = TERMLY_PATTERNS.iter().map(|p| (CmpKind::Termly, *p));
    cookiebot.chain(onetrust).chain(termly)
}
