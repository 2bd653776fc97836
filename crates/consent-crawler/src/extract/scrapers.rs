//! Declared-purpose scrapers, one per CMP that publishes a cookie table in
//! markup. They parse the rendered page source so they can be exercised
//! without a browser.

use crate::types::{CmpKind, ConsentDeclaration};
use scraper::{ElementRef, Html, Selector};
use std::sync::LazyLock;
use tracing::{debug, error};

const UNKNOWN: &str = "unknown";
const NO_DESCRIPTION: &str = "No description";

struct Selectors {
    cookiebot_entry: Selector,
    onetrust_entry: Selector,
    onetrust_name: Selector,
    onetrust_category: Selector,
    onetrust_description: Selector,
}

impl Selectors {
    fn compile() -> Result<Self, String> {
        let parse = |css: &'static str| Selector::parse(css).map_err(|e| format!("{css}: {e}"));
        Ok(Self {
            cookiebot_entry: parse("[data-cookiefirst-category]")?,
            onetrust_entry: parse(".ot-sdk-cookie")?,
            onetrust_name: parse(".ot-sdk-cookie-policy-name")?,
            onetrust_category: parse(".ot-sdk-cookie-policy-category")?,
            onetrust_description: parse(".ot-sdk-cookie-policy-description")?,
        })
    }
}

static SELECTORS: LazyLock<Result<Selectors, String>> = LazyLock::new(Selectors::compile);

/// Declarations published by `cmp` on the page. CMPs without a scraper,
/// and pages without a detected CMP, yield nothing.
pub fn scrape(cmp: Option<CmpKind>, html: &str) -> Vec<ConsentDeclaration> {
    let sel = match SELECTORS.as_ref() {
        Ok(sel) => sel,
        Err(e) => {
            error!("declaration selectors failed to compile: {e}");
            return Vec::new();
        }
    };
    let declarations = match cmp {
        Some(CmpKind::Cookiebot) => cookiebot(sel, &Html::parse_document(html)),
        Some(CmpKind::OneTrust) => onetrust(sel, &Html::parse_document(html)),
        Some(CmpKind::Termly) | None => Vec::new(),
    };
    debug!(cmp = ?cmp, found = declarations.len(), "declared purposes scraped");
    declarations
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<String>().trim().to_string()
}

fn attr_or(el: ElementRef<'_>, name: &str, fallback: &str) -> String {
    el.value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

fn non_empty_or(text: String, fallback: &str) -> String {
    if text.is_empty() {
        fallback.to_string()
    } else {
        text
    }
}

/// Entries annotated with `data-cookiefirst-*` attributes.
fn cookiebot(sel: &Selectors, doc: &Html) -> Vec<ConsentDeclaration> {
    doc.select(&sel.cookiebot_entry)
        .map(|el| ConsentDeclaration {
            cookie_name: attr_or(el, "data-cookiefirst-name", UNKNOWN),
            cookie_domain: attr_or(el, "data-cookiefirst-domain", UNKNOWN),
            purpose_category: attr_or(el, "data-cookiefirst-category", UNKNOWN),
            purpose_description: non_empty_or(text_of(el), NO_DESCRIPTION),
            cmp_type: CmpKind::Cookiebot.as_str().to_string(),
        })
        .collect()
}

/// Cookie-list blocks. A block missing its name, category or description
/// child is skipped.
fn onetrust(sel: &Selectors, doc: &Html) -> Vec<ConsentDeclaration> {
    doc.select(&sel.onetrust_entry)
        .filter_map(|block| {
            let child = |css: &Selector| block.select(css).next().map(text_of);
            let (Some(name), Some(category), Some(description)) = (
                child(&sel.onetrust_name),
                child(&sel.onetrust_category),
                child(&sel.onetrust_description),
            ) else {
                debug!("skipping incomplete OneTrust cookie block");
                return None;
            };
            Some(ConsentDeclaration {
                cookie_name: non_empty_or(name, UNKNOWN),
                cookie_domain: attr_or(block, "data-domain", UNKNOWN),
                purpose_category: non_empty_or(category, UNKNOWN),
                purpose_description: non_empty_or(description, NO_DESCRIPTION),
                cmp_type: CmpKind::OneTrust.as_str().to_string(),
            })
        })
        .collect()
}
