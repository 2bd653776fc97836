//! Turns a submitted domain into the ordered URLs a probe attempts.

/// Prefixes tried, in order, for a domain without a scheme.
pub const PREFIXES: [&str; 3] = ["https://www.", "https://", "http://"];

/// Whether `input` already names an http(s) URL.
pub fn has_scheme(input: &str) -> bool {
    url::Url::parse(input)
        .map(|u| matches!(u.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Candidate URLs for `input`, in attempt order.
///
/// A schemed input is attempted as-is and nothing else. Otherwise a leading
/// `www.` is stripped and the three [`PREFIXES`] are applied.
pub fn candidate_urls(input: &str) -> Vec<String> {
    let input = input.trim();
    if has_scheme(input) {
        return vec![input.to_string()];
    }
    let host = input.strip_prefix("www.").unwrap_or(input);
    PREFIXES.iter().map(|prefix| format!("{prefix}{host}")).collect()
}

/// The single URL a browser session opens for `input`.
pub fn browser_url(input: &str) -> String {
    let input = input.trim();
    if input.starts_with("http://") || input.starts_with("https://") {
        input.to_string()
    } else {
        format!("https://{input}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemed_input_single_candidate() {
        assert_eq!(candidate_urls("https://example.com/a"), vec!["https://example.com/a"]);
        assert_eq!(candidate_urls("http://www.example.com"), vec!["http://www.example.com"]);
    }

    #[test]
    fn test_bare_domain_prefix_order() {
        assert_eq!(
            candidate_urls("example.com"),
            vec![
                "https://www.example.com",
                "https://example.com",
                "http://example.com",
            ]
        );
    }

    #[test]
    fn test_www_stripped_once() {
        assert_eq!(
            candidate_urls("www.example.com"),
            vec![
                "https://www.example.com",
                "https://example.com",
                "http://example.com",
            ]
        );
    }

    #[test]
    fn test_non_http_scheme_gets_prefixes() {
        // parses as scheme "localhost", which is not http(s)
        assert_eq!(candidate_urls("localhost:8080").len(), 3);
        assert!(!has_scheme("ftp://example.com"));
    }

    #[test]
    fn test_browser_url() {
        assert_eq!(browser_url("example.com"), "https://example.com");
        assert_eq!(browser_url("http://example.com"), "http://example.com");
    }
}
