//! Subscriber setup. Logs always go to stderr so the worker's stdout
//! carries nothing but its report.

use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "consent_crawler=info,consent_crawler_cli=info";
const VERBOSE_FILTER: &str = "consent_crawler=debug,consent_crawler_cli=debug";

/// `RUST_LOG` wins over `--verbose`, which wins over the default.
pub fn init(verbose: bool, json: bool) {
    let fallback = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
