//! consent-crawler: CMP presence probing, consent extraction and
//! cookie-purpose matching from the command line.

mod input;
mod logging;
mod output;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use tracing::{error, info, warn};

use consent_crawler::extract::{ChromiumLauncher, ConsentCrawler, ConsentExtractor};
use consent_crawler::matcher::{self, consistency_report, matching_analysis};
use consent_crawler::probe::http::HttpFetcher;
use consent_crawler::probe::pool::{
    InProcessExecutor, PresencePool, ProbeExecutor, SubprocessExecutor,
};
use consent_crawler::probe::Prober;
use consent_crawler::store::{CrawlStore, SqliteStore};
use consent_crawler::{
    shutdown, ExtractorConfig, FingerprintRegistry, MatchConfig, NewCrawlRecord, ProbeConfig,
    Shutdown,
};

const DEFAULT_DB: &str = "data/crawl_data.db";

#[derive(Parser)]
#[command(
    name = "consent-crawler",
    about = "Measure cookie consent: CMP presence, consent extraction and cookie-purpose matching",
    version
)]
struct Cli {
    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where the domains to crawl come from.
#[derive(Args, Debug)]
struct DomainArgs {
    /// Domain or URL to crawl. Repeatable.
    #[arg(short = 'u', long = "url")]
    urls: Vec<String>,

    /// File with one domain per line. Repeatable.
    #[arg(short = 'f', long = "file")]
    files: Vec<PathBuf>,
}

impl DomainArgs {
    fn collect(&self) -> Result<Vec<String>> {
        let domains = input::collect_domains(&self.urls, &self.files)?;
        anyhow::ensure!(
            !domains.is_empty(),
            "no valid domains to crawl, pass -u <domain> or -f <file>"
        );
        Ok(domains)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Classify CMP presence from plain HTTP responses.
    Presence {
        #[command(flatten)]
        domains: DomainArgs,

        /// Number of parallel worker processes.
        #[arg(short = 'n', long = "numthreads")]
        workers: usize,

        /// Number of batches to split the input into.
        #[arg(short, long, default_value_t = 1)]
        batches: usize,

        /// Report reachable sites as OK without fingerprinting.
        #[arg(long)]
        no_cmp_check: bool,

        /// Probe inside this process instead of one worker process per domain.
        #[arg(long)]
        in_process: bool,

        /// Also record one crawl row per domain in this database.
        #[arg(long)]
        db: Option<PathBuf>,

        /// Base directory for the timestamped result directory.
        #[arg(short, long, default_value = "data/results")]
        output: PathBuf,
    },

    /// Drive a browser per domain and capture cookies and declared purposes.
    Consent {
        #[command(flatten)]
        domains: DomainArgs,

        /// Number of parallel browser sessions.
        #[arg(short = 'n', long = "numthreads", default_value_t = 1)]
        sessions: usize,

        /// Run Chromium without a window.
        #[arg(long)]
        headless: bool,

        /// Database receiving the crawl records.
        #[arg(long, default_value = DEFAULT_DB)]
        db: PathBuf,

        /// Chromium binary (overrides CONSENT_CRAWLER_CHROMIUM and PATH lookup).
        #[arg(long)]
        chromium: Option<PathBuf>,

        /// Write the run summary as JSON to this file.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Join stored cookies with their declared purposes.
    Match {
        /// Database written by `consent`.
        db: PathBuf,

        /// Export file.
        #[arg(short, long, default_value = "matched_cookies.json")]
        output: PathBuf,

        /// Export cookies without a declaration as label -1.
        #[arg(long)]
        include_unmatched: bool,

        /// Write merged cookies whose labels disagree across crawls to this file.
        #[arg(long)]
        consistency: Option<PathBuf>,
    },

    /// Database maintenance and statistics.
    Db {
        db: PathBuf,

        /// Copy the database to `<stem>_backup.<ext>` first.
        #[arg(long)]
        backup: bool,

        /// Remove empty-name and orphaned rows.
        #[arg(long)]
        clean: bool,

        /// Write the JSON report here instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completion scripts.
    ///
    /// Examples:
    ///   consent-crawler completions bash > ~/.local/share/bash-completion/completions/consent-crawler
    ///   consent-crawler completions zsh > ~/.zfunc/_consent-crawler
    Completions {
        /// Shell type (bash, zsh, fish, powershell, elvish).
        shell: Shell,
    },

    /// Probe exactly one domain and print its JSON report.
    #[command(hide = true)]
    Worker {
        domain: String,

        #[arg(long)]
        no_cmp_check: bool,

        #[arg(long)]
        connect_timeout_ms: Option<u64>,

        #[arg(long)]
        read_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_json);

    if let Err(e) = run(cli.command).await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Presence {
            domains,
            workers,
            batches,
            no_cmp_check,
            in_process,
            db,
            output,
        } => {
            let domains = domains.collect()?;
            let config = ProbeConfig {
                workers,
                batches,
                check_cmp: !no_cmp_check,
                ..Default::default()
            };
            presence(&domains, &config, in_process, db.as_deref(), &output).await
        }

        Commands::Consent {
            domains,
            sessions,
            headless,
            db,
            chromium,
            output,
        } => {
            let domains = domains.collect()?;
            let config = ExtractorConfig {
                sessions,
                headless,
                chromium_path: chromium,
                ..Default::default()
            };
            consent(&domains, config, &db, output.as_deref()).await
        }

        Commands::Match {
            db,
            output,
            include_unmatched,
            consistency,
        } => match_cookies(&db, &output, include_unmatched, consistency.as_deref()),

        Commands::Db {
            db,
            backup,
            clean,
            output,
        } => db_report(&db, backup, clean, output.as_deref()),

        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "consent-crawler", &mut std::io::stdout());
            Ok(())
        }

        Commands::Worker {
            domain,
            no_cmp_check,
            connect_timeout_ms,
            read_timeout_ms,
        } => {
            let defaults = ProbeConfig::default();
            let config = ProbeConfig {
                check_cmp: !no_cmp_check,
                connect_timeout_ms: connect_timeout_ms.unwrap_or(defaults.connect_timeout_ms),
                read_timeout_ms: read_timeout_ms.unwrap_or(defaults.read_timeout_ms),
                ..defaults
            };
            let report = prober(&config)?.probe(&domain).await;
            println!("{}", serde_json::to_string(&report)?);
            Ok(())
        }
    }
}

fn prober(config: &ProbeConfig) -> Result<Prober> {
    let fetcher = HttpFetcher::new(config).context("failed to build HTTP client")?;
    let registry = FingerprintRegistry::presence().context("invalid CMP signatures")?;
    Ok(Prober::new(
        Arc::new(fetcher),
        Arc::new(registry),
        config.check_cmp,
    ))
}

/// Triggers the returned signal on the first Ctrl-C.
fn interrupt_signal() -> Shutdown {
    let (trigger, signal) = shutdown::channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing in-flight domains");
            trigger.trigger();
        }
    });
    signal
}

async fn presence(
    domains: &[String],
    config: &ProbeConfig,
    in_process: bool,
    db: Option<&Path>,
    output: &Path,
) -> Result<()> {
    let executor: Arc<dyn ProbeExecutor> = if in_process {
        Arc::new(InProcessExecutor::new(prober(config)?))
    } else {
        let mut args = vec![
            "worker".to_string(),
            "--connect-timeout-ms".to_string(),
            config.connect_timeout_ms.to_string(),
            "--read-timeout-ms".to_string(),
            config.read_timeout_ms.to_string(),
        ];
        if !config.check_cmp {
            args.push("--no-cmp-check".to_string());
        }
        args.push("--".to_string());
        Arc::new(SubprocessExecutor::current_exe(args).context("failed to locate own binary")?)
    };

    let store = db
        .map(|path| {
            SqliteStore::open(path)
                .with_context(|| format!("failed to open database {}", path.display()))
        })
        .transpose()?;
    let mut persist_failures = 0usize;

    println!("Starting presence crawl of {} domains", domains.len());
    let pool = PresencePool::new(executor, config.workers, config.task_timeout());
    let summary = pool
        .run(domains, config.batches, &interrupt_signal(), |report| {
            let Some(store) = &store else { return };
            if let Err(e) = store.create_crawl_record(&NewCrawlRecord::from_probe(report)) {
                error!(domain = %report.input, "failed to persist presence result: {e}");
                persist_failures += 1;
            }
        })
        .await;

    let dir = output::timestamped_dir(output);
    let summary_path = output::save_presence_results(&dir, &summary)?;
    print!("{}", output::render_summary(&summary));
    println!("Results saved to {}", dir.display());
    info!(path = %summary_path.display(), "presence results written");

    if persist_failures > 0 {
        warn!(failures = persist_failures, "some presence results were not persisted");
    }
    Ok(())
}

async fn consent(
    domains: &[String],
    config: ExtractorConfig,
    db: &Path,
    output: Option<&Path>,
) -> Result<()> {
    let launcher = ChromiumLauncher::new(&config).context("failed to set up Chromium")?;
    let store = SqliteStore::open(db)
        .with_context(|| format!("failed to open database {}", db.display()))?;
    let registry = FingerprintRegistry::rendered().context("invalid CMP signatures")?;
    let extractor = ConsentExtractor::new(Arc::new(launcher), Arc::new(registry), config);
    let crawler = ConsentCrawler::new(Arc::new(extractor), Arc::new(store));

    println!("Starting consent crawl of {} domains", domains.len());
    let summary = crawler.run(domains, &interrupt_signal()).await;

    println!("\nConsent Crawl Summary");
    println!("=====================");
    println!("Total domains:       {}", summary.total_domains);
    println!("Successful crawls:   {}", summary.successful_crawls);
    println!("Failed crawls:       {}", summary.failed_crawls);
    println!("Total cookies:       {}", summary.total_cookies);
    println!("With consent data:   {}", summary.domains_with_consent_data);
    for (cmp, count) in &summary.cmp_types {
        println!("  {cmp}: {count}");
    }
    if summary.interrupted() {
        println!("Not processed:       {}", summary.unprocessed.len());
    }
    println!("Elapsed:             {:.2}s", summary.elapsed_secs);
    println!("\nDatabase location: {}", db.display());

    if let Some(path) = output {
        write_json(path, &summary)?;
    }
    Ok(())
}

fn match_cookies(
    db: &Path,
    output: &Path,
    include_unmatched: bool,
    consistency: Option<&Path>,
) -> Result<()> {
    let store = open_existing(db)?;
    let config = MatchConfig { include_unmatched };
    let result = matcher::run(&store, &config).context("matching failed")?;

    std::fs::write(output, result.to_json()?)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!(
        "Exported {} cookies to {} ({} matched, {} unmatched instances)",
        result.cookies.len(),
        output.display(),
        result.statistics.matched_cookies,
        result.statistics.unmatched_cookies
    );

    if let Some(path) = consistency {
        let conflicts = consistency_report(&store.read_for_matching()?);
        write_json(path, &conflicts)?;
        println!("{} cookies with conflicting labels written to {}", conflicts.len(), path.display());
    }
    Ok(())
}

fn db_report(db: &Path, backup: bool, clean: bool, output: Option<&Path>) -> Result<()> {
    let store = open_existing(db)?;
    if backup {
        let path = consent_crawler::store::backup(db).context("backup failed")?;
        println!("Database backed up to {}", path.display());
    }
    let cleanup = if clean {
        Some(store.clean().context("cleanup failed")?)
    } else {
        None
    };

    let report = serde_json::json!({
        "database_path": db.display().to_string(),
        "generated_at": chrono::Utc::now().to_rfc3339(),
        "cleanup": cleanup,
        "statistics": store.stats().context("failed to compute statistics")?,
        "matching": matching_analysis(&store.read_for_matching()?),
    });

    match output {
        Some(path) => {
            write_json(path, &report)?;
            println!("Report written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn open_existing(db: &Path) -> Result<SqliteStore> {
    anyhow::ensure!(db.exists(), "database not found: {}", db.display());
    SqliteStore::open(db).with_context(|| format!("failed to open database {}", db.display()))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(path, text).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_worker_hidden_and_positional() {
        let cli = Cli::try_parse_from([
            "consent-crawler",
            "worker",
            "--no-cmp-check",
            "--read-timeout-ms",
            "500",
            "--",
            "example.com",
        ])
        .unwrap();
        match cli.command {
            Commands::Worker {
                domain,
                no_cmp_check,
                read_timeout_ms,
                connect_timeout_ms,
            } => {
                assert_eq!(domain, "example.com");
                assert!(no_cmp_check);
                assert_eq!(read_timeout_ms, Some(500));
                assert_eq!(connect_timeout_ms, None);
            }
            _ => panic!("expected worker"),
        }
        let help = Cli::command().render_help().to_string();
        assert!(!help.contains("worker"));
    }

    #[test]
    fn test_presence_repeated_inputs() {
        let cli = Cli::try_parse_from([
            "consent-crawler",
            "presence",
            "-n",
            "8",
            "-u",
            "a.com",
            "-u",
            "b.com",
            "-f",
            "list.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Presence {
                domains,
                workers,
                batches,
                ..
            } => {
                assert_eq!(workers, 8);
                assert_eq!(batches, 1);
                assert_eq!(domains.urls, vec!["a.com", "b.com"]);
                assert_eq!(domains.files, vec![PathBuf::from("list.txt")]);
            }
            _ => panic!("expected presence"),
        }
    }

    #[test]
    fn test_empty_domain_list_rejected() {
        let args = DomainArgs {
            urls: vec!["  ".into()],
            files: vec![],
        };
        assert!(args.collect().is_err());
    }

    #[test]
    fn test_match_on_missing_db_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = match_cookies(
            &dir.path().join("absent.db"),
            &dir.path().join("out.json"),
            false,
            None,
        )
        .unwrap_err();
        assert!(err.to_string().contains("database not found"));
    }

    #[test]
    fn test_match_and_report_on_sqlite_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("crawl.db");
        {
            let store = SqliteStore::open(&db).unwrap();
            let record = NewCrawlRecord {
                domain: "shop.com".into(),
                timestamp: chrono::Utc::now(),
                success: true,
                cmp_type: Some("onetrust".into()),
                cookies_collected: 1,
                error_message: None,
            };
            let cookie = consent_crawler::Cookie {
                name: "_ga".into(),
                domain: ".shop.com".into(),
                value: "GA1.2".into(),
                path: "/".into(),
                expiry: None,
                secure: true,
                http_only: false,
                same_site: None,
            };
            let declaration = consent_crawler::ConsentDeclaration {
                cookie_name: "_ga".into(),
                cookie_domain: ".shop.com".into(),
                purpose_category: "Analytics".into(),
                purpose_description: "Counts visits".into(),
                cmp_type: "onetrust".into(),
            };
            store.record_crawl(&record, &[cookie], &[declaration]).unwrap();
        }

        let out = dir.path().join("matched.json");
        let conflicts = dir.path().join("conflicts.json");
        match_cookies(&db, &out, false, Some(&conflicts)).unwrap();
        let export: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&out).unwrap()).unwrap();
        assert_eq!(export[".shop.com__ga"]["label"], 2);
        let conflicts: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&conflicts).unwrap()).unwrap();
        assert_eq!(conflicts, serde_json::json!([]));

        let report = dir.path().join("report.json");
        db_report(&db, true, true, Some(&report)).unwrap();
        assert!(dir.path().join("crawl_backup.db").exists());
        let report: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
        assert_eq!(report["statistics"]["total_crawls"], 1);
        assert_eq!(report["matching"]["matched_with_consent"], 1);
    }
}
