//! Fixed-size probe pool with per-domain worker isolation.
//!
//! Each domain runs through a [`ProbeExecutor`]. The production executor,
//! [`SubprocessExecutor`], re-invokes a worker binary per domain so a crash
//! or hang only ever costs that one domain:
//! - the child is killed when its task timeout fires
//! - a non-zero exit or unreadable output is a worker crash
//! - both map to the TIMEOUT bucket for that domain alone
//! - the child runs in its own process group, so a terminal interrupt
//!   reaches only the parent
//!
//! Results are consumed in completion order. On shutdown no new domains are
//! admitted, in-flight domains finish (or time out), and everything never
//! started is returned as `unprocessed`.

use super::Prober;
use crate::error::CrawlError;
use crate::shutdown::Shutdown;
use crate::types::{ProbeOutcome, ProbeReport};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// How often per batch a progress line is logged.
const PROGRESS_EVERY: usize = 50;

/// Cap on captured worker stderr.
const MAX_STDERR: usize = 4096;

/// A worker that died or answered with garbage.
#[derive(thiserror::Error, Debug)]
pub enum WorkerFault {
    #[error("could not spawn worker: {0}")]
    Spawn(String),
    #[error("worker exited with {status}: {stderr}")]
    Exited { status: String, stderr: String },
    #[error("worker output unreadable: {0}")]
    BadOutput(String),
    #[error("worker task panicked: {0}")]
    Panicked(String),
}

impl From<WorkerFault> for CrawlError {
    fn from(fault: WorkerFault) -> Self {
        CrawlError::WorkerCrash(fault.to_string())
    }
}

/// Runs the probe for exactly one domain.
#[async_trait]
pub trait ProbeExecutor: Send + Sync + 'static {
    async fn execute(&self, domain: &str) -> Result<ProbeReport, WorkerFault>;
}

/// Probes inside the calling process. No crash isolation; used for
/// debugging and tests.
pub struct InProcessExecutor {
    prober: Prober,
}

impl InProcessExecutor {
    pub fn new(prober: Prober) -> Self {
        Self { prober }
    }
}

#[async_trait]
impl ProbeExecutor for InProcessExecutor {
    async fn execute(&self, domain: &str) -> Result<ProbeReport, WorkerFault> {
        Ok(self.prober.probe(domain).await)
    }
}

/// Spawns `program args... <domain>` per domain and reads one JSON
/// [`ProbeReport`] from the child's stdout.
#[derive(Debug, Clone)]
pub struct SubprocessExecutor {
    program: PathBuf,
    args: Vec<String>,
}

impl SubprocessExecutor {
    pub fn new(program: PathBuf, args: Vec<String>) -> Self {
        Self { program, args }
    }

    /// Re-invoke the running binary as the worker.
    pub fn current_exe(args: Vec<String>) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, args))
    }
}

#[async_trait]
impl ProbeExecutor for SubprocessExecutor {
    async fn execute(&self, domain: &str) -> Result<ProbeReport, WorkerFault> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(&self.args)
            .arg(domain)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // keep terminal Ctrl-C on the parent; in-flight workers finish on their own
        #[cfg(unix)]
        command.process_group(0);

        let output = command
            .output()
            .await
            .map_err(|e| WorkerFault::Spawn(format!("{}: {e}", self.program.display())))?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
            stderr.truncate(MAX_STDERR);
            return Err(WorkerFault::Exited {
                status: output.status.to_string(),
                stderr,
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .ok_or_else(|| WorkerFault::BadOutput("empty stdout".into()))?;
        serde_json::from_str(line).map_err(|e| WorkerFault::BadOutput(e.to_string()))
    }
}

/// Outcome buckets of a presence run.
#[derive(Debug, Clone, Default)]
pub struct PresenceSummary {
    /// Outcome → answering URL (or input) per domain, in completion order.
    pub buckets: BTreeMap<ProbeOutcome, Vec<String>>,
    /// Domains never started because of an interrupt.
    pub unprocessed: Vec<String>,
    pub elapsed: Duration,
}

impl PresenceSummary {
    fn record(&mut self, report: &ProbeReport) {
        self.buckets
            .entry(report.outcome)
            .or_default()
            .push(report.url.clone());
    }

    pub fn count(&self, outcome: ProbeOutcome) -> usize {
        self.buckets.get(&outcome).map(Vec::len).unwrap_or(0)
    }

    /// Domains that produced an outcome.
    pub fn completed(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn interrupted(&self) -> bool {
        !self.unprocessed.is_empty()
    }

    /// Bucket name → count, for every outcome (zeros included).
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        ProbeOutcome::ALL
            .iter()
            .map(|o| (o.bucket(), self.count(*o)))
            .collect()
    }
}

/// Runs probes through an executor with bounded parallelism.
pub struct PresencePool {
    executor: Arc<dyn ProbeExecutor>,
    workers: usize,
    task_timeout: Duration,
}

impl PresencePool {
    pub fn new(executor: Arc<dyn ProbeExecutor>, workers: usize, task_timeout: Duration) -> Self {
        Self {
            executor,
            workers: workers.max(1),
            task_timeout,
        }
    }

    /// Probe every domain, batch by batch. `on_result` sees each report as
    /// it completes.
    pub async fn run<F>(
        &self,
        domains: &[String],
        batches: usize,
        shutdown: &Shutdown,
        mut on_result: F,
    ) -> PresenceSummary
    where
        F: FnMut(&ProbeReport),
    {
        let start = Instant::now();
        let mut summary = PresenceSummary::default();
        let chunks = split_batches(domains, batches);
        info!(
            domains = domains.len(),
            workers = self.workers,
            batches = chunks.len(),
            "starting presence crawl"
        );

        for (n, chunk) in chunks.iter().enumerate() {
            if shutdown.is_triggered() {
                summary.unprocessed.extend(chunk.iter().cloned());
                continue;
            }
            info!("processing batch {}/{} ({} domains)", n + 1, chunks.len(), chunk.len());

            let mut pending = chunk.iter();
            let mut in_flight: FuturesUnordered<BoxFuture<'static, ProbeReport>> =
                FuturesUnordered::new();
            let mut processed = 0usize;

            loop {
                while in_flight.len() < self.workers && !shutdown.is_triggered() {
                    let Some(domain) = pending.next() else { break };
                    in_flight.push(
                        run_isolated(Arc::clone(&self.executor), domain.clone(), self.task_timeout)
                            .boxed(),
                    );
                }

                let Some(report) = in_flight.next().await else { break };
                processed += 1;
                on_result(&report);
                summary.record(&report);
                if processed % PROGRESS_EVERY == 0 {
                    info!("batch {}: {processed}/{} completed", n + 1, chunk.len());
                }
            }

            summary.unprocessed.extend(pending.cloned());
            info!("completed batch {}: {processed} domains processed", n + 1);
        }

        summary.elapsed = start.elapsed();
        if summary.interrupted() {
            warn!(
                remaining = summary.unprocessed.len(),
                "crawl interrupted, domains not processed"
            );
        }
        info!("presence crawl completed in {:.2}s", summary.elapsed.as_secs_f64());
        summary
    }
}

/// Run one domain on its own task under the task timeout. Always yields a
/// report: timeouts and crashes become TIMEOUT for this domain only.
async fn run_isolated(
    executor: Arc<dyn ProbeExecutor>,
    domain: String,
    task_timeout: Duration,
) -> ProbeReport {
    let target = domain.clone();
    let handle = tokio::spawn(async move { executor.execute(&target).await });
    let abort = handle.abort_handle();

    let fault = match tokio::time::timeout(task_timeout, handle).await {
        Ok(Ok(Ok(report))) => return report,
        Ok(Ok(Err(fault))) => fault,
        Ok(Err(join)) => WorkerFault::Panicked(join.to_string()),
        Err(_) => {
            // dropping the aborted future kills a subprocess worker
            abort.abort();
            warn!(domain = %domain, "probe exceeded task timeout of {:?}", task_timeout);
            return timeout_report(domain);
        }
    };
    error!(domain = %domain, "process timeout/crash: {fault}");
    timeout_report(domain)
}

fn timeout_report(domain: String) -> ProbeReport {
    ProbeReport {
        url: domain.clone(),
        input: domain,
        outcome: ProbeOutcome::Timeout,
    }
}

/// Split into chunks of `len / batches` (at least 1) domains.
pub fn split_batches(domains: &[String], batches: usize) -> Vec<&[String]> {
    if domains.is_empty() {
        return Vec::new();
    }
    let size = (domains.len() / batches.max(1)).max(1);
    domains.chunks(size).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("d{i}.com")).collect()
    }

    #[test]
    fn test_split_batches() {
        assert_eq!(split_batches(&names(10), 1).len(), 1);
        assert_eq!(split_batches(&names(10), 2).len(), 2);
        assert_eq!(split_batches(&names(10), 3).len(), 4);
        assert_eq!(split_batches(&names(2), 5).len(), 2);
        assert!(split_batches(&[], 3).is_empty());
    }

    struct Echo;

    #[async_trait]
    impl ProbeExecutor for Echo {
        async fn execute(&self, domain: &str) -> Result<ProbeReport, WorkerFault> {
            if domain.starts_with("panic") {
                panic!("worker blew up");
            }
            Ok(ProbeReport {
                input: domain.to_string(),
                url: format!("https://{domain}/"),
                outcome: ProbeOutcome::NoCmp,
            })
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_isolated() {
        let pool = PresencePool::new(Arc::new(Echo), 2, Duration::from_secs(5));
        let domains = vec!["a.com".to_string(), "panic.com".to_string(), "b.com".to_string()];
        let summary = pool.run(&domains, 1, &Shutdown::never(), |_| {}).await;
        assert_eq!(summary.count(ProbeOutcome::NoCmp), 2);
        assert_eq!(summary.buckets[&ProbeOutcome::Timeout], vec!["panic.com"]);
        assert!(!summary.interrupted());
    }

    #[tokio::test]
    async fn test_counts_include_zero_buckets() {
        let pool = PresencePool::new(Arc::new(Echo), 1, Duration::from_secs(5));
        let summary = pool.run(&names(3), 1, &Shutdown::never(), |_| {}).await;
        let counts = summary.counts();
        assert_eq!(counts["nocmp"], 3);
        assert_eq!(counts["bot"], 0);
        assert_eq!(counts.len(), ProbeOutcome::ALL.len());
    }

    #[tokio::test]
    async fn test_missing_worker_binary_is_crash() {
        let exec = SubprocessExecutor::new(PathBuf::from("/nonexistent/worker-bin"), vec![]);
        let err = exec.execute("example.com").await.unwrap_err();
        assert!(matches!(err, WorkerFault::Spawn(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_reads_last_json_line() {
        let script = r#"echo "noise"; echo '{"input":"x.com","url":"https://x.com/","outcome":"TERMLY"}'"#;
        let exec = SubprocessExecutor::new(
            PathBuf::from("sh"),
            vec!["-c".into(), script.into(), "worker".into()],
        );
        let report = exec.execute("x.com").await.unwrap();
        assert_eq!(report.outcome, ProbeOutcome::Termly);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_subprocess_nonzero_exit_is_crash() {
        let exec = SubprocessExecutor::new(
            PathBuf::from("sh"),
            vec!["-c".into(), "exit 3".into(), "worker".into()],
        );
        let err = exec.execute("x.com").await.unwrap_err();
        assert!(matches!(err, WorkerFault::Exited { .. }));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_worker_leads_its_own_process_group() {
        // fields 1 and 5 of /proc/<pid>/stat are the pid and its process group
        let script = r#"set -- $(cat /proc/$$/stat); echo "{\"input\":\"x.com\",\"url\":\"$1 $5\",\"outcome\":\"NOCMP\"}""#;
        let exec = SubprocessExecutor::new(
            PathBuf::from("sh"),
            vec!["-c".into(), script.into(), "worker".into()],
        );
        let report = exec.execute("x.com").await.unwrap();
        let ids: Vec<&str> = report.url.split(' ').collect();
        assert_eq!(ids.len(), 2, "unexpected worker output {:?}", report.url);
        assert_eq!(ids[0], ids[1]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_signalled_worker_lands_in_timeout_bucket() {
        let exec = SubprocessExecutor::new(
            PathBuf::from("sh"),
            vec!["-c".into(), "kill -KILL $$".into(), "worker".into()],
        );
        let pool = PresencePool::new(Arc::new(exec), 1, Duration::from_secs(5));
        let domains = vec!["x.com".to_string()];
        let summary = pool.run(&domains, 1, &Shutdown::never(), |_| {}).await;
        assert_eq!(summary.buckets[&ProbeOutcome::Timeout], vec!["x.com"]);
    }
}
