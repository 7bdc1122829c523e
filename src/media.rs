//! Per-file download with retry classification.
//!
//! One `MediaDownloader` invocation owns one [`DownloadJob`] end to end:
//! skip checks, the attempt loop with failure classification, delegation to
//! the chunked writer, and deferral back to the album pass when the
//! primary retry budget runs out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::config::DownloadConfig;
use crate::fetch::DOWNLOAD_REFERER;
use crate::fs::FileSystem;
use crate::health::HostHealth;
use crate::progress::{ProgressAggregator, ProgressObserver, TaskId};
use crate::session::SessionLog;
use crate::writer;

/// One download ready to execute: a direct link, a sanitized filename, and
/// the progress tracker handle. Owned by exactly one downloader at a time.
#[derive(Debug, Clone)]
pub struct DownloadJob {
    /// Direct download URL.
    pub link: String,
    /// Sanitized filename (fixed before any existence check).
    pub filename: String,
    /// Progress tracker handle.
    pub task: TaskId,
}

/// A download that exhausted its primary retry budget and is owed one
/// single-shot retry after the main pass.
#[derive(Debug, Clone)]
pub struct FailedDownload {
    /// Progress tracker handle carried over from the primary pass.
    pub task: TaskId,
    /// Filename of the failed download.
    pub filename: String,
    /// Direct download URL.
    pub link: String,
}

/// Source of backoff jitter, injectable so tests can fix the sequence.
pub trait Jitter: Send + Sync {
    /// Samples a value uniformly from `[low, high)`.
    fn sample(&self, low: f64, high: f64) -> f64;
}

/// Jitter drawn from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl Jitter for RandomJitter {
    fn sample(&self, low: f64, high: f64) -> f64 {
        rand::rng().random_range(low..high)
    }
}

/// Backoff before retrying attempt `attempt` (0-based) after a rate-limit
/// response: `4^(attempt+1)` seconds plus 2-4 seconds of jitter.
pub fn rate_limit_backoff(attempt: u32, jitter: &dyn Jitter) -> Duration {
    let base = 4_f64.powi(attempt.saturating_add(1).cast_signed());
    Duration::from_secs_f64(base + jitter.sample(2.0, 4.0))
}

/// How a failed attempt affects the rest of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureClass {
    /// No response at all, or an explicit server-down signal: the host is
    /// marked offline and the loop aborts.
    NoResponse,
    /// 429/503: back off and retry unless this was the last attempt.
    RateLimited,
    /// 502: the remaining budget collapses to zero.
    Gateway,
    /// Any other HTTP error: abort with no backoff.
    Other,
}

fn classify_status(status: reqwest::StatusCode) -> FailureClass {
    match status.as_u16() {
        429 | 503 => FailureClass::RateLimited,
        502 => FailureClass::Gateway,
        521 => FailureClass::NoResponse,
        _ => FailureClass::Other,
    }
}

/// Shared collaborators for one run, cloned cheaply into every worker.
pub struct DownloadContext<F: FileSystem, O: ProgressObserver> {
    /// HTTP client for download attempts.
    pub client: reqwest::Client,
    /// Shared host-health registry.
    pub health: HostHealth,
    /// Append-only log of problematic links.
    pub session_log: SessionLog<F>,
    /// Filesystem seam.
    pub fs: Arc<F>,
    /// Progress aggregation.
    pub progress: ProgressAggregator<O>,
    /// Run configuration.
    pub config: DownloadConfig,
    /// Backoff jitter source.
    pub jitter: Box<dyn Jitter>,
}

/// Per-file retry state machine.
pub struct MediaDownloader<F: FileSystem, O: ProgressObserver> {
    ctx: Arc<DownloadContext<F, O>>,
    download_path: PathBuf,
    retries: u32,
}

impl<F: FileSystem, O: ProgressObserver> MediaDownloader<F, O> {
    /// Creates a downloader writing under `download_path` with the given
    /// retry budget (`1` marks the final, deferred pass).
    #[must_use]
    pub fn new(ctx: Arc<DownloadContext<F, O>>, download_path: PathBuf, retries: u32) -> Self {
        Self {
            ctx,
            download_path,
            retries,
        }
    }

    /// Runs the job to a terminal state.
    ///
    /// Returns `Some(FailedDownload)` when the primary budget is exhausted
    /// and the job should be retried once after the main pass; `None` for
    /// every other terminal state (success, skip, partial-kept, or final
    /// failure).
    pub async fn download(&self, job: &DownloadJob) -> Option<FailedDownload> {
        let final_pass = self.retries == 1;

        // Health pre-check short-circuits only on the final pass; earlier
        // passes still attempt the host since health can be transient.
        if final_pass && self.ctx.health.is_offline(&job.link) {
            self.ctx.progress.log(
                "Non-operational subdomain",
                &format!(
                    "The subdomain for {} appears to be offline. Check the log file.",
                    job.filename
                ),
            );
            self.ctx.session_log.record(&job.link).await;
            self.ctx.progress.hide_item(job.task);
            return None;
        }

        let final_path = self.download_path.join(&job.filename);
        if self.skip_download(job, &final_path).await {
            return None;
        }

        if self.attempt_download(job, &final_path).await {
            return self.handle_failed_download(job, final_pass).await;
        }
        None
    }

    /// Returns `true` when the job should be skipped: the file already
    /// exists, the filename matches the ignore list, or a non-empty
    /// include list matches nothing.
    async fn skip_download(&self, job: &DownloadJob, final_path: &Path) -> bool {
        let reason = if self.ctx.fs.file_exists(final_path).await {
            Some(format!("{} already exists.", job.filename))
        } else if self
            .ctx
            .config
            .ignore_list
            .iter()
            .any(|word| job.filename.contains(word))
        {
            Some(format!("{} contains ignored words.", job.filename))
        } else if !self.ctx.config.include_list.is_empty()
            && !self
                .ctx
                .config
                .include_list
                .iter()
                .any(|word| job.filename.contains(word))
        {
            Some(format!("{} does not contain required words.", job.filename))
        } else {
            None
        };

        if let Some(reason) = reason {
            self.ctx.progress.log("Skipped download", &reason);
            self.ctx.progress.complete_item(job.task);
            return true;
        }
        false
    }

    /// Runs the attempt loop. Returns `true` when every allowed attempt
    /// failed.
    async fn attempt_download(&self, job: &DownloadJob, final_path: &Path) -> bool {
        let mut attempt = 0;
        while attempt < self.retries {
            match self.one_attempt(job, final_path).await {
                AttemptOutcome::Done => return false,
                AttemptOutcome::Abort => return true,
                AttemptOutcome::RateLimited => {
                    self.ctx.progress.log(
                        "Too many requests",
                        &format!(
                            "Retrying to download {}... ({}/{})",
                            job.filename,
                            attempt + 1,
                            self.retries
                        ),
                    );
                    if attempt + 1 >= self.retries {
                        return true;
                    }
                    tokio::time::sleep(rate_limit_backoff(attempt, self.ctx.jitter.as_ref()))
                        .await;
                }
            }
            attempt += 1;
        }
        true
    }

    async fn one_attempt(&self, job: &DownloadJob, final_path: &Path) -> AttemptOutcome {
        let response = self
            .ctx
            .client
            .get(&job.link)
            .header(reqwest::header::REFERER, DOWNLOAD_REFERER)
            .send()
            .await;

        let response = match response {
            Ok(response) => response,
            Err(e) => {
                // Transport failure with no status: the host itself is the
                // problem.
                self.mark_host_offline(job);
                log::debug!("no response from {}: {e}", job.link);
                return AttemptOutcome::Abort;
            }
        };

        let status = response.status();
        if !status.is_success() {
            return match classify_status(status) {
                FailureClass::NoResponse => {
                    self.mark_host_offline(job);
                    AttemptOutcome::Abort
                }
                FailureClass::RateLimited => AttemptOutcome::RateLimited,
                FailureClass::Gateway => {
                    self.ctx.progress.log(
                        "Bad gateway",
                        &format!("Giving up on {} immediately.", job.filename),
                    );
                    AttemptOutcome::Abort
                }
                FailureClass::Other => {
                    self.ctx.progress.log(
                        "Download error",
                        &format!("HTTP {status} for {}.", job.filename),
                    );
                    AttemptOutcome::Abort
                }
            };
        }

        let progress = &self.ctx.progress;
        let task = job.task;
        let saved = writer::save(self.ctx.fs.as_ref(), response, final_path, |percent| {
            progress.update_item(task, percent);
        })
        .await;

        match saved {
            Ok(false) => {
                self.ctx.progress.complete_item(task);
                AttemptOutcome::Done
            }
            Ok(true) => {
                // Terminal success-with-warning: the partial stays under
                // its temp name and is not re-queued.
                self.ctx.progress.log(
                    "Partial download",
                    &format!(
                        "{} was interrupted; the partial file was kept for follow-up.",
                        job.filename
                    ),
                );
                self.ctx.session_log.record(&job.link).await;
                self.ctx.progress.complete_item(task);
                AttemptOutcome::Done
            }
            Err(e) => {
                self.ctx.progress.log(
                    "File error",
                    &format!("Could not write {}: {e}.", job.filename),
                );
                AttemptOutcome::Abort
            }
        }
    }

    fn mark_host_offline(&self, job: &DownloadJob) {
        if let Some(subdomain) = self.ctx.health.mark_offline(&job.link) {
            self.ctx.progress.log(
                "No response",
                &format!("Subdomain {subdomain} has been marked as offline."),
            );
        }
    }

    /// Terminal handling once every allowed attempt failed.
    async fn handle_failed_download(
        &self,
        job: &DownloadJob,
        final_pass: bool,
    ) -> Option<FailedDownload> {
        if !final_pass {
            self.ctx.progress.log(
                "Exceeded retry attempts",
                &format!(
                    "Exceeded retry attempts for {}. It will be retried one more time \
                     after all other tasks.",
                    job.filename
                ),
            );
            return Some(FailedDownload {
                task: job.task,
                filename: job.filename.clone(),
                link: job.link.clone(),
            });
        }

        self.ctx.progress.log(
            "Download failed",
            &format!("Failed to download {}. The failure has been logged.", job.filename),
        );
        self.ctx.session_log.record(&job.link).await;
        self.ctx.progress.hide_item(job.task);
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptOutcome {
    /// Terminal for this job: full success or partial kept for follow-up.
    Done,
    /// Back off and retry if budget remains.
    RateLimited,
    /// Stop attempting this pass.
    Abort,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedJitter(f64);

    impl Jitter for FixedJitter {
        fn sample(&self, _low: f64, _high: f64) -> f64 {
            self.0
        }
    }

    #[test]
    fn backoff_is_exponential_with_fixed_jitter() {
        let jitter = FixedJitter(2.5);
        assert_eq!(
            rate_limit_backoff(0, &jitter),
            Duration::from_secs_f64(4.0 + 2.5)
        );
        assert_eq!(
            rate_limit_backoff(1, &jitter),
            Duration::from_secs_f64(16.0 + 2.5)
        );
        assert_eq!(
            rate_limit_backoff(2, &jitter),
            Duration::from_secs_f64(64.0 + 2.5)
        );
    }

    #[test]
    fn backoff_sum_is_deterministic() {
        let jitter = FixedJitter(3.0);
        // With retries = 4, three backoffs happen (after attempts 0..=2).
        let total: Duration = (0..3).map(|n| rate_limit_backoff(n, &jitter)).sum();
        assert_eq!(total, Duration::from_secs_f64(4.0 + 16.0 + 64.0 + 9.0));
    }

    #[test]
    fn random_jitter_within_bounds() {
        let jitter = RandomJitter;
        for _ in 0..100 {
            let v = jitter.sample(2.0, 4.0);
            assert!((2.0..4.0).contains(&v));
        }
    }

    #[test]
    fn classify_rate_limit_statuses() {
        assert_eq!(
            classify_status(reqwest::StatusCode::TOO_MANY_REQUESTS),
            FailureClass::RateLimited
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE),
            FailureClass::RateLimited
        );
    }

    #[test]
    fn classify_gateway_and_other() {
        assert_eq!(
            classify_status(reqwest::StatusCode::BAD_GATEWAY),
            FailureClass::Gateway
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::NOT_FOUND),
            FailureClass::Other
        );
        assert_eq!(
            classify_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR),
            FailureClass::Other
        );
    }

    #[test]
    fn classify_server_down_signal() {
        let status = reqwest::StatusCode::from_u16(521).unwrap();
        assert_eq!(classify_status(status), FailureClass::NoResponse);
    }

    use crate::fs::TokioFileSystem;
    use crate::session::SessionLog;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Serves the same canned response to every connection and counts them.
    async fn canned_server(response: &'static str) -> (std::net::SocketAddr, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&connections);
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                seen.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (addr, connections)
    }

    fn make_ctx(dir: &TempDir) -> Arc<DownloadContext<TokioFileSystem, crate::progress::NoObserver>> {
        let fs = Arc::new(TokioFileSystem::new());
        Arc::new(DownloadContext {
            client: reqwest::Client::new(),
            health: HostHealth::new(),
            session_log: SessionLog::new(dir.path().join("session_log.txt"), Arc::clone(&fs)),
            fs,
            progress: ProgressAggregator::new(),
            config: DownloadConfig::default(),
            jitter: Box::new(FixedJitter(2.0)),
        })
    }

    #[tokio::test]
    async fn existing_file_is_skipped_without_network() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("video.mp4"), b"data").unwrap();

        let ctx = make_ctx(&dir);
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        let job = DownloadJob {
            // Unroutable on purpose; the skip check must fire first.
            link: "http://127.0.0.1:1/video.mp4".to_string(),
            filename: "video.mp4".to_string(),
            task,
        };

        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 5);
        assert!(downloader.download(&job).await.is_none());
        assert_eq!(ctx.progress.overall("album"), Some((1, 1)));
        assert_eq!(std::fs::read(dir.path().join("video.mp4")).unwrap(), b"data");
    }

    #[tokio::test]
    async fn ignored_filename_is_skipped() {
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(TokioFileSystem::new());
        let ctx = Arc::new(DownloadContext {
            client: reqwest::Client::new(),
            health: HostHealth::new(),
            session_log: SessionLog::new(dir.path().join("session_log.txt"), Arc::clone(&fs)),
            fs,
            progress: ProgressAggregator::new(),
            config: DownloadConfig::default().with_ignore_list(vec!["sample".into()]),
            jitter: Box::new(FixedJitter(2.0)),
        });
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        let job = DownloadJob {
            link: "http://127.0.0.1:1/sample-video.mp4".to_string(),
            filename: "sample-video.mp4".to_string(),
            task,
        };

        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 5);
        assert!(downloader.download(&job).await.is_none());
        assert_eq!(ctx.progress.overall("album"), Some((1, 1)));
        assert!(!dir.path().join("sample-video.mp4").exists());
    }

    #[tokio::test]
    async fn no_response_marks_host_offline_and_defers() {
        let dir = TempDir::new().unwrap();
        let ctx = make_ctx(&dir);
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        // Port 1 refuses connections: a transport failure with no status.
        let job = DownloadJob {
            link: "http://127.0.0.1:1/video.mp4".to_string(),
            filename: "video.mp4".to_string(),
            task,
        };

        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 5);
        let failed = downloader.download(&job).await;
        assert!(failed.is_some());
        assert!(ctx.health.is_offline(&job.link));
    }

    #[tokio::test]
    async fn rate_limited_host_gets_exactly_the_retry_budget() {
        let (addr, connections) = canned_server(
            "HTTP/1.1 429 Too Many Requests\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let dir = TempDir::new().unwrap();
        let fs = Arc::new(TokioFileSystem::new());
        let ctx = Arc::new(DownloadContext {
            client: reqwest::Client::new(),
            health: HostHealth::new(),
            session_log: SessionLog::new(dir.path().join("session_log.txt"), Arc::clone(&fs)),
            fs,
            progress: ProgressAggregator::new(),
            config: DownloadConfig::default(),
            jitter: Box::new(FixedJitter(0.0)),
        });
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        let job = DownloadJob {
            link: format!("http://{addr}/video.mp4"),
            filename: "video.mp4".to_string(),
            task,
        };

        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 2);
        let failed = downloader.download(&job).await;
        // A budget of two means exactly two requests, then deferral.
        assert!(failed.is_some());
        assert_eq!(connections.load(Ordering::SeqCst), 2);
        assert_eq!(ctx.progress.overall("album"), Some((0, 1)));
    }

    #[tokio::test]
    async fn successful_download_writes_file_and_advances_overall() {
        let (addr, connections) = canned_server(
            "HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n0123456789",
        )
        .await;
        let dir = TempDir::new().unwrap();
        let ctx = make_ctx(&dir);
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        let job = DownloadJob {
            link: format!("http://{addr}/video.mp4"),
            filename: "video.mp4".to_string(),
            task,
        };

        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 5);
        assert!(downloader.download(&job).await.is_none());
        assert_eq!(connections.load(Ordering::SeqCst), 1);
        assert_eq!(
            std::fs::read(dir.path().join("video.mp4")).unwrap(),
            b"0123456789"
        );
        assert!(!dir.path().join("video.mp4.temp").exists());
        assert_eq!(ctx.progress.overall("album"), Some((1, 1)));
    }

    #[tokio::test]
    async fn final_pass_skips_offline_host_without_dialing() {
        let dir = TempDir::new().unwrap();
        let ctx = make_ctx(&dir);
        ctx.progress.register_overall("album", 1);
        let task = ctx.progress.add_item("album", 0);
        let link = "http://127.0.0.1:1/video.mp4";
        ctx.health.mark_offline(link);

        let job = DownloadJob {
            link: link.to_string(),
            filename: "video.mp4".to_string(),
            task,
        };
        let downloader = MediaDownloader::new(Arc::clone(&ctx), dir.path().to_path_buf(), 1);
        assert!(downloader.download(&job).await.is_none());

        // The link landed in the session log for follow-up.
        let logged = std::fs::read_to_string(dir.path().join("session_log.txt")).unwrap();
        assert!(logged.contains(link));
    }
}
