//! Album-level download orchestration.
//!
//! Fans item pipelines out across a bounded worker pool, collects the
//! downloads that exhausted their primary retry budget, and gives each of
//! them exactly one more attempt after the main pass. No failure in one
//! item's pipeline ever aborts a sibling.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::fetch::PageFetcher;
use crate::fs::FileSystem;
use crate::media::{DownloadContext, DownloadJob, FailedDownload, MediaDownloader};
use crate::progress::ProgressObserver;
use crate::resolve::Resolver;
use crate::urls::normalize_item_page;

/// One album to download: its id and the item pages it enumerates, in
/// page order. Immutable once created.
#[derive(Debug, Clone)]
pub struct AlbumTask {
    /// Album identifier (used for progress numbering and directory names).
    pub album_id: String,
    /// Item page URLs in enumeration order.
    pub item_pages: Vec<String>,
}

/// Bounded-concurrency orchestrator for one album.
pub struct AlbumDownloader<F: FileSystem, O: ProgressObserver, P: PageFetcher> {
    ctx: Arc<DownloadContext<F, O>>,
    fetcher: Arc<P>,
    resolver: Arc<Resolver<P>>,
    download_path: PathBuf,
    cancel: CancellationToken,
}

impl<F, O, P> AlbumDownloader<F, O, P>
where
    F: FileSystem + 'static,
    O: ProgressObserver + 'static,
    P: PageFetcher + 'static,
{
    /// Creates an orchestrator writing into `download_path`.
    #[must_use]
    pub fn new(
        ctx: Arc<DownloadContext<F, O>>,
        fetcher: Arc<P>,
        resolver: Arc<Resolver<P>>,
        download_path: PathBuf,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            ctx,
            fetcher,
            resolver,
            download_path,
            cancel,
        }
    }

    /// Downloads every item in the album, then runs the deferred single-shot
    /// retry pass over whatever failed.
    pub async fn download_album(&self, album: AlbumTask) {
        let total = album.item_pages.len();
        self.ctx.progress.register_overall(&album.album_id, total);

        let semaphore = Arc::new(Semaphore::new(self.ctx.config.max_workers));
        let failed: Arc<Mutex<Vec<FailedDownload>>> = Arc::new(Mutex::new(Vec::new()));

        let mut workers = JoinSet::new();
        for (index, item_page) in album.item_pages.iter().enumerate() {
            // A cancelled run stops spawning; in-flight workers finish on
            // their own terms.
            if self.cancel.is_cancelled() {
                break;
            }
            workers.spawn(Self::execute_item(
                Arc::clone(&self.ctx),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.resolver),
                Arc::clone(&semaphore),
                Arc::clone(&failed),
                self.cancel.clone(),
                album.album_id.clone(),
                item_page.clone(),
                index,
                self.download_path.clone(),
            ));
        }
        while let Some(result) = workers.join_next().await {
            if let Err(e) = result {
                log::error!("item worker panicked: {e}");
            }
        }

        let deferred = {
            let mut failed = failed.lock().expect("failed list lock poisoned");
            std::mem::take(&mut *failed)
        };
        if !deferred.is_empty() && !self.cancel.is_cancelled() {
            self.process_failed_downloads(deferred).await;
        }
    }

    /// One item pipeline: resolve, then download, under a semaphore permit
    /// held for the worker's whole lifetime (released on every exit path).
    #[allow(clippy::too_many_arguments)]
    async fn execute_item(
        ctx: Arc<DownloadContext<F, O>>,
        fetcher: Arc<P>,
        resolver: Arc<Resolver<P>>,
        semaphore: Arc<Semaphore>,
        failed: Arc<Mutex<Vec<FailedDownload>>>,
        cancel: CancellationToken,
        album_id: String,
        item_page: String,
        index: usize,
        download_path: PathBuf,
    ) {
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };
        if cancel.is_cancelled() {
            return;
        }

        let task = ctx.progress.add_item(&album_id, index);
        let item_page = normalize_item_page(&item_page);

        let resolved = match fetcher.fetch_page(&item_page).await {
            Some(document) => resolver.resolve(&item_page, &document).await,
            None => None,
        };
        let Some(resolved) = resolved else {
            // Nothing to download; progress still advances.
            ctx.progress
                .log("No download link", &format!("Nothing to download for {item_page}."));
            ctx.progress.complete_item(task);
            return;
        };

        let job = DownloadJob {
            link: resolved.link,
            filename: resolved.filename,
            task,
        };
        let retries = ctx.config.retries;
        let downloader = MediaDownloader::new(Arc::clone(&ctx), download_path, retries);
        if let Some(failure) = downloader.download(&job).await {
            failed
                .lock()
                .expect("failed list lock poisoned")
                .push(failure);
        }
    }

    /// The deferred pass: each once-failed download gets a retry budget of
    /// exactly one attempt, sequentially (the list is small).
    async fn process_failed_downloads(&self, deferred: Vec<FailedDownload>) {
        for failure in deferred {
            let job = DownloadJob {
                link: failure.link,
                filename: failure.filename,
                task: failure.task,
            };
            let downloader =
                MediaDownloader::new(Arc::clone(&self.ctx), self.download_path.clone(), 1);
            downloader.download(&job).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use crate::fetch::PageDocument;
    use crate::fs::TokioFileSystem;
    use crate::health::HostHealth;
    use crate::media::{Jitter, RandomJitter};
    use crate::progress::ProgressAggregator;
    use crate::resolve::ResolverConfig;
    use crate::session::SessionLog;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tempfile::TempDir;

    /// Serves canned item pages from memory.
    struct CannedFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for CannedFetcher {
        async fn fetch_page(&self, url: &str) -> Option<PageDocument> {
            self.pages.get(url).map(PageDocument::new)
        }
    }

    fn item_page_html(filename: &str) -> String {
        format!(r#"<html><body><video><source src="http://127.0.0.1:1/{filename}"></video></body></html>"#)
    }

    #[allow(clippy::type_complexity)]
    fn make_downloader(
        dir: &TempDir,
        pages: HashMap<String, String>,
        max_workers: usize,
    ) -> AlbumDownloader<TokioFileSystem, crate::progress::NoObserver, CannedFetcher> {
        let fs = Arc::new(TokioFileSystem::new());
        let jitter: Box<dyn Jitter> = Box::new(RandomJitter);
        let ctx = Arc::new(DownloadContext {
            client: reqwest::Client::new(),
            health: HostHealth::new(),
            session_log: SessionLog::new(dir.path().join("session_log.txt"), Arc::clone(&fs)),
            fs,
            progress: ProgressAggregator::new(),
            config: DownloadConfig::default()
                .with_max_workers(max_workers)
                .with_retries(2),
            jitter,
        });
        let fetcher = Arc::new(CannedFetcher { pages });
        let resolver = Arc::new(Resolver::new(
            Arc::clone(&fetcher),
            ctx.client.clone(),
            ResolverConfig::default(),
        ));
        AlbumDownloader::new(
            ctx,
            fetcher,
            resolver,
            dir.path().to_path_buf(),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn album_of_ten_existing_files_completes_fully() {
        let dir = TempDir::new().unwrap();
        let mut pages = HashMap::new();
        for i in 0..10 {
            let page = format!("https://bunkr.si/v/item{i}");
            pages.insert(page, item_page_html(&format!("file{i}.mp4")));
            std::fs::write(dir.path().join(format!("file{i}.mp4")), b"x").unwrap();
        }
        let item_pages: Vec<_> = (0..10)
            .map(|i| format!("https://bunkr.si/v/item{i}"))
            .collect();

        let downloader = make_downloader(&dir, pages, 3);
        downloader
            .download_album(AlbumTask {
                album_id: "album".to_string(),
                item_pages,
            })
            .await;

        assert_eq!(downloader.ctx.progress.overall("album"), Some((10, 10)));
    }

    #[tokio::test]
    async fn unresolvable_items_still_advance_progress() {
        let dir = TempDir::new().unwrap();
        // No canned pages at all: every fetch fails, every item resolves to
        // nothing.
        let downloader = make_downloader(&dir, HashMap::new(), 3);
        downloader
            .download_album(AlbumTask {
                album_id: "album".to_string(),
                item_pages: vec![
                    "https://bunkr.si/v/a".to_string(),
                    "https://bunkr.si/v/b".to_string(),
                ],
            })
            .await;

        assert_eq!(downloader.ctx.progress.overall("album"), Some((2, 2)));
    }

    #[tokio::test]
    async fn failed_items_stay_failed_after_deferred_pass() {
        let dir = TempDir::new().unwrap();
        let mut pages = HashMap::new();
        // One good (pre-existing) file and one that dials a refused port.
        pages.insert(
            "https://bunkr.si/v/good".to_string(),
            item_page_html("good.mp4"),
        );
        pages.insert(
            "https://bunkr.si/v/bad".to_string(),
            item_page_html("bad.mp4"),
        );
        std::fs::write(dir.path().join("good.mp4"), b"x").unwrap();

        let downloader = make_downloader(&dir, pages, 3);
        downloader
            .download_album(AlbumTask {
                album_id: "album".to_string(),
                item_pages: vec![
                    "https://bunkr.si/v/good".to_string(),
                    "https://bunkr.si/v/bad".to_string(),
                ],
            })
            .await;

        // The bad item failed the primary pass (host marked offline) and
        // the deferred pass skipped the dead host: 1 of 2 complete.
        assert_eq!(downloader.ctx.progress.overall("album"), Some((1, 2)));
        assert!(downloader.ctx.health.is_offline("http://127.0.0.1:1/bad.mp4"));
        assert!(!dir.path().join("bad.mp4").exists());
    }

    #[tokio::test]
    async fn cancellation_stops_spawning() {
        let dir = TempDir::new().unwrap();
        let downloader = make_downloader(&dir, HashMap::new(), 1);
        downloader.cancel.cancel();
        downloader
            .download_album(AlbumTask {
                album_id: "album".to_string(),
                item_pages: vec!["https://bunkr.si/v/a".to_string()],
            })
            .await;
        // Nothing ran, so the counter never moved.
        assert_eq!(downloader.ctx.progress.overall("album"), Some((0, 1)));
    }

    #[test]
    fn album_task_preserves_enumeration_order() {
        let task = AlbumTask {
            album_id: "a".to_string(),
            item_pages: vec!["one".to_string(), "two".to_string()],
        };
        assert_eq!(task.item_pages, ["one", "two"]);
    }
}
