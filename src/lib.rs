//! bunkr-dl - A library for downloading albums and files from Bunkr hosts.
//!
//! The library resolves album and item pages into direct download links
//! (including the XOR-encrypted resolution API), streams media to disk in
//! size-tuned chunks, and orchestrates whole albums over a bounded worker
//! pool with a single deferred retry pass. It is UI-free; rendering hooks
//! in through [`ProgressObserver`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bunkr_dl::album::{AlbumDownloader, AlbumTask};
//! use bunkr_dl::fetch::{HttpFetcher, build_download_client, build_http_client};
//! use bunkr_dl::media::{DownloadContext, RandomJitter};
//! use bunkr_dl::resolve::{Resolver, ResolverConfig};
//! use bunkr_dl::session::SessionLog;
//! use bunkr_dl::{DownloadConfig, HostHealth, ProgressAggregator, TokioFileSystem};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> bunkr_dl::Result<()> {
//! let config = DownloadConfig::default();
//! let fs = Arc::new(TokioFileSystem::new());
//!
//! let page_client = build_http_client(config.page_timeout)?;
//! let fetcher = Arc::new(HttpFetcher::new(
//!     page_client.clone(),
//!     Arc::new(SessionLog::new("session_log.txt", Arc::clone(&fs))),
//! ));
//! let resolver = Arc::new(Resolver::new(
//!     Arc::clone(&fetcher),
//!     page_client,
//!     ResolverConfig::default(),
//! ));
//!
//! let ctx = Arc::new(DownloadContext {
//!     client: build_download_client(config.download_timeout)?,
//!     health: HostHealth::new(),
//!     session_log: SessionLog::new("session_log.txt", Arc::clone(&fs)),
//!     fs,
//!     progress: ProgressAggregator::new(),
//!     config,
//!     jitter: Box::new(RandomJitter),
//! });
//!
//! let downloader = AlbumDownloader::new(
//!     ctx,
//!     fetcher,
//!     resolver,
//!     "downloads".into(),
//!     CancellationToken::new(),
//! );
//! downloader
//!     .download_album(AlbumTask {
//!         album_id: "v4RxKtzq".to_string(),
//!         item_pages: vec!["https://bunkr.si/v/clip-abc".to_string()],
//!     })
//!     .await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod album;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod health;
pub mod media;
pub mod progress;
pub mod resolve;
pub mod session;
pub mod urls;
pub mod writer;

#[cfg(feature = "cli")]
pub mod cli;

// Re-export main types for convenience
pub use album::{AlbumDownloader, AlbumTask};
pub use config::DownloadConfig;
pub use error::{Error, Result};
pub use fetch::{HttpFetcher, PageDocument, PageFetcher};
pub use fs::{FileSystem, TokioFileSystem};
pub use health::{HostHealth, HostStatus};
pub use media::{DownloadContext, DownloadJob, FailedDownload, MediaDownloader};
pub use progress::{NoObserver, ProgressAggregator, ProgressObserver, TaskId};
pub use resolve::{ResolvedLink, Resolver, ResolverConfig};
