//! CLI mode: argument parsing and the per-URL download pipeline.

mod progress;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::album::{AlbumDownloader, AlbumTask};
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::fetch::{HttpFetcher, PageFetcher, build_download_client, build_http_client};
use crate::fs::TokioFileSystem;
use crate::health::HostHealth;
use crate::media::{DownloadContext, RandomJitter};
use crate::progress::ProgressAggregator;
use crate::resolve::{Resolver, ResolverConfig, album_name, extract_item_pages};
use crate::session::{SESSION_LOG, SessionLog, create_download_directory, format_directory_name};
use crate::urls::{UrlKind, classify_url, host_page, identifier};

use progress::{IndicatifObserver, print_summary};

/// File read for URLs when none are given on the command line.
const URLS_FILE: &str = "URLs.txt";

const DEFAULT_DOWNLOAD_DIR: &str = "downloads";

/// Parsed command-line configuration.
pub struct CliConfig {
    /// URLs to process, in order.
    pub urls: Vec<String>,
    /// Base directory downloads land in.
    pub download_dir: PathBuf,
    /// Download tuning shared by every URL.
    pub download: DownloadConfig,
}

fn split_words(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_arg_list(args: &[String]) -> CliConfig {
    let defaults = DownloadConfig::default();
    let mut urls = Vec::new();
    let mut download_dir = PathBuf::from(DEFAULT_DOWNLOAD_DIR);
    let mut max_workers = defaults.max_workers;
    let mut retries = defaults.retries;
    let mut ignore_list = Vec::new();
    let mut include_list = Vec::new();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-w" | "--max-workers" => {
                i += 1;
                if i < args.len() {
                    max_workers = args[i].parse().unwrap_or(defaults.max_workers);
                }
            }
            "-r" | "--retries" => {
                i += 1;
                if i < args.len() {
                    retries = args[i].parse().unwrap_or(defaults.retries);
                }
            }
            "--ignore" => {
                i += 1;
                if i < args.len() {
                    ignore_list = split_words(&args[i]);
                }
            }
            "--include" => {
                i += 1;
                if i < args.len() {
                    include_list = split_words(&args[i]);
                }
            }
            "-d" | "--dir" => {
                i += 1;
                if i < args.len() {
                    download_dir = PathBuf::from(&args[i]);
                }
            }
            "-h" | "--help" => {
                print_usage();
                std::process::exit(0);
            }
            arg if !arg.starts_with('-') => urls.push(arg.to_string()),
            _ => {
                eprintln!("Unknown option: {}", args[i]);
                std::process::exit(1);
            }
        }
        i += 1;
    }

    CliConfig {
        urls,
        download_dir,
        download: DownloadConfig::new()
            .with_max_workers(max_workers)
            .with_retries(retries)
            .with_ignore_list(ignore_list)
            .with_include_list(include_list),
    }
}

fn parse_args() -> CliConfig {
    let args: Vec<_> = std::env::args().skip(1).collect();
    parse_arg_list(&args)
}

fn print_usage() {
    let defaults = DownloadConfig::default();
    eprintln!("Usage: bunkr-dl [OPTIONS] <url>...");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  <url>                  Album or file URL (reads {URLS_FILE} when omitted)");
    eprintln!();
    eprintln!("Options:");
    eprintln!(
        "  -w, --max-workers <N>  Concurrent downloads per album (default: {})",
        defaults.max_workers
    );
    eprintln!(
        "  -r, --retries <N>      Retry budget per file (default: {})",
        defaults.retries
    );
    eprintln!("      --ignore <WORDS>   Skip filenames containing any comma-separated word");
    eprintln!("      --include <WORDS>  Only keep filenames containing one of the words");
    eprintln!("  -d, --dir <PATH>       Download directory (default: {DEFAULT_DOWNLOAD_DIR})");
    eprintln!("  -h, --help             Show this help");
}

/// Reads the batch file at `path`: one URL per line, blank lines and
/// `#`-comments skipped.
fn read_urls_file(path: &Path) -> Vec<String> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!(
            "{}h {:02}m {:02}s",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    } else if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}.{:01}s", secs, d.subsec_millis() / 100)
    }
}

/// Runs the CLI: every URL from the command line (or `URLs.txt`) is
/// processed in order, each with its own download context.
///
/// # Errors
///
/// Returns an error when no URLs are available, when setup fails, or when
/// the run is interrupted with Ctrl-C.
pub async fn run() -> Result<()> {
    let mut config = parse_args();
    if config.urls.is_empty() {
        config.urls = read_urls_file(Path::new(URLS_FILE));
    }
    if config.urls.is_empty() {
        print_usage();
        return Err(Error::Setup("no URLs provided".to_string()));
    }

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, finishing in-flight downloads");
            watcher.cancel();
        }
    });

    for url in &config.urls {
        if cancel.is_cancelled() {
            break;
        }
        match process_url(url, &config, &cancel).await {
            Ok(()) => {}
            // Setup failures (e.g. the download directory cannot be
            // created) are fatal; anything else moves on to the next URL.
            Err(e @ Error::Setup(_)) => return Err(e),
            Err(e) => log::error!("failed to process {url}: {e}"),
        }
    }

    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}

/// Downloads one URL: an album fans out over its item pages, a direct item
/// link becomes an album of one.
async fn process_url(url: &str, cli: &CliConfig, cancel: &CancellationToken) -> Result<()> {
    let kind = classify_url(url).ok_or_else(|| Error::InvalidUrl {
        url: url.to_string(),
    })?;

    let fs = Arc::new(TokioFileSystem::new());
    let page_client = build_http_client(cli.download.page_timeout)?;
    let download_client = build_download_client(cli.download.download_timeout)?;

    let session_log_path = cli.download_dir.join(SESSION_LOG);
    let fetcher = Arc::new(HttpFetcher::new(
        page_client.clone(),
        Arc::new(SessionLog::new(&session_log_path, Arc::clone(&fs))),
    ));
    let resolver = Arc::new(Resolver::new(
        Arc::clone(&fetcher),
        page_client,
        ResolverConfig::default(),
    ));

    let (album, download_path) = match kind {
        UrlKind::Album => {
            let Some(document) = fetcher.fetch_page(url).await else {
                log::error!("could not fetch album page {url}");
                return Ok(());
            };
            let host = host_page(url).ok_or_else(|| Error::InvalidUrl {
                url: url.to_string(),
            })?;
            let album_id = identifier(url).to_string();
            let directory = format_directory_name(album_name(&document).as_deref(), &album_id);
            let path =
                create_download_directory(fs.as_ref(), &cli.download_dir, Some(&directory))
                    .await?;
            let item_pages = extract_item_pages(&document, &host);
            (
                AlbumTask {
                    album_id,
                    item_pages,
                },
                path,
            )
        }
        UrlKind::Item => {
            let path = create_download_directory(fs.as_ref(), &cli.download_dir, None).await?;
            (
                AlbumTask {
                    album_id: identifier(url).to_string(),
                    item_pages: vec![url.to_string()],
                },
                path,
            )
        }
    };

    let ctx = Arc::new(DownloadContext {
        client: download_client,
        health: HostHealth::new(),
        session_log: SessionLog::new(&session_log_path, Arc::clone(&fs)),
        fs,
        progress: ProgressAggregator::with_observer(IndicatifObserver::new()),
        config: cli.download.clone(),
        jitter: Box::new(RandomJitter),
    });

    let album_id = album.album_id.clone();
    let total = album.item_pages.len();
    let started = Instant::now();

    let downloader = AlbumDownloader::new(
        Arc::clone(&ctx),
        fetcher,
        resolver,
        download_path,
        cancel.clone(),
    );
    downloader.download_album(album).await;

    ctx.progress.observer().finish();
    let completed = ctx.progress.overall(&album_id).map_or(0, |(c, _)| c);
    print_summary(url, completed, total, started.elapsed());
    Ok(())
}
