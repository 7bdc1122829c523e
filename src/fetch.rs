//! Page fetching and HTML document access.
//!
//! [`PageDocument`] owns the raw page body and answers selector queries by
//! parsing on demand. `scraper::Html` is not `Send`, so parsing always
//! happens inside a synchronous scope and only owned strings cross await
//! points.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use scraper::{Html, Selector};

use crate::fs::FileSystem;
use crate::session::SessionLog;

/// Browser-like User-Agent sent with every request.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:109.0) Gecko/20100101 Firefox/117.0";

/// Referer expected by the download hosts.
pub const DOWNLOAD_REFERER: &str = "https://get.bunkrr.su/";

const FETCH_RETRIES: u32 = 5;

/// A fetched page body with selector-based access.
#[derive(Debug, Clone)]
pub struct PageDocument {
    html: String,
}

impl PageDocument {
    /// Wraps a raw HTML body.
    #[must_use]
    pub fn new(html: impl Into<String>) -> Self {
        Self { html: html.into() }
    }

    /// Returns the value of `attr` on the first element matching `selector`.
    #[must_use]
    pub fn select_attr(&self, selector: &str, attr: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        let document = Html::parse_document(&self.html);
        document
            .select(&selector)
            .find_map(|el| el.value().attr(attr))
            .map(str::to_string)
    }

    /// Returns the value of `attr` for every element matching `selector`.
    #[must_use]
    pub fn select_all_attr(&self, selector: &str, attr: &str) -> Vec<String> {
        let Ok(selector) = Selector::parse(selector) else {
            return Vec::new();
        };
        let document = Html::parse_document(&self.html);
        document
            .select(&selector)
            .filter_map(|el| el.value().attr(attr))
            .map(str::to_string)
            .collect()
    }

    /// Returns the trimmed text of the first element matching `selector`.
    #[must_use]
    pub fn select_text(&self, selector: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        let document = Html::parse_document(&self.html);
        document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }

    /// Returns the bodies of all inline `<script>` elements.
    #[must_use]
    pub fn script_texts(&self) -> Vec<String> {
        let Ok(selector) = Selector::parse("script") else {
            return Vec::new();
        };
        let document = Html::parse_document(&self.html);
        document
            .select(&selector)
            .map(|el| el.text().collect::<String>())
            .collect()
    }
}

/// Trait for fetching and parsing pages.
///
/// Implementations return `None` on unrecoverable failure; callers treat a
/// missing document as "nothing to resolve" rather than an error.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the page at `url`, or `None` if it cannot be retrieved.
    async fn fetch_page(&self, url: &str) -> Option<PageDocument>;
}

/// HTTP page fetcher with bounded retries for transport-level disconnects.
pub struct HttpFetcher<F: FileSystem> {
    client: reqwest::Client,
    session_log: Arc<SessionLog<F>>,
}

impl<F: FileSystem> HttpFetcher<F> {
    /// Creates a fetcher using `client` for requests.
    ///
    /// Pages that come back 500/502/403 are recorded in the session log.
    #[must_use]
    pub fn new(client: reqwest::Client, session_log: Arc<SessionLog<F>>) -> Self {
        Self {
            client,
            session_log,
        }
    }

    async fn handle_response(&self, url: &str, response: reqwest::Response) -> Option<PageDocument> {
        let status = response.status().as_u16();
        let problem = match status {
            500 => Some("internal server error"),
            502 => Some("bad gateway, host probably offline"),
            403 => Some("request blocked by DDoS protection"),
            _ => None,
        };
        if let Some(problem) = problem {
            log::warn!("{problem} fetching {url}, check the log file");
            self.session_log.record(url).await;
            return None;
        }
        if !response.status().is_success() {
            log::warn!("fetching {url} returned HTTP {status}");
            return None;
        }
        let body = response.text().await.ok()?;
        Some(PageDocument::new(body))
    }
}

#[async_trait]
impl<F: FileSystem> PageFetcher for HttpFetcher<F> {
    async fn fetch_page(&self, url: &str) -> Option<PageDocument> {
        for attempt in 0..FETCH_RETRIES {
            match self.client.get(url).send().await {
                Ok(response) => return self.handle_response(url, response).await,
                Err(e) if is_transport_error(&e) => {
                    log::warn!(
                        "no response from {url}, retrying in a moment ({}/{FETCH_RETRIES})",
                        attempt + 1
                    );
                    if attempt + 1 < FETCH_RETRIES {
                        tokio::time::sleep(fetch_backoff(attempt)).await;
                    }
                }
                Err(e) => {
                    log::warn!("request error for {url}: {e}");
                    return None;
                }
            }
        }
        None
    }
}

/// Classifies a send error as a retryable transport failure.
///
/// Refused connections and timeouts are the obvious cases, but a peer that
/// accepts the request and then closes the socket before responding
/// surfaces as a generic request error, so anything that is not a
/// builder, redirect, status, decode, or body problem counts as transport.
fn is_transport_error(e: &reqwest::Error) -> bool {
    e.is_connect()
        || e.is_timeout()
        || !(e.is_builder() || e.is_redirect() || e.is_status() || e.is_decode() || e.is_body())
}

/// Backoff before fetch retry `attempt`: `2^(attempt+1)` seconds plus up to
/// one second of jitter against retry storms.
fn fetch_backoff(attempt: u32) -> Duration {
    let base = 2_f64.powi(attempt.saturating_add(1).cast_signed());
    Duration::from_secs_f64(base + rand::rng().random_range(0.0..1.0))
}

/// Builds the HTTP client used for page fetches and download attempts.
///
/// # Errors
///
/// Returns a [`reqwest::Error`] if the TLS backend fails to initialize.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}

/// Builds the HTTP client used for media downloads.
///
/// Only the connection attempt is bounded; a whole-request timeout would
/// cut off large transfers that are still streaming.
///
/// # Errors
///
/// Returns a [`reqwest::Error`] if the TLS backend fails to initialize.
pub fn build_download_client(connect_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(connect_timeout)
        .pool_idle_timeout(Duration::from_secs(60))
        .tcp_keepalive(Duration::from_secs(30))
        .build()
}
