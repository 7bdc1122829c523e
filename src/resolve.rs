//! Resolution of item pages into direct download links.
//!
//! Three strategies, tried in order: a static media element on the page, a
//! two-stage hop through the page's download button, and finally the
//! resolution API, whose response carries a base64 ciphertext XOR-encoded
//! with an hourly-rotated key.

use std::sync::Arc;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use regex::Regex;
use serde::Deserialize;

use crate::fetch::{PageDocument, PageFetcher};
use crate::urls::{
    filename_from_link, identifier, reconcile_filenames, sanitize_filename,
};

/// Default endpoint of the link-resolution API.
pub const DEFAULT_API_ENDPOINT: &str = "https://bunkr.cr/api/vs";

// Tailwind class soup; matched by exact attribute value so the colons in
// the class names never reach the selector parser.
const ITEM_PAGE_SELECTOR: &str = r#"a[class="after:absolute after:z-10 after:inset-0"][href]"#;
const IMAGE_SELECTOR: &str =
    r#"img[class="max-h-full w-auto object-cover relative z-20"][src]"#;
const DOWNLOAD_BUTTON_SELECTOR: &str = r#"a[class="btn btn-main btn-lg rounded-full px-6 font-semibold flex-1 ic-download-01 ic-before before:text-lg"][href]"#;
const FINAL_DOWNLOAD_BUTTON_SELECTOR: &str = r#"a[class="btn btn-main btn-lg rounded-full px-6 font-semibold ic-download-01 ic-before before:text-lg"][href]"#;
const ALBUM_NAME_SELECTOR: &str =
    r#"div[class="text-subs font-semibold flex text-base sm:text-lg"] h1"#;

static WELL_FORMED_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static SCRIPT_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"slug\s*[:=]\s*["']([A-Za-z0-9_-]+)["']"#).expect("valid regex"));

/// A resolved download target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLink {
    /// Direct download URL.
    pub link: String,
    /// Sanitized filename, fixed before any existence check.
    pub filename: String,
}

/// Payload returned by the resolution API.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    timestamp: i64,
    url: String,
}

/// Resolver configuration.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Endpoint receiving `POST {"slug": ...}`.
    pub api_endpoint: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
        }
    }
}

/// Resolves item pages to `(download link, filename)` pairs.
pub struct Resolver<P: PageFetcher> {
    fetcher: Arc<P>,
    client: reqwest::Client,
    config: ResolverConfig,
}

impl<P: PageFetcher> Resolver<P> {
    /// Creates a resolver sharing `client` for API calls.
    #[must_use]
    pub fn new(fetcher: Arc<P>, client: reqwest::Client, config: ResolverConfig) -> Self {
        Self {
            fetcher,
            client,
            config,
        }
    }

    /// Resolves one item page into a download link and filename.
    ///
    /// Returns `None` when no link can be produced; the caller treats that
    /// as "nothing to download" and advances progress without retry.
    pub async fn resolve(&self, item_url: &str, document: &PageDocument) -> Option<ResolvedLink> {
        let link = match self.static_link(document).await {
            Some(link) => link,
            None => self.api_link(item_url, document).await?,
        };

        let url_name = filename_from_link(&link)?;
        let filename = match document.select_text("h1") {
            Some(html_name) if !html_name.is_empty() => {
                reconcile_filenames(&html_name, &url_name)
            }
            _ => url_name,
        };

        Some(ResolvedLink {
            link,
            filename: sanitize_filename(&filename),
        })
    }

    /// Static extraction: a `<source>` or known image element, falling back
    /// to the two-stage download-button hop.
    async fn static_link(&self, document: &PageDocument) -> Option<String> {
        if let Some(src) = document.select_attr("source[src]", "src") {
            return Some(src);
        }
        if let Some(src) = document.select_attr(IMAGE_SELECTOR, "src") {
            return Some(src);
        }
        self.button_link(document).await
    }

    /// Follows the page's download button one hop deeper to the final
    /// download link.
    async fn button_link(&self, document: &PageDocument) -> Option<String> {
        let intermediate = document.select_attr(DOWNLOAD_BUTTON_SELECTOR, "href")?;
        let next_page = self.fetcher.fetch_page(&intermediate).await?;
        next_page.select_attr(FINAL_DOWNLOAD_BUTTON_SELECTOR, "href")
    }

    /// API-backed resolution: slug → `POST` → decrypt.
    async fn api_link(&self, item_url: &str, document: &PageDocument) -> Option<String> {
        let slug = extract_slug(item_url, document)?;

        let response = self
            .client
            .post(&self.config.api_endpoint)
            .json(&serde_json::json!({ "slug": slug }))
            .send()
            .await
            .map_err(|e| log::warn!("error requesting encryption data for '{slug}': {e}"))
            .ok()?;
        if !response.status().is_success() {
            log::warn!("failed to fetch encryption data for slug '{slug}'");
            return None;
        }

        let payload: ApiResponse = response
            .json()
            .await
            .map_err(|e| log::warn!("malformed encryption payload for '{slug}': {e}"))
            .ok()?;
        decrypt_url(payload.timestamp, &payload.url)
    }
}

/// Extracts item page URLs from an album page, absolutized against
/// `host_page`.
#[must_use]
pub fn extract_item_pages(document: &PageDocument, host_page: &str) -> Vec<String> {
    let items = document.select_all_attr(ITEM_PAGE_SELECTOR, "href");
    if items.is_empty() {
        log::warn!("no item pages found in the album page");
    }
    items
        .into_iter()
        .map(|href| {
            if href.starts_with("http") {
                href
            } else {
                format!("{host_page}{href}")
            }
        })
        .collect()
}

/// Extracts the album name declared on an album page, if any.
#[must_use]
pub fn album_name(document: &PageDocument) -> Option<String> {
    document
        .select_text(ALBUM_NAME_SELECTOR)
        .filter(|name| !name.is_empty())
}

/// Computes the API slug for an item page: the URL's trailing path segment
/// when it is a well-formed slug, otherwise a regex scan of the page's
/// inline scripts.
#[must_use]
pub fn extract_slug(item_url: &str, document: &PageDocument) -> Option<String> {
    let candidate = identifier(item_url);
    if WELL_FORMED_SLUG.is_match(candidate) {
        return Some(candidate.to_string());
    }
    document.script_texts().iter().find_map(|script| {
        SCRIPT_SLUG
            .captures(script)
            .map(|caps| caps[1].to_string())
    })
}

/// Decrypts the API ciphertext: the key is `"SECRET_KEY_{timestamp/3600}"`
/// (floor division; the key rotates hourly, so the timestamp must come
/// from the API response, not wall-clock time), XORed cyclically over the
/// base64-decoded bytes.
#[must_use]
pub fn decrypt_url(timestamp: i64, encrypted: &str) -> Option<String> {
    let encrypted_bytes = BASE64
        .decode(encrypted)
        .map_err(|e| log::warn!("ciphertext is not valid base64: {e}"))
        .ok()?;

    let secret_key = format!("SECRET_KEY_{}", timestamp.div_euclid(3600));
    let decrypted: Vec<u8> = encrypted_bytes
        .iter()
        .zip(secret_key.bytes().cycle())
        .map(|(byte, key_byte)| byte ^ key_byte)
        .collect();

    Some(String::from_utf8_lossy(&decrypted).into_owned())
}
