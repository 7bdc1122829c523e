//! URL classification and filename handling for album and item pages.
//!
//! Album pages live under `/a/<id>`, item pages under `/v/<slug>` (legacy
//! `/d/` pages are folded into `/v/`). Download links carry the serving
//! subdomain as the first label of their network location.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Maximum byte length of a filename stem after sanitization.
const MAX_STEM_LEN: usize = 120;

static INVALID_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-zA-Z0-9 ._-]").expect("valid regex"));

static INVALID_DIRECTORY_CHARS: LazyLock<Regex> = LazyLock::new(|| {
    let pattern = if cfg!(windows) {
        r#"[\\/:*?"<>|]"#
    } else {
        r"[/:]"
    };
    Regex::new(pattern).expect("valid regex")
});

/// The kind of page a URL points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlKind {
    /// An album page containing multiple item pages.
    Album,
    /// A single item (video/image/file) page.
    Item,
}

/// Classifies a URL as an album or item page.
///
/// Returns `None` when the second-to-last path segment is neither `a` nor
/// one of the item markers.
#[must_use]
pub fn classify_url(url: &str) -> Option<UrlKind> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let _id = segments.next()?;
    match segments.next()? {
        "a" => Some(UrlKind::Album),
        "v" | "d" | "i" | "f" => Some(UrlKind::Item),
        _ => None,
    }
}

/// Extracts the trailing identifier (album id or item slug) from a URL.
#[must_use]
pub fn identifier(url: &str) -> &str {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(url)
}

/// Normalizes an item page URL, folding `/d/` pages into `/v/`.
#[must_use]
pub fn normalize_item_page(url: &str) -> String {
    if matches!(item_marker(url), Some("d")) {
        url.replacen("/d/", "/v/", 1)
    } else {
        url.to_string()
    }
}

/// Returns the item marker segment (`v`, `d`, `i`, ...) of an item page URL.
fn item_marker(url: &str) -> Option<&str> {
    let mut segments = url.trim_end_matches('/').rsplit('/');
    let _id = segments.next()?;
    segments.next()
}

/// Returns the scheme and authority of a URL, used to absolutize the
/// relative `href`s found on album pages.
#[must_use]
pub fn host_page(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    Some(format!("{}://{host}", parsed.scheme()))
}

/// Derives the host-health key for a download link: the lower-cased first
/// label of the network location, with its first letter upper-cased to
/// match the status-page server names.
#[must_use]
pub fn host_key(link: &str) -> Option<String> {
    let parsed = Url::parse(link).ok()?;
    let first_label = parsed.host_str()?.split('.').next()?.to_lowercase();
    let mut chars = first_label.chars();
    let first = chars.next()?;
    Some(first.to_uppercase().chain(chars).collect())
}

/// Extracts the filename from the final path segment of a download link.
#[must_use]
pub fn filename_from_link(link: &str) -> Option<String> {
    let name = link.trim_end_matches('/').rsplit('/').next()?;
    if name.is_empty() {
        return None;
    }
    // Strip any query string left on the segment.
    let name = name.split('?').next().unwrap_or(name);
    Some(name.to_string())
}

/// Sanitizes a filename for the local filesystem: strips characters outside
/// the allowed set from the stem and bounds the stem length, keeping the
/// extension intact. Must run exactly once, before the first existence
/// check, so skip checks and the final path agree.
#[must_use]
pub fn sanitize_filename(filename: &str) -> String {
    let path = Path::new(filename);
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut stem = INVALID_FILENAME_CHARS.replace_all(&stem, "").into_owned();
    let budget = MAX_STEM_LEN.saturating_sub(extension.len());
    if stem.len() > budget {
        let mut cut = budget;
        while cut > 0 && !stem.is_char_boundary(cut) {
            cut -= 1;
        }
        stem.truncate(cut);
    }

    format!("{stem}{extension}")
}

/// Sanitizes a directory name by replacing characters the platform's
/// filesystem rejects with underscores.
#[must_use]
pub fn sanitize_directory_name(name: &str) -> String {
    INVALID_DIRECTORY_CHARS.replace_all(name, "_").into_owned()
}

/// Reconciles an HTML-declared filename with a URL-derived one.
///
/// Identical names are used as-is; when the HTML stem is a substring of the
/// URL stem the (more specific) URL name wins; otherwise the two stems are
/// joined with a hyphen under the HTML name's extension.
#[must_use]
pub fn reconcile_filenames(html_name: &str, url_name: &str) -> String {
    if html_name == url_name {
        return url_name.to_string();
    }

    let html_stem = stem_of(html_name);
    let url_stem = stem_of(url_name);

    if url_stem.contains(html_stem) {
        return url_name.to_string();
    }

    let extension = Path::new(html_name)
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    format!("{html_stem}-{url_stem}{extension}")
}

fn stem_of(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename)
}
