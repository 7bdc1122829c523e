//! Session log and download-directory setup.
//!
//! The session log is a flat, append-only list of problematic links (one
//! URL per line). It is an operator audit trail only; nothing in the
//! program reads it back.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::fs::FileSystem;
use crate::urls::sanitize_directory_name;

/// Default name of the per-run log of problematic links.
pub const SESSION_LOG: &str = "session_log.txt";

/// Append-only log of links that need manual follow-up.
pub struct SessionLog<F: FileSystem> {
    path: PathBuf,
    fs: Arc<F>,
}

impl<F: FileSystem> SessionLog<F> {
    /// Creates a session log writing to `path`.
    pub fn new(path: impl Into<PathBuf>, fs: Arc<F>) -> Self {
        Self {
            path: path.into(),
            fs,
        }
    }

    /// Appends one link to the log.
    ///
    /// Failures are logged and swallowed: losing an audit line must never
    /// abort a download.
    pub async fn record(&self, link: &str) {
        match self.fs.open_append(&self.path).await {
            Ok(mut file) => {
                if let Err(e) = file.write_all(format!("{link}\n").as_bytes()).await {
                    log::warn!("failed to write session log entry: {e}");
                }
                if let Err(e) = file.flush().await {
                    log::warn!("failed to flush session log entry: {e}");
                }
            }
            Err(e) => log::warn!("failed to open session log {}: {e}", self.path.display()),
        }
    }
}

/// Builds the album directory name: sanitized `"{name} ({id})"` when the
/// page declared a name, the bare id otherwise.
#[must_use]
pub fn format_directory_name(album_name: Option<&str>, album_id: &str) -> String {
    match album_name {
        Some(name) => sanitize_directory_name(&format!("{name} ({album_id})")),
        None => sanitize_directory_name(album_id),
    }
}

/// Creates the download directory (recursively) and returns its path.
///
/// # Errors
///
/// Returns [`Error::Setup`] when the directory cannot be created; this is
/// fatal to the run.
pub async fn create_download_directory<F: FileSystem>(
    fs: &F,
    base: &Path,
    subdirectory: Option<&str>,
) -> Result<PathBuf> {
    let path = match subdirectory {
        Some(sub) => base.join(sub),
        None => base.to_path_buf(),
    };
    fs.create_dir_all(&path)
        .await
        .map_err(|e| Error::Setup(format!("cannot create {}: {e}", path.display())))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::TokioFileSystem;
    use tempfile::TempDir;

    #[tokio::test]
    async fn record_appends_one_line_per_link() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(SESSION_LOG);
        let log = SessionLog::new(&path, Arc::new(TokioFileSystem::new()));

        log.record("https://bunkr.si/v/one").await;
        log.record("https://bunkr.si/v/two").await;

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "https://bunkr.si/v/one\nhttps://bunkr.si/v/two\n");
    }

    #[test]
    fn directory_name_with_album_name() {
        assert_eq!(
            format_directory_name(Some("My Album"), "v4RxKtzq"),
            "My Album (v4RxKtzq)"
        );
    }

    #[test]
    fn directory_name_without_album_name() {
        assert_eq!(format_directory_name(None, "v4RxKtzq"), "v4RxKtzq");
    }

    #[tokio::test]
    async fn create_directory_recursively() {
        let dir = TempDir::new().unwrap();
        let fs = TokioFileSystem::new();
        let path = create_download_directory(&fs, &dir.path().join("a/b"), Some("album"))
            .await
            .unwrap();
        assert!(path.ends_with("a/b/album"));
        assert!(path.exists());
    }
}
