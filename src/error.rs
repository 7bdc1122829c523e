//! Error types for the bunkr-dl library.

use thiserror::Error;

/// Errors that can occur during crawl and download operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A URL did not match any known album or item page shape.
    #[error("unrecognized URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// Setup-level failure that aborts the whole run (e.g. the download
    /// directory cannot be created).
    #[error("setup failed: {0}")]
    Setup(String),

    /// The run was interrupted by the user.
    #[error("cancelled")]
    Cancelled,
}

/// A specialized `Result` type for bunkr-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
