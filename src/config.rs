//! Configuration types for download operations.

use std::time::Duration;

/// Configuration for album and media download operations.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Maximum number of in-flight item pipelines per album.
    pub max_workers: usize,
    /// Retry budget for a single media download (primary pass).
    pub retries: u32,
    /// Substrings that cause a filename to be skipped.
    pub ignore_list: Vec<String>,
    /// If non-empty, a filename must contain one of these substrings.
    pub include_list: Vec<String>,
    /// Per-request timeout for page fetches.
    pub page_timeout: Duration,
    /// Per-request timeout for download attempts.
    pub download_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            max_workers: 5,
            retries: 5,
            ignore_list: Vec::new(),
            include_list: Vec::new(),
            page_timeout: Duration::from_secs(40),
            download_timeout: Duration::from_secs(30),
        }
    }
}

impl DownloadConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of concurrent item pipelines.
    #[must_use]
    pub const fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers;
        self
    }

    /// Sets the primary-pass retry budget.
    #[must_use]
    pub const fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Sets the ignore-list substrings.
    #[must_use]
    pub fn with_ignore_list(mut self, words: Vec<String>) -> Self {
        self.ignore_list = words;
        self
    }

    /// Sets the include-list substrings.
    #[must_use]
    pub fn with_include_list(mut self, words: Vec<String>) -> Self {
        self.include_list = words;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = DownloadConfig::default();
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.retries, 5);
        assert!(config.ignore_list.is_empty());
        assert!(config.include_list.is_empty());
    }

    #[test]
    fn builder_pattern() {
        let config = DownloadConfig::new()
            .with_max_workers(3)
            .with_retries(1)
            .with_ignore_list(vec!["sample".into()])
            .with_include_list(vec!["1080p".into()]);

        assert_eq!(config.max_workers, 3);
        assert_eq!(config.retries, 1);
        assert_eq!(config.ignore_list, ["sample"]);
        assert_eq!(config.include_list, ["1080p"]);
    }
}
