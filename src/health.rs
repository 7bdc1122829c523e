//! Shared host-health registry.
//!
//! One registry lives for the duration of a run and is consulted by every
//! concurrent media download. Entries are only ever added or overwritten,
//! never removed, so a stale `Operational` entry costs at most one wasted
//! attempt.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::urls::host_key;

/// Operational status of one serving subdomain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostStatus {
    /// The host is believed to be serving downloads.
    Operational,
    /// A download against this host failed with no response or an explicit
    /// server-down signal.
    NonOperational,
}

/// Process-wide map from host subdomain to operational status.
///
/// Shared across workers as `Arc<HostHealth>`; all access goes through the
/// inner mutex.
#[derive(Debug, Default)]
pub struct HostHealth {
    statuses: Mutex<HashMap<String, HostStatus>>,
}

impl HostHealth {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry pre-seeded with known host statuses, e.g. from a
    /// status page scraped at startup.
    #[must_use]
    pub fn with_statuses(statuses: HashMap<String, HostStatus>) -> Self {
        Self {
            statuses: Mutex::new(statuses),
        }
    }

    /// Returns `true` when the host serving `link` is marked non-operational.
    ///
    /// Unknown hosts and unparseable links count as operational; the first
    /// real signal of offline-ness is the attempt itself.
    #[must_use]
    pub fn is_offline(&self, link: &str) -> bool {
        host_key(link).is_some_and(|key| {
            self.statuses
                .lock()
                .expect("host health lock poisoned")
                .get(&key)
                == Some(&HostStatus::NonOperational)
        })
    }

    /// Marks the host serving `link` as non-operational and returns its key.
    ///
    /// Idempotent; repeated marks are harmless overwrites.
    pub fn mark_offline(&self, link: &str) -> Option<String> {
        let key = host_key(link)?;
        self.statuses
            .lock()
            .expect("host health lock poisoned")
            .insert(key.clone(), HostStatus::NonOperational);
        Some(key)
    }
}
