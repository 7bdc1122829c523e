//! Progress aggregation for album downloads.
//!
//! The aggregator is UI-free: it maintains one overall counter per album
//! plus a bounded window of visible per-item trackers, and notifies an
//! observer of every change. Rendering (progress bars, log tables) hooks in
//! through [`ProgressObserver`].

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Handle identifying one per-item tracker.
pub type TaskId = u64;

/// Maximum number of per-item trackers visible at once.
const VISIBLE_WINDOW: usize = 5;

/// Trait for receiving progress updates.
///
/// All methods have default no-op implementations for convenience.
pub trait ProgressObserver: Send + Sync {
    /// Called when an album's overall counter is registered.
    fn on_overall_registered(&self, _album_id: &str, _total: usize) {}

    /// Called when a per-item tracker is created.
    fn on_item_added(&self, _task: TaskId, _description: &str) {}

    /// Called when a per-item tracker's percentage or visibility changes.
    fn on_item_updated(&self, _task: TaskId, _percent: f64, _visible: bool) {}

    /// Called when an album's overall counter advances.
    fn on_overall_advanced(&self, _album_id: &str, _completed: usize, _total: usize) {}

    /// Called for structured log events (category + message).
    fn on_log(&self, _category: &str, _message: &str) {}
}

/// A null observer that ignores all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoObserver;

impl ProgressObserver for NoObserver {}

#[derive(Debug)]
struct OverallCounter {
    completed: usize,
    total: usize,
}

#[derive(Debug)]
struct ItemTracker {
    album_id: String,
    percent: f64,
    visible: bool,
    finished: bool,
}

#[derive(Debug, Default)]
struct Inner {
    next_task: TaskId,
    overall: HashMap<String, OverallCounter>,
    items: HashMap<TaskId, ItemTracker>,
    visible: VecDeque<TaskId>,
}

/// Tracks overall and per-item progress across concurrent workers.
///
/// Every mutation happens under one mutex, so the finish-and-advance
/// transition is atomic: each item advances its album's overall counter
/// exactly once, and `completed <= total` always holds.
pub struct ProgressAggregator<O: ProgressObserver = NoObserver> {
    inner: Mutex<Inner>,
    observer: O,
}

impl ProgressAggregator<NoObserver> {
    /// Creates an aggregator with no observer attached.
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer(NoObserver)
    }
}

impl Default for ProgressAggregator<NoObserver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<O: ProgressObserver> ProgressAggregator<O> {
    /// Creates an aggregator that forwards every change to `observer`.
    #[must_use]
    pub fn with_observer(observer: O) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            observer,
        }
    }

    /// Registers an album-level counter sized to `total` items.
    pub fn register_overall(&self, album_id: &str, total: usize) {
        let mut inner = self.lock();
        inner.overall.insert(
            album_id.to_string(),
            OverallCounter {
                completed: 0,
                total,
            },
        );
        drop(inner);
        self.observer.on_overall_registered(album_id, total);
    }

    /// Creates a per-item tracker numbered by enumeration order.
    ///
    /// The oldest visible tracker is hidden once more than the window size
    /// are on screen.
    pub fn add_item(&self, album_id: &str, index: usize) -> TaskId {
        let mut inner = self.lock();
        let task = inner.next_task;
        inner.next_task += 1;

        let total = inner.overall.get(album_id).map_or(0, |c| c.total);
        inner.items.insert(
            task,
            ItemTracker {
                album_id: album_id.to_string(),
                percent: 0.0,
                visible: true,
                finished: false,
            },
        );
        inner.visible.push_back(task);
        let evicted = if inner.visible.len() > VISIBLE_WINDOW {
            inner.visible.pop_front()
        } else {
            None
        };
        let mut evicted_update = None;
        if let Some(old) = evicted
            && let Some(tracker) = inner.items.get_mut(&old)
        {
            tracker.visible = false;
            evicted_update = Some((old, tracker.percent));
        }
        drop(inner);

        let description = format!("File {}/{total}", index + 1);
        self.observer.on_item_added(task, &description);
        if let Some((old, percent)) = evicted_update {
            self.observer.on_item_updated(old, percent, false);
        }
        task
    }

    /// Updates an item's cumulative percentage.
    ///
    /// The first time a tracker reaches 100% it is hidden and its album's
    /// overall counter advances by exactly one; later updates are no-ops on
    /// the overall counter.
    pub fn update_item(&self, task: TaskId, percent: f64) {
        let percent = percent.clamp(0.0, 100.0);
        let mut inner = self.lock();
        let Some(tracker) = inner.items.get_mut(&task) else {
            return;
        };
        tracker.percent = tracker.percent.max(percent);
        let finished_now = percent >= 100.0 && !tracker.finished;
        if finished_now {
            tracker.finished = true;
            tracker.visible = false;
        }
        let album_id = tracker.album_id.clone();
        let visible = tracker.visible;
        let shown = tracker.percent;

        let advanced = if finished_now {
            inner.overall.get_mut(&album_id).map(|counter| {
                counter.completed = (counter.completed + 1).min(counter.total);
                (counter.completed, counter.total)
            })
        } else {
            None
        };
        if finished_now {
            inner.visible.retain(|t| *t != task);
        }
        drop(inner);

        self.observer.on_item_updated(task, shown, visible);
        if let Some((completed, total)) = advanced {
            self.observer.on_overall_advanced(&album_id, completed, total);
        }
    }

    /// Marks an item complete (skip path): jumps it to 100% and advances
    /// the overall counter once.
    pub fn complete_item(&self, task: TaskId) {
        self.update_item(task, 100.0);
    }

    /// Hides an item without completing it (terminal failure path).
    pub fn hide_item(&self, task: TaskId) {
        let mut inner = self.lock();
        if let Some(tracker) = inner.items.get_mut(&task) {
            tracker.visible = false;
        }
        inner.visible.retain(|t| *t != task);
        let percent = inner.items.get(&task).map_or(0.0, |t| t.percent);
        drop(inner);
        self.observer.on_item_updated(task, percent, false);
    }

    /// Emits a structured log event.
    pub fn log(&self, category: &str, message: &str) {
        log::info!("[{category}] {message}");
        self.observer.on_log(category, message);
    }

    /// Returns an album's `(completed, total)` snapshot.
    #[must_use]
    pub fn overall(&self, album_id: &str) -> Option<(usize, usize)> {
        self.lock()
            .overall
            .get(album_id)
            .map(|c| (c.completed, c.total))
    }

    /// Returns the currently visible task ids, oldest first.
    #[must_use]
    pub fn visible_items(&self) -> Vec<TaskId> {
        self.lock().visible.iter().copied().collect()
    }

    /// Returns the attached observer.
    pub const fn observer(&self) -> &O {
        &self.observer
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("progress lock poisoned")
    }
}
