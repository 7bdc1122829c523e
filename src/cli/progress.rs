//! Progress bar rendering for CLI downloads.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::progress::{ProgressObserver, TaskId};

const SEPARATOR: &str = "────────────────────────────────────────────────────────────";

/// Creates a percentage bar for a single file download.
fn make_item_bar(description: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% - {msg}",
        )
        .expect("progress template is valid")
        .progress_chars("━━╌"),
    );
    bar.set_message(description.to_string());
    bar
}

/// Creates the album-level counter bar.
fn make_overall_bar(album_id: &str, total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total.try_into().unwrap_or(u64::MAX));
    bar.set_style(
        ProgressStyle::with_template("Album [{bar:40.green/white}] {pos}/{len} files - {msg}")
            .expect("template valid")
            .progress_chars("━━╌"),
    );
    bar.set_message(album_id.to_string());
    bar
}

/// Renders aggregator events as indicatif bars plus a scrolling event log.
pub struct IndicatifObserver {
    multi: MultiProgress,
    bars: Mutex<Bars>,
}

#[derive(Default)]
struct Bars {
    overall: HashMap<String, ProgressBar>,
    items: HashMap<TaskId, ProgressBar>,
}

impl IndicatifObserver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(Bars::default()),
        }
    }

    /// Clears every remaining bar at the end of a run.
    pub fn finish(&self) {
        let mut bars = self.lock();
        for bar in bars.items.values() {
            bar.finish_and_clear();
        }
        for bar in bars.overall.values() {
            bar.finish_and_clear();
        }
        bars.items.clear();
        bars.overall.clear();
        self.multi.clear().ok();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bars> {
        self.bars.lock().expect("bars lock poisoned")
    }
}

impl Default for IndicatifObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for IndicatifObserver {
    fn on_overall_registered(&self, album_id: &str, total: usize) {
        let bar = self.multi.add(make_overall_bar(album_id, total));
        bar.enable_steady_tick(Duration::from_millis(250));
        self.lock().overall.insert(album_id.to_string(), bar);
    }

    fn on_item_added(&self, task: TaskId, description: &str) {
        let mut bars = self.lock();
        let bar = make_item_bar(description);
        // File bars sit above the album counter.
        let bar = match bars.overall.values().next() {
            Some(overall) => self.multi.insert_before(overall, bar),
            None => self.multi.add(bar),
        };
        bars.items.insert(task, bar);
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn on_item_updated(&self, task: TaskId, percent: f64, visible: bool) {
        let mut bars = self.lock();
        if visible {
            if let Some(bar) = bars.items.get(&task) {
                bar.set_position(percent.clamp(0.0, 100.0) as u64);
            }
        } else if let Some(bar) = bars.items.remove(&task) {
            bar.finish_and_clear();
        }
    }

    fn on_overall_advanced(&self, album_id: &str, completed: usize, _total: usize) {
        if let Some(bar) = self.lock().overall.get(album_id) {
            bar.set_position(completed.try_into().unwrap_or(u64::MAX));
        }
    }

    fn on_log(&self, category: &str, message: &str) {
        let _ = self
            .multi
            .println(format!("{} {message}", style(format!("[{category}]")).yellow()));
    }
}

/// Prints the end-of-run summary for one URL.
pub fn print_summary(url: &str, completed: usize, total: usize, elapsed: Duration) {
    println!("\n{SEPARATOR}");
    println!("  {url}");
    println!(
        "  {completed}/{total} file(s) downloaded in {}",
        super::format_duration(elapsed)
    );
    if completed < total {
        println!(
            "  {} file(s) failed or were skipped; see {} for follow-up",
            total - completed,
            crate::session::SESSION_LOG
        );
    }
    println!("{SEPARATOR}");
}
