//! Progress tracking shared by exporters and the importer.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Progress update information.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// Label of the current phase.
    pub phase: String,

    /// Current item being processed.
    pub current_item: Option<String>,

    /// Items completed in current phase.
    pub completed: u64,

    /// Total items in current phase.
    pub total: u64,

    /// Optional message.
    pub message: Option<String>,
}

/// Progress tracker.
///
/// Phases are plain labels so the exporter and importer can each use their
/// own phase enum through its `Display` impl.
pub struct Progress {
    phase: RwLock<String>,
    completed: AtomicU64,
    total: AtomicU64,
    callback: Option<Arc<ProgressCallback>>,
}

impl Progress {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            phase: RwLock::new(String::new()),
            completed: AtomicU64::new(0),
            total: AtomicU64::new(0),
            callback: None,
        }
    }

    /// Create a progress tracker with a callback.
    pub fn with_callback(callback: ProgressCallback) -> Self {
        Self {
            callback: Some(Arc::new(callback)),
            ..Self::new()
        }
    }

    /// Set the current phase.
    pub fn set_phase(&self, phase: impl std::fmt::Display, total: u64) {
        *self.phase.write() = phase.to_string();
        self.completed.store(0, Ordering::SeqCst);
        self.total.store(total, Ordering::SeqCst);
        self.notify(None, None);
    }

    /// Increment progress.
    pub fn increment(&self, item: Option<&str>) {
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.notify(item.map(|s| s.to_string()), None);
    }

    /// Set a message.
    pub fn message(&self, msg: &str) {
        self.notify(None, Some(msg.to_string()));
    }

    /// Get current progress percentage.
    pub fn percentage(&self) -> f64 {
        let total = self.total.load(Ordering::SeqCst);
        if total == 0 {
            return 0.0;
        }
        let completed = self.completed.load(Ordering::SeqCst);
        (completed as f64 / total as f64) * 100.0
    }

    /// Get current phase label.
    pub fn current_phase(&self) -> String {
        self.phase.read().clone()
    }

    fn notify(&self, current_item: Option<String>, message: Option<String>) {
        if let Some(callback) = &self.callback {
            let update = ProgressUpdate {
                phase: self.current_phase(),
                current_item,
                completed: self.completed.load(Ordering::SeqCst),
                total: self.total.load(Ordering::SeqCst),
                message,
            };
            callback(update);
        }
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_tracker() {
        let progress = Progress::new();

        progress.set_phase("Exporting test cases", 10);
        assert_eq!(progress.current_phase(), "Exporting test cases");
        assert_eq!(progress.percentage(), 0.0);

        progress.increment(Some("C1"));
        assert!((progress.percentage() - 10.0).abs() < 0.01);

        for _ in 0..9 {
            progress.increment(None);
        }
        assert!((progress.percentage() - 100.0).abs() < 0.01);
    }

    #[test]
    fn test_progress_with_callback() {
        use std::sync::atomic::AtomicUsize;
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let progress = Progress::with_callback(Box::new(move |update| {
            assert!(!update.phase.is_empty());
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        }));

        progress.set_phase("Sections", 5);
        progress.increment(None);
        progress.message("halfway");

        assert_eq!(call_count.load(Ordering::SeqCst), 3);
    }
}
