//! Terminal progress rendering.

use indicatif::{ProgressBar, ProgressStyle};
use tms_models::{ProgressCallback, ProgressUpdate};

/// Progress bar driven by [`tms_models::Progress`] updates.
pub struct ConsoleProgressReporter {
    progress_bar: ProgressBar,
}

impl ConsoleProgressReporter {
    /// Create a new console progress reporter.
    pub fn new() -> Self {
        Self::with_bar(ProgressBar::new(0))
    }

    /// A reporter that renders nothing, for non-interactive output.
    pub fn hidden() -> Self {
        Self::with_bar(ProgressBar::hidden())
    }

    fn with_bar(progress_bar: ProgressBar) -> Self {
        if let Ok(style) = ProgressStyle::default_bar().template(
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}",
        ) {
            progress_bar.set_style(style.progress_chars("#>-"));
        }
        Self { progress_bar }
    }

    /// Create a progress callback for an exporter or the importer.
    pub fn callback(&self) -> ProgressCallback {
        let pb = self.progress_bar.clone();
        Box::new(move |update: ProgressUpdate| {
            pb.set_length(update.total);
            pb.set_position(update.completed);
            pb.set_message(render_message(&update));
        })
    }

    /// Finish the progress bar.
    pub fn finish(&self, message: &str) {
        self.progress_bar.finish_with_message(message.to_string());
    }

    /// Position and length of the bar.
    pub fn position(&self) -> (u64, Option<u64>) {
        (self.progress_bar.position(), self.progress_bar.length())
    }
}

impl Default for ConsoleProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

fn render_message(update: &ProgressUpdate) -> String {
    let mut msg = update.phase.clone();
    if let Some(item) = &update.current_item {
        msg = format!("{msg}: {item}");
    }
    if let Some(message) = &update.message {
        msg = format!("{msg} - {message}");
    }
    msg
}
