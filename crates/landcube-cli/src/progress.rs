use indicatif::{ProgressBar, ProgressStyle};
use landcube_pipeline::{ProgressFn, RunReport, TileStatus};
use std::sync::Arc;
use std::time::Duration;

/// Create a spinner for indeterminate progress
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a progress bar for determinate progress
pub fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    let style = ProgressStyle::default_bar()
        .template("{msg}\n[{bar:40.cyan/blue}] {pos}/{len} tiles ({percent}%) ETA: {eta}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░ ");
    pb.set_style(style);
    pb.set_message(message.to_string());
    pb
}

/// Finish a progress bar with success message
pub fn finish_success(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✓ {}", message));
}

/// Finish a progress bar with error message
pub fn finish_error(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(format!("✗ {}", message));
}

/// Per-tile progress of a pipeline run
pub struct TileProgress {
    bar: ProgressBar,
}

impl TileProgress {
    /// Bar over `total` tiles; hidden when stdout carries JSON
    pub fn new(total: u64, message: &str, hidden: bool) -> Self {
        let bar = if hidden { ProgressBar::hidden() } else { create_progress_bar(total, message) };
        Self { bar }
    }

    /// Callback advancing the bar as tiles finish
    pub fn callback(&self) -> ProgressFn {
        let bar = self.bar.clone();
        Arc::new(move |key, status| {
            match status {
                TileStatus::Succeeded => {}
                TileStatus::Failed => bar.println(format!("✗ tile {} failed", key)),
                TileStatus::Cancelled => bar.println(format!("⊘ tile {} cancelled", key)),
            }
            bar.inc(1);
        })
    }

    pub fn finish(&self, report: &RunReport) {
        let message = format!(
            "{} succeeded, {} failed, {} cancelled in {:.1}s",
            report.success_count(),
            report.failure_count(),
            report.cancelled_count(),
            report.elapsed_secs
        );
        if report.all_succeeded() {
            finish_success(&self.bar, &message);
        } else {
            finish_error(&self.bar, &message);
        }
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}
