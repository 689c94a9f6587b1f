/// Terminal progress reporting for the ingestion stages
use crate::constants::PROGRESS_CHARS;
use indicatif::{ProgressBar, ProgressStyle};

/// Bar over a known number of steps, hidden when disabled.
pub fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("[{bar:40.green/blue}] {pos}/{len} ({percent}%) {msg}")
        .map(|s| s.progress_chars(PROGRESS_CHARS))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb
}

/// Counter for streams of unknown length.
pub fn point_counter(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    let style = ProgressStyle::default_spinner()
        .template("{spinner:.cyan} {pos} points {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    pb.set_style(style);
    pb
}
