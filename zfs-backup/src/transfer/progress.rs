//! Live progress for a running transfer.
//!
//! Tracks bytes through the pipeline, derives speed and an ETA when the
//! size estimate is known, and renders a single status line.

use crate::transfer::progress_stream::ProgressCallback;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// Snapshot of a transfer in progress
#[derive(Debug, Clone, Default)]
pub struct TransferProgress {
    /// Expected size, when the estimator produced one
    pub total_bytes: Option<u64>,

    pub transferred_bytes: u64,

    /// Current transfer speed in bytes/second
    pub bytes_per_second: u64,

    /// Estimated time remaining (seconds), only with a known total
    pub eta_seconds: Option<u64>,
}

impl TransferProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            total_bytes,
            ..Default::default()
        }
    }

    /// Percentage complete, capped at 100 since estimates can undershoot
    pub fn percent_complete(&self) -> Option<f64> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some(((self.transferred_bytes as f64 / total as f64) * 100.0).min(100.0))
            }
            _ => None,
        }
    }

    /// One-line rendering, e.g. `1.50 GB  120.00 MB/s  37%  ETA 21s`
    pub fn render(&self) -> String {
        let mut line = format!(
            "{}  {}",
            format_bytes(self.transferred_bytes),
            format_speed(self.bytes_per_second)
        );
        if let Some(percent) = self.percent_complete() {
            line.push_str(&format!("  {:.0}%", percent));
        }
        if let Some(eta) = self.eta_seconds {
            line.push_str(&format!("  ETA {}", format_duration(eta)));
        }
        line
    }
}

/// Progress tracker with time-based speed calculation
pub struct ProgressTracker {
    last_update_time: Instant,
    last_bytes: u64,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>) -> Self {
        let now = Instant::now();
        Self {
            last_update_time: now,
            last_bytes: 0,
            progress: TransferProgress::new(total_bytes),
        }
    }

    /// Record the running total and recompute speed and ETA
    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update_time).as_secs_f64();

        if elapsed > 0.0 {
            let bytes_diff = transferred_bytes.saturating_sub(self.last_bytes);
            self.progress.bytes_per_second = (bytes_diff as f64 / elapsed) as u64;
        }

        self.progress.eta_seconds = match self.progress.total_bytes {
            Some(total) if self.progress.bytes_per_second > 0 => {
                Some(total.saturating_sub(transferred_bytes) / self.progress.bytes_per_second)
            }
            _ => None,
        };

        self.progress.transferred_bytes = transferred_bytes;
        self.last_update_time = now;
        self.last_bytes = transferred_bytes;

        &self.progress
    }
}

/// Status line redrawn on stdout while a transfer runs
pub struct ConsoleProgress {
    tracker: Arc<Mutex<ProgressTracker>>,
    drawn: Arc<AtomicBool>,
}

impl ConsoleProgress {
    pub fn new(total_bytes: Option<u64>) -> Self {
        Self {
            tracker: Arc::new(Mutex::new(ProgressTracker::new(total_bytes))),
            drawn: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Pipeline callback redrawing the status line
    pub fn callback(&self) -> ProgressCallback {
        let tracker = Arc::clone(&self.tracker);
        let drawn = Arc::clone(&self.drawn);
        Arc::new(move |bytes: u64| {
            let Ok(mut tracker) = tracker.lock() else {
                return;
            };
            let line = tracker.update(bytes).render();
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "\r\x1b[K{}", line);
            let _ = stdout.flush();
            drawn.store(true, Ordering::Relaxed);
        })
    }

    /// End the status line so later log output starts on its own line.
    pub fn finish(&self) {
        let mut stdout = std::io::stdout().lock();
        self.finish_to(&mut stdout);
    }

    fn finish_to<W: Write>(&self, out: &mut W) {
        if self.drawn.swap(false, Ordering::Relaxed) {
            let _ = writeln!(out);
            let _ = out.flush();
        }
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}
