//! Progress tracking for the worker pool

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::info;

use crate::processing::CompressionResult;

/// Thread-safe progress tracker shared by every execution unit of a pool
pub struct ProgressTracker {
    start_time: Mutex<Option<Instant>>,

    // Atomic counters for high-frequency updates
    total: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
}

/// Snapshot of a tracker
#[derive(Debug, Clone, Default)]
pub struct ProgressState {
    pub total_files: usize,
    pub completed_files: usize,
    pub failed_files: usize,
    pub elapsed_time: Duration,
    pub estimated_remaining: Option<Duration>,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub files_per_second: f64,
    pub completion_percentage: f64,
}

impl ProgressTracker {
    /// Create a new progress tracker
    pub fn new() -> Self {
        Self {
            start_time: Mutex::new(None),
            total: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            bytes_in: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
        }
    }

    /// Account for newly submitted files; the clock starts on the first call
    pub fn add_files(&self, count: usize) {
        let mut start_time = self.start_time.lock().unwrap_or_else(|e| e.into_inner());
        start_time.get_or_insert_with(Instant::now);
        self.total.fetch_add(count, Ordering::Relaxed);
    }

    /// Record one finished task
    pub fn record(&self, result: &CompressionResult) {
        if result.success {
            self.completed.fetch_add(1, Ordering::Relaxed);
            self.bytes_in.fetch_add(result.original_size, Ordering::Relaxed);
            self.bytes_out.fetch_add(result.compressed_size, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Get current progress state
    pub fn get_state(&self) -> ProgressState {
        let elapsed = self
            .start_time
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|start| start.elapsed())
            .unwrap_or_default();

        let total = self.total.load(Ordering::Relaxed);
        let completed = self.completed.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        let processed = completed + failed;

        let mut state = ProgressState {
            total_files: total,
            completed_files: completed,
            failed_files: failed,
            elapsed_time: elapsed,
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            bytes_out: self.bytes_out.load(Ordering::Relaxed),
            ..Default::default()
        };

        if total > 0 {
            state.completion_percentage = (processed as f64 / total as f64) * 100.0;
        }

        if elapsed.as_secs_f64() > 0.0 && processed > 0 {
            state.files_per_second = processed as f64 / elapsed.as_secs_f64();

            if total > processed {
                let avg_time_per_file = elapsed.as_secs_f64() / processed as f64;
                let estimated_seconds = (total - processed) as f64 * avg_time_per_file;
                state.estimated_remaining = Some(Duration::from_secs_f64(estimated_seconds));
            }
        }

        state
    }

    /// Log the final summary
    pub fn log_summary(&self) {
        let state = self.get_state();
        info!(
            "Batch finished: {}/{} files compressed, {} failed in {:.2}s ({})",
            state.completed_files,
            state.total_files,
            state.failed_files,
            state.elapsed_time.as_secs_f64(),
            state.speed_text()
        );
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressState {
    /// Get human-readable completion status
    pub fn status_text(&self) -> String {
        if self.total_files > 0 && self.completion_percentage >= 100.0 {
            "Completed".to_string()
        } else {
            format!("{}/{} files processed", self.completed_files + self.failed_files, self.total_files)
        }
    }

    /// Get estimated time remaining as human-readable string
    pub fn eta_text(&self) -> String {
        match self.estimated_remaining {
            Some(duration) => {
                let seconds = duration.as_secs();
                if seconds < 60 {
                    format!("{}s", seconds)
                } else if seconds < 3600 {
                    format!("{}m {}s", seconds / 60, seconds % 60)
                } else {
                    format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
                }
            }
            None => "Unknown".to_string(),
        }
    }

    /// Get processing speed as human-readable string
    pub fn speed_text(&self) -> String {
        if self.files_per_second >= 1.0 {
            format!("{:.1} files/sec", self.files_per_second)
        } else if self.files_per_second > 0.0 {
            format!("{:.1} sec/file", 1.0 / self.files_per_second)
        } else {
            "Unknown".to_string()
        }
    }

    /// Bytes saved across successful files
    pub fn bytes_saved(&self) -> i64 {
        self.bytes_in as i64 - self.bytes_out as i64
    }
}
