//! Durable compression history and statistics
//!
//! Three JSON documents live in the data directory: `history.json` (most
//! recent first, capped), `stats.json` (cumulative totals) and
//! `daily-stats.json` (per-day rollups, capped). Every mutation rewrites all
//! three through a temp file and rename, so a crash never leaves a
//! half-written document behind.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{CompressError, Result};

pub mod records;

pub use records::*;

/// Maximum number of history entries kept
pub const HISTORY_LIMIT: usize = 100;

/// Maximum number of daily rollups kept
pub const DAILY_LIMIT: usize = 30;

const HISTORY_FILE: &str = "history.json";
const STATS_FILE: &str = "stats.json";
const DAILY_FILE: &str = "daily-stats.json";

#[derive(Default)]
struct StoreData {
    history: Vec<ProcessedImageRecord>,
    stats: CompressionStats,
    daily: Vec<DailyStats>,
}

/// File-backed store of processed images and aggregate statistics.
///
/// All operations are serialized by a single lock; documents are written
/// while it is held so on-disk order always matches memory.
pub struct StatsStore {
    dir: PathBuf,
    data: Mutex<StoreData>,
}

impl StatsStore {
    /// Open the store in `dir`, creating the directory and any missing
    /// documents. A corrupt document is reset to empty and rewritten.
    pub fn open<P: Into<PathBuf>>(dir: P) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| CompressError::persistence(dir.clone(), e))?;

        let data = StoreData {
            history: load_document(&dir.join(HISTORY_FILE)),
            stats: load_document(&dir.join(STATS_FILE)),
            daily: load_document(&dir.join(DAILY_FILE)),
        };

        debug!(
            "Opened stats store at {:?} ({} history entries)",
            dir,
            data.history.len()
        );

        Ok(Self {
            dir,
            data: Mutex::new(data),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.dir
    }

    /// Record one successful compression
    pub fn add_processed_image(&self, record: ProcessedImageRecord) -> Result<()> {
        self.add_on(record, Utc::now().date_naive())
    }

    fn add_on(&self, record: ProcessedImageRecord, today: NaiveDate) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());

        data.stats.add(&record);

        let date = today.format("%Y-%m-%d").to_string();
        let saved = record.saved_bytes();
        match data.daily.iter().position(|day| day.date == date) {
            Some(index) => {
                let day = &mut data.daily[index];
                day.processed_images += 1;
                day.saved_space += saved;
            }
            None => {
                data.daily.insert(0, DailyStats {
                    date,
                    processed_images: 1,
                    saved_space: saved,
                });
                data.daily.truncate(DAILY_LIMIT);
            }
        }

        data.history.insert(0, record);
        data.history.truncate(HISTORY_LIMIT);

        self.persist(&data)
    }

    pub fn get_stats(&self) -> CompressionStats {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).stats.clone()
    }

    /// Counters for the current UTC day
    pub fn get_today_stats(&self) -> TodayStats {
        self.today_stats_on(Utc::now().date_naive())
    }

    fn today_stats_on(&self, today: NaiveDate) -> TodayStats {
        let date = today.format("%Y-%m-%d").to_string();
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.daily
            .iter()
            .find(|day| day.date == date)
            .map(|day| TodayStats {
                processed_images: day.processed_images,
                saved_space: day.saved_space,
            })
            .unwrap_or_default()
    }

    /// Up to `limit` records, most recent first
    pub fn get_recent_images(&self, limit: usize) -> Vec<ProcessedImageRecord> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.history.iter().take(limit).cloned().collect()
    }

    /// Daily rollups, most recently created first
    pub fn get_daily_stats(&self) -> Vec<DailyStats> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).daily.clone()
    }

    /// Reset every document to its empty state
    pub fn clear_all_data(&self) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        *data = StoreData::default();
        self.persist(&data)
    }

    /// Write all three documents; the first failure is returned after every
    /// document has been attempted.
    fn persist(&self, data: &StoreData) -> Result<()> {
        let outcomes = [
            write_document(&self.dir.join(HISTORY_FILE), &data.history),
            write_document(&self.dir.join(STATS_FILE), &data.stats),
            write_document(&self.dir.join(DAILY_FILE), &data.daily),
        ];

        match outcomes.into_iter().find_map(|outcome| outcome.err()) {
            Some(err) => {
                warn!("Failed to persist stats store: {}", err);
                Err(err)
            }
            None => Ok(()),
        }
    }
}

fn load_document<T: DeserializeOwned + Serialize + Default>(path: &Path) -> T {
    let parsed = match std::fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => return value,
            Err(e) => {
                warn!("Resetting corrupt document {:?}: {}", path, e);
                T::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(e) => {
            warn!("Cannot read {:?}, starting empty: {}", path, e);
            T::default()
        }
    };

    if let Err(e) = write_document(path, &parsed) {
        warn!("Could not initialize {:?}: {}", path, e);
    }
    parsed
}

fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let fail = |e: std::io::Error| CompressError::persistence(path.to_path_buf(), e);
    let dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut file = NamedTempFile::new_in(dir).map_err(fail)?;
    serde_json::to_writer_pretty(&mut file, value).map_err(|e| fail(e.into()))?;
    file.flush().map_err(fail)?;
    file.persist(path).map_err(|e| fail(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{compression_rate, CompressionResult};
    use tempfile::TempDir;

    fn record(original: u64, compressed: u64) -> ProcessedImageRecord {
        ProcessedImageRecord::from_result(&CompressionResult {
            success: true,
            original_path: PathBuf::from("/pics/a.jpg"),
            output_path: PathBuf::from("/out/a_compressed.jpg"),
            original_size: original,
            compressed_size: compressed,
            compression_rate: compression_rate(original, compressed),
            original_format: "jpg".to_string(),
            output_format: "jpg".to_string(),
            width: 8,
            height: 8,
            error: None,
        })
        .unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_open_creates_documents() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("nested/storage");
        let store = StatsStore::open(&root).unwrap();

        assert!(root.join(HISTORY_FILE).exists());
        assert!(root.join(STATS_FILE).exists());
        assert!(root.join(DAILY_FILE).exists());
        assert_eq!(store.get_stats().total_processed_images, 0);
        assert_eq!(store.get_stats().average_compression_rate, "0%");
        assert_eq!(store.get_today_stats(), TodayStats::default());
    }

    #[test]
    fn test_history_is_capped_most_recent_first() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).unwrap();

        for i in 1..=101u64 {
            store.add_processed_image(record(1000 * i, 400 * i)).unwrap();
        }

        let recent = store.get_recent_images(1000);
        assert_eq!(recent.len(), HISTORY_LIMIT);
        let sizes: Vec<u64> = recent.iter().map(|r| r.original_size).collect();
        let expected: Vec<u64> = (2..=101u64).rev().map(|i| 1000 * i).collect();
        assert_eq!(sizes, expected);
        assert!(!recent.iter().any(|r| r.original_size == 1000));

        // Totals keep counting the record that fell out of the history
        let n: u64 = (1..=101).sum();
        let stats = store.get_stats();
        assert_eq!(stats.total_processed_images, 101);
        assert_eq!(stats.total_original_size, 1000 * n);
        assert_eq!(stats.total_compressed_size, 400 * n);
        assert_eq!(stats.total_saved_space, 600 * n as i64);

        let first_ten: Vec<u64> = store.get_recent_images(10).iter().map(|r| r.original_size).collect();
        assert_eq!(first_ten, expected[..10].to_vec());
    }

    #[test]
    fn test_totals_and_rate() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).unwrap();
        store.add_processed_image(record(1000, 250)).unwrap();

        let stats = store.get_stats();
        assert_eq!(stats.total_original_size, 1000);
        assert_eq!(stats.total_compressed_size, 250);
        assert_eq!(stats.total_saved_space, 750);
        assert_eq!(stats.average_compression_rate, "75.0%");

        let today = store.get_today_stats();
        assert_eq!(today.processed_images, 1);
        assert_eq!(today.saved_space, 750);
    }

    #[test]
    fn test_growth_counts_as_negative_savings() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).unwrap();
        store.add_processed_image(record(100, 150)).unwrap();

        assert_eq!(store.get_stats().total_saved_space, -50);
        assert_eq!(store.get_stats().average_compression_rate, "-50.0%");
    }

    #[test]
    fn test_daily_updates_in_place_and_caps() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).unwrap();

        store.add_on(record(10, 5), date(2024, 1, 1)).unwrap();
        store.add_on(record(10, 5), date(2024, 1, 1)).unwrap();
        let daily = store.get_daily_stats();
        assert_eq!(daily.len(), 1);
        assert_eq!(daily[0].processed_images, 2);
        assert_eq!(daily[0].saved_space, 10);

        for day in 2..=31 {
            store.add_on(record(10, 5), date(2024, 1, day)).unwrap();
        }
        let daily = store.get_daily_stats();
        assert_eq!(daily.len(), DAILY_LIMIT);
        assert_eq!(daily[0].date, "2024-01-31");
        assert!(!daily.iter().any(|d| d.date == "2024-01-01"));

        assert_eq!(store.today_stats_on(date(2024, 1, 31)).processed_images, 1);
        assert_eq!(store.today_stats_on(date(2023, 12, 31)), TodayStats::default());
    }

    #[test]
    fn test_clear_all_data() {
        let dir = TempDir::new().unwrap();
        let store = StatsStore::open(dir.path()).unwrap();
        store.add_processed_image(record(1000, 250)).unwrap();

        store.clear_all_data().unwrap();
        assert!(store.get_recent_images(10).is_empty());
        assert!(store.get_daily_stats().is_empty());
        let stats = store.get_stats();
        assert_eq!(stats.total_processed_images, 0);
        assert_eq!(stats.total_saved_space, 0);
        assert_eq!(stats.average_compression_rate, "0%");

        let reopened = StatsStore::open(dir.path()).unwrap();
        assert!(reopened.get_recent_images(10).is_empty());
        assert_eq!(reopened.get_stats().total_processed_images, 0);
    }

    #[test]
    fn test_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = StatsStore::open(dir.path()).unwrap();
            store.add_processed_image(record(400, 100)).unwrap();
            store.add_processed_image(record(600, 300)).unwrap();
        }

        let store = StatsStore::open(dir.path()).unwrap();
        let stats = store.get_stats();
        assert_eq!(stats.total_processed_images, 2);
        assert_eq!(stats.total_saved_space, 600);
        assert_eq!(stats.average_compression_rate, "60.0%");
        assert_eq!(store.get_recent_images(10).len(), 2);
        assert_eq!(store.get_today_stats().processed_images, 2);
    }

    #[test]
    fn test_corrupt_document_is_reset() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(HISTORY_FILE), b"{ not json").unwrap();
        std::fs::write(dir.path().join(STATS_FILE), b"[1, 2").unwrap();

        let store = StatsStore::open(dir.path()).unwrap();
        assert!(store.get_recent_images(10).is_empty());
        assert_eq!(store.get_stats().total_processed_images, 0);

        let rewritten = std::fs::read_to_string(dir.path().join(HISTORY_FILE)).unwrap();
        let parsed: Vec<ProcessedImageRecord> = serde_json::from_str(&rewritten).unwrap();
        assert!(parsed.is_empty());
    }

    #[test]
    fn test_open_fails_when_dir_is_a_file() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("storage");
        std::fs::write(&blocker, b"x").unwrap();

        let err = StatsStore::open(blocker.join("inner")).err().unwrap();
        assert!(matches!(err, CompressError::PersistenceError { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_persistence_failure_keeps_memory() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("storage");
        let store = StatsStore::open(&root).unwrap();

        // Replace the directory so temp files cannot be created in it
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, b"x").unwrap();

        let err = store.add_processed_image(record(100, 40)).unwrap_err();
        assert!(matches!(err, CompressError::PersistenceError { .. }));
        assert_eq!(store.get_stats().total_processed_images, 1);
    }
}
