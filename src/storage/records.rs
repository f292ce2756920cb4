//! Persisted record types

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::processing::CompressionResult;

/// One committed compression, as kept in history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedImageRecord {
    pub id: String,
    pub name: String,
    pub original_path: PathBuf,
    pub output_path: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_rate: String,
    pub width: u32,
    pub height: u32,
    pub format: String,
    /// Milliseconds since the Unix epoch
    pub processed_at: i64,
}

impl ProcessedImageRecord {
    /// Record for a successful result; `None` for a failure
    pub fn from_result(result: &CompressionResult) -> Option<Self> {
        if !result.success {
            return None;
        }

        let now = Utc::now().timestamp_millis();
        Some(Self {
            id: next_id(now),
            name: result
                .original_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            original_path: result.original_path.clone(),
            output_path: result.output_path.clone(),
            original_size: result.original_size,
            compressed_size: result.compressed_size,
            compression_rate: result.compression_rate.clone(),
            width: result.width,
            height: result.height,
            format: result.output_format.clone(),
            processed_at: now,
        })
    }

    /// Bytes saved; negative when the output grew
    pub fn saved_bytes(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }
}

fn next_id(now: i64) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    format!("{:x}-{:x}", now, COUNTER.fetch_add(1, Ordering::Relaxed))
}

/// Cumulative totals since the last clear
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub total_processed_images: u64,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    /// `total_original_size - total_compressed_size`
    pub total_saved_space: i64,
    pub average_compression_rate: String,
    /// Milliseconds since the Unix epoch
    pub last_updated: i64,
}

impl Default for CompressionStats {
    fn default() -> Self {
        Self {
            total_processed_images: 0,
            total_original_size: 0,
            total_compressed_size: 0,
            total_saved_space: 0,
            average_compression_rate: "0%".to_string(),
            last_updated: Utc::now().timestamp_millis(),
        }
    }
}

impl CompressionStats {
    pub(crate) fn add(&mut self, record: &ProcessedImageRecord) {
        self.total_processed_images += 1;
        self.total_original_size += record.original_size;
        self.total_compressed_size += record.compressed_size;
        self.total_saved_space = self.total_original_size as i64 - self.total_compressed_size as i64;
        self.average_compression_rate = if self.total_original_size == 0 {
            "0%".to_string()
        } else {
            format!(
                "{:.1}%",
                self.total_saved_space as f64 / self.total_original_size as f64 * 100.0
            )
        };
        self.last_updated = Utc::now().timestamp_millis();
    }
}

/// Rollup for one UTC calendar day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyStats {
    /// `YYYY-MM-DD`
    pub date: String,
    pub processed_images: u64,
    pub saved_space: i64,
}

/// Today's counters; zero when nothing was recorded today
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStats {
    pub processed_images: u64,
    pub saved_space: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn success(original: u64, compressed: u64) -> CompressionResult {
        CompressionResult {
            success: true,
            original_path: PathBuf::from("/pics/cat.png"),
            output_path: PathBuf::from("/out/cat_compressed.webp"),
            original_size: original,
            compressed_size: compressed,
            compression_rate: crate::processing::compression_rate(original, compressed),
            original_format: "png".to_string(),
            output_format: "webp".to_string(),
            width: 640,
            height: 480,
            error: None,
        }
    }

    #[test]
    fn test_record_from_success() {
        let record = ProcessedImageRecord::from_result(&success(1000, 250)).unwrap();
        assert_eq!(record.name, "cat.png");
        assert_eq!(record.format, "webp");
        assert_eq!(record.compression_rate, "75.0%");
        assert_eq!(record.saved_bytes(), 750);
        assert!(record.processed_at > 0);
    }

    #[test]
    fn test_no_record_for_failure() {
        let failed = CompressionResult::failed(PathBuf::from("x.jpg"), "nope");
        assert!(ProcessedImageRecord::from_result(&failed).is_none());
    }

    #[test]
    fn test_ids_are_unique() {
        let a = ProcessedImageRecord::from_result(&success(10, 5)).unwrap();
        let b = ProcessedImageRecord::from_result(&success(10, 5)).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_stats_average_rate() {
        let mut stats = CompressionStats::default();
        stats.add(&ProcessedImageRecord::from_result(&success(1000, 250)).unwrap());
        assert_eq!(stats.total_saved_space, 750);
        assert_eq!(stats.average_compression_rate, "75.0%");
    }

    #[test]
    fn test_stats_zero_original_guard() {
        let mut stats = CompressionStats::default();
        stats.add(&ProcessedImageRecord::from_result(&success(0, 0)).unwrap());
        assert_eq!(stats.total_processed_images, 1);
        assert_eq!(stats.average_compression_rate, "0%");
    }

    #[test]
    fn test_camel_case_documents() {
        let json = serde_json::to_value(CompressionStats::default()).unwrap();
        assert_eq!(json["averageCompressionRate"], "0%");
        assert!(json.get("totalSavedSpace").is_some());

        let daily = DailyStats {
            date: "2024-05-01".to_string(),
            processed_images: 2,
            saved_space: -10,
        };
        let json = serde_json::to_string(&daily).unwrap();
        assert!(json.contains("\"processedImages\":2"));
        assert!(json.contains("\"savedSpace\":-10"));
    }
}
