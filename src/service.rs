//! Caller-facing compression service
//!
//! Ties the configuration, the batch coordinator and the statistics store
//! together behind the operations a front end needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{output_file_name, resolve, Config, SettingsOverrides};
use crate::error::{CompressError, Result};
use crate::parallel::{BatchCoordinator, Executor, ProgressCallback};
use crate::processing::{CompressionResult, ProcessingEngine};
use crate::storage::{CompressionStats, ProcessedImageRecord, StatsStore, TodayStats};

/// Outcome of a batch call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    /// False only when the batch was rejected before any task ran
    pub success: bool,
    pub results: Vec<CompressionResult>,
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Totals plus today's counters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub stats: CompressionStats,
    pub today: TodayStats,
}

pub struct CompressionService {
    config: Config,
    store: Arc<StatsStore>,
    coordinator: BatchCoordinator,
}

impl CompressionService {
    /// Open the store and build the executor described by `config`
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(StatsStore::open(config.storage.data_dir())?);
        let executor = Executor::from_config(&config.processing, ProcessingEngine::new())?;
        let coordinator = BatchCoordinator::new(executor, Some(config.processing.worker_count()));

        Ok(Self::with_parts(config, store, coordinator))
    }

    pub fn with_parts(config: Config, store: Arc<StatsStore>, coordinator: BatchCoordinator) -> Self {
        Self {
            config,
            store,
            coordinator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<StatsStore> {
        &self.store
    }

    /// Named preset, user presets first
    pub fn preset(&self, name: &str) -> Result<SettingsOverrides> {
        self.config.get_preset(name)
    }

    /// Compress one file. Without `output_path` the result lands in the
    /// temp directory under its template name.
    pub async fn compress_one(
        &self,
        input_path: &Path,
        settings: &SettingsOverrides,
        output_path: Option<&Path>,
    ) -> CompressionResult {
        let base = &self.config.defaults;

        let output_path = match output_path {
            Some(path) => path.to_path_buf(),
            None => match resolve(input_path, base, settings) {
                Ok(resolved) => self.config.processing.temp_dir().join(output_file_name(
                    input_path,
                    &resolved.common.file_naming,
                    &resolved.common.file_extension,
                    &resolved.output_format,
                )),
                Err(e) => return rejected(input_path, e),
            },
        };

        match self.coordinator.run_one(input_path, base, settings, &output_path).await {
            Ok(result) => result,
            Err(e) => rejected(input_path, e),
        }
    }

    /// Compress every path into one directory, by default a fresh
    /// `batch_<millis>` directory under the temp directory.
    pub async fn compress_batch(
        &self,
        paths: &[PathBuf],
        settings: &SettingsOverrides,
        output_dir: Option<&Path>,
        on_progress: Option<ProgressCallback>,
    ) -> BatchOutcome {
        let output_dir = output_dir.map(Path::to_path_buf).unwrap_or_else(|| {
            self.config
                .processing
                .temp_dir()
                .join(format!("batch_{}", Utc::now().timestamp_millis()))
        });

        match self
            .coordinator
            .run_batch(paths, &self.config.defaults, settings, &output_dir, on_progress)
            .await
        {
            Ok(results) => BatchOutcome {
                success: true,
                results,
                output_dir,
                error: None,
            },
            Err(e) => {
                warn!("Batch rejected: {}", e);
                BatchOutcome {
                    success: false,
                    results: Vec::new(),
                    output_dir,
                    error: Some(e.user_message()),
                }
            }
        }
    }

    pub fn get_stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            stats: self.store.get_stats(),
            today: self.store.get_today_stats(),
        }
    }

    pub fn get_recent_images(&self, limit: usize) -> Vec<ProcessedImageRecord> {
        self.store.get_recent_images(limit)
    }

    pub fn add_processed_image(&self, record: ProcessedImageRecord) -> Result<()> {
        self.store.add_processed_image(record)
    }

    /// Commit every successful result to history; failures are skipped.
    ///
    /// A recoverable store error (the disk copy lagging the in-memory state)
    /// does not stop the remaining results from being counted; the first one
    /// is returned once all are in.
    pub fn record_results(&self, results: &[CompressionResult]) -> Result<usize> {
        let mut recorded = 0;
        let mut deferred = None;
        for record in results.iter().filter_map(ProcessedImageRecord::from_result) {
            match self.store.add_processed_image(record) {
                Ok(()) => recorded += 1,
                Err(e) if e.is_recoverable() => {
                    recorded += 1;
                    deferred.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        debug!("Recorded {} of {} results", recorded, results.len());
        match deferred {
            Some(e) => Err(e),
            None => Ok(recorded),
        }
    }

    pub fn clear_all_data(&self) -> Result<()> {
        self.store.clear_all_data()?;
        info!("Cleared compression history and statistics");
        Ok(())
    }

    /// Remove everything in the temp directory; returns the number of entries removed
    pub async fn clear_temp_files(&self) -> Result<usize> {
        let temp_dir = self.config.processing.temp_dir();

        let mut entries = match tokio::fs::read_dir(&temp_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await?;
            } else {
                tokio::fs::remove_file(&path).await?;
            }
            removed += 1;
        }

        info!("Removed {} entries from {:?}", removed, temp_dir);
        Ok(removed)
    }

    /// Delete one output file; a missing file is not an error
    pub async fn delete_temp_file(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn rejected(input_path: &Path, err: CompressError) -> CompressionResult {
    warn!("Rejected {:?}: {}", input_path, err);
    CompressionResult::failed(input_path.to_path_buf(), err.user_message())
}
