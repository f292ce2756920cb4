//! Batch orchestration over the worker pool

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::{resolve, output_file_parts, SettingsOverrides, UniqueNames};
use crate::error::{CompressError, Result};
use crate::processing::CompressionResult;

pub mod progress;
pub mod scheduler;
pub mod worker;

pub use progress::*;
pub use scheduler::*;
pub use worker::*;

/// Builds tasks for a set of inputs and runs them through a fresh pool
#[derive(Clone)]
pub struct BatchCoordinator {
    executor: Executor,
    config: PoolConfig,
}

impl BatchCoordinator {
    /// Create a new coordinator
    pub fn new(executor: Executor, max_workers: Option<usize>) -> Self {
        let config = match max_workers {
            Some(max_workers) => PoolConfig { max_workers },
            None => PoolConfig::default(),
        };

        debug!("Initializing batch coordinator with {} workers", config.max_workers);

        Self { executor, config }
    }

    pub fn max_workers(&self) -> usize {
        self.config.max_workers
    }

    /// Compress every input into `output_dir` with one settings value.
    ///
    /// Settings are resolved for all inputs before anything is scheduled, so
    /// a configuration error aborts the whole batch. Per-file failures do not:
    /// the returned vector has one result per input, in completion order.
    pub async fn run_batch(
        &self,
        input_paths: &[PathBuf],
        base: &SettingsOverrides,
        user: &SettingsOverrides,
        output_dir: &Path,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Vec<CompressionResult>> {
        if input_paths.is_empty() {
            return Ok(Vec::new());
        }

        let start_time = Instant::now();
        let tasks = plan_tasks(input_paths, base, user, output_dir)?;

        tokio::fs::create_dir_all(output_dir).await
            .map_err(|e| CompressError::system(
                format!("Failed to create output directory {:?}: {}", output_dir, e)
            ))?;

        info!("Starting batch of {} files with {} workers", tasks.len(), self.config.max_workers);

        let pool = WorkerPool::new(self.config.clone(), self.executor.clone())?;
        if let Some(callback) = on_progress {
            pool.set_progress_callback(callback);
        }

        pool.submit_all(tasks);
        let results = pool.wait_for_all().await;

        pool.tracker().log_summary();
        debug!("Batch completed in {:.2}s", start_time.elapsed().as_secs_f64());

        Ok(results)
    }

    /// Compress a single file to an explicit output path
    pub async fn run_one(
        &self,
        input_path: &Path,
        base: &SettingsOverrides,
        user: &SettingsOverrides,
        output_path: &Path,
    ) -> Result<CompressionResult> {
        let settings = resolve(input_path, base, user)?;
        let pool = WorkerPool::new(PoolConfig { max_workers: 1 }, self.executor.clone())?;

        let handle = pool.submit(CompressionTask::new(
            input_path.to_path_buf(),
            output_path.to_path_buf(),
            settings,
        ));
        Ok(handle.result().await)
    }
}

/// Resolve settings and pick a unique output path for every input
pub fn plan_tasks(
    input_paths: &[PathBuf],
    base: &SettingsOverrides,
    user: &SettingsOverrides,
    output_dir: &Path,
) -> Result<Vec<CompressionTask>> {
    let mut names = UniqueNames::new();

    input_paths
        .iter()
        .map(|input| {
            let settings = resolve(input, base, user)?;
            let (name, ext) = output_file_parts(
                input,
                &settings.common.file_naming,
                &settings.common.file_extension,
                &settings.output_format,
            );
            let output_path = output_dir.join(names.claim(&name, &ext));
            Ok(CompressionTask::new(input.clone(), output_path, settings))
        })
        .collect()
}
