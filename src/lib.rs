//! BatchPress - Bulk Image Compression
//!
//! A library for compressing many images at once under a bounded worker
//! pool, with per-codec tuned settings and a durable record of what was
//! compressed and how much space it saved.
//!
//! # Features
//!
//! - **Layered Settings**: user choices over saved defaults over codec-tuned defaults
//! - **Bounded Parallelism**: at most `max_workers` encodes in flight
//! - **Failure Isolation**: a panicking or crashing codec fails only its own file
//! - **Ordered Progress**: callbacks run one at a time, in completion order
//! - **Statistics**: capped history, cumulative totals and daily rollups on disk
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batchpress::{CompressionService, Config, SettingsOverrides};
//! use std::path::PathBuf;
//!
//! # async fn run() -> batchpress::Result<()> {
//! let service = CompressionService::new(Config::default())?;
//! let settings = SettingsOverrides::new().quality(70).output_format("webp");
//!
//! let outcome = service
//!     .compress_batch(&[PathBuf::from("a.png"), PathBuf::from("b.jpg")], &settings, None, None)
//!     .await;
//! service.record_results(&outcome.results)?;
//!
//! println!("Saved so far: {}", service.get_stats().stats.average_compression_rate);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod error;
pub mod parallel;
pub mod processing;
pub mod service;
pub mod storage;

// Re-export commonly used types
pub use config::{Config, ImageFormat, ResolvedSettings, SettingsOverrides};
pub use error::{CompressError, Result};
pub use parallel::{BatchCoordinator, CompressionTask, Executor, ProgressCallback, WorkerPool};
pub use processing::{Codec, CompressionResult, ProcessingEngine};
pub use service::{BatchOutcome, CompressionService, StatsSnapshot};
pub use storage::{ProcessedImageRecord, StatsStore};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize logging from `RUST_LOG` and check the host.
///
/// Logs go to stderr so a worker's stdout carries nothing but its reply.
/// Safe to call more than once; only the first subscriber is installed.
pub fn init() -> Result<()> {
    if tracing::subscriber::set_global_default(
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .finish(),
    )
    .is_ok()
    {
        info!("BatchPress v{} initialized", VERSION);
    }

    validate_system_requirements()
}

/// Initialize with custom configuration; `RUST_LOG` still wins when set
pub fn init_with_config(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .map_err(|e| CompressError::config(format!("Invalid log level '{}': {}", config.logging.level, e)))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    let installed = if config.logging.json_format {
        tracing::subscriber::set_global_default(builder.json().finish()).is_ok()
    } else {
        tracing::subscriber::set_global_default(builder.finish()).is_ok()
    };

    if installed {
        info!("BatchPress v{} initialized with custom config", VERSION);
    }

    validate_system_requirements()
}

fn validate_system_requirements() -> Result<()> {
    use sysinfo::{System, SystemExt};

    let mut system = System::new();
    system.refresh_memory();

    // Each worker holds a decoded bitmap; 512MB leaves room for a few
    let available_memory = system.available_memory();
    const MIN_MEMORY_MB: u64 = 512;

    if available_memory < MIN_MEMORY_MB * 1024 * 1024 {
        warn!(
            "Low available memory: {}MB (recommended: >{}MB)",
            available_memory / (1024 * 1024),
            MIN_MEMORY_MB
        );
    }

    info!(
        "Detected {} logical CPUs, default pool size {}",
        num_cpus::get(),
        config::default_worker_count()
    );

    Ok(())
}
