//! Configuration management for BatchPress

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use crate::error::{Result, CompressError};

pub mod naming;
pub mod profiles;
pub mod settings;

pub use naming::*;
pub use profiles::*;
pub use settings::*;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool settings
    pub processing: ProcessingConfig,

    /// Statistics store location
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// The user's saved compression settings, applied under CLI flags
    pub defaults: SettingsOverrides,

    /// Extra named presets, layered over the built-in ones
    pub presets: HashMap<String, SettingsOverrides>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            processing: ProcessingConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            defaults: CompressionSettings::default().into(),
            presets: HashMap::new(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Number of concurrent execution units (None = logical CPUs - 1)
    pub max_workers: Option<usize>,

    /// How each task is isolated from the orchestrator
    pub isolation: IsolationMode,

    /// Worker executable for process isolation (None = current executable)
    pub worker_program: Option<PathBuf>,

    /// Scratch directory for outputs when the caller gives no destination
    pub temp_dir: Option<PathBuf>,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_workers: None,
            isolation: IsolationMode::Thread,
            worker_program: None,
            temp_dir: None,
        }
    }
}

impl ProcessingConfig {
    /// Effective worker count
    pub fn worker_count(&self) -> usize {
        self.max_workers.unwrap_or_else(default_worker_count)
    }

    /// Effective scratch directory
    pub fn temp_dir(&self) -> PathBuf {
        self.temp_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("batchpress"))
    }
}

/// One slot is left for the orchestrator and the UI thread.
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Isolation strategy for execution units
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// Blocking thread per task; panics are contained
    #[default]
    Thread,

    /// Child process per task; crashes and OOM kills are contained
    Process,
}

/// Statistics store configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding history.json, stats.json and daily-stats.json
    pub data_dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective data directory
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("data"))
                .join("batchpress")
                .join("storage")
        })
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Image formats the built-in codec knows about
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Bmp,
}

impl ImageFormat {
    /// Parse a lowercase or mixed-case extension / format name
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            _ => None,
        }
    }

    /// Get file extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| CompressError::config(
                format!("Failed to read config file {:?}: {}", path.as_ref(), e)
            ))?;

        let extension = path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(CompressError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let extension = path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let content = match extension.to_lowercase().as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| CompressError::config(format!("TOML serialization failed: {}", e)))?,
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map_err(|e| CompressError::config(format!("YAML serialization failed: {}", e)))?,
            _ => return Err(CompressError::config(
                "Unsupported config file format. Use .toml or .yaml"
            )),
        };

        std::fs::write(&path, content)
            .map_err(|e| CompressError::config(
                format!("Failed to write config file {:?}: {}", path.as_ref(), e)
            ))?;

        Ok(())
    }

    /// Look up a preset: user-defined presets shadow built-in ones
    pub fn get_preset(&self, name: &str) -> Result<SettingsOverrides> {
        if let Some(preset) = self.presets.get(name) {
            return Ok(preset.clone());
        }
        Presets::get(name).ok_or_else(|| {
            let mut available: Vec<String> = Presets::names().map(str::to_string).collect();
            available.extend(self.presets.keys().cloned());
            available.sort();
            CompressError::config(format!(
                "Preset '{}' not found. Available presets: {:?}",
                name, available
            ))
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        for (name, preset) in &self.presets {
            preset.validate()
                .map_err(|e| CompressError::config(
                    format!("Invalid preset '{}': {}", name, e)
                ))?;
        }

        self.defaults.validate()
            .map_err(|e| CompressError::config(format!("Invalid defaults: {}", e)))?;

        if self.processing.max_workers == Some(0) {
            return Err(CompressError::config(
                "Worker count must be greater than 0"
            ));
        }

        Ok(())
    }
}
