//! Core compression functionality

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::ResolvedSettings;
use crate::error::{Result, ErrorContext};

pub mod codec;
pub mod formats;

pub use codec::*;
pub use formats::*;

/// Output of a single encode
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Lowercase format name of `bytes`
    pub format: String,
}

/// Pixel-level encoder: decode `input`, apply `settings`, return the new bytes.
///
/// Implementations must be callable from several threads at once; each call
/// gets its own settings snapshot.
pub trait Codec: Send + Sync {
    fn encode(&self, input: &Path, settings: &ResolvedSettings) -> Result<EncodedImage>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Outcome of compressing one file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionResult {
    pub success: bool,
    pub original_path: PathBuf,
    /// Empty on failure
    pub output_path: PathBuf,
    pub original_size: u64,
    pub compressed_size: u64,
    /// `"N.N%"` of bytes saved, `"0%"` when nothing was read
    pub compression_rate: String,
    pub original_format: String,
    pub output_format: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CompressionResult {
    /// Create a failed result; every size and dimension is zero
    pub fn failed<S: Into<String>>(original_path: PathBuf, error: S) -> Self {
        Self {
            success: false,
            original_path,
            output_path: PathBuf::new(),
            original_size: 0,
            compressed_size: 0,
            compression_rate: "0%".to_string(),
            original_format: String::new(),
            output_format: String::new(),
            width: 0,
            height: 0,
            error: Some(error.into()),
        }
    }

    /// Bytes saved; negative when the output grew
    pub fn saved_bytes(&self) -> i64 {
        self.original_size as i64 - self.compressed_size as i64
    }
}

/// Percentage of `original` saved, one decimal place
pub fn compression_rate(original: u64, compressed: u64) -> String {
    if original == 0 {
        return "0%".to_string();
    }
    let saved = original as f64 - compressed as f64;
    format!("{:.1}%", saved / original as f64 * 100.0)
}

/// Runs one compression task end to end: stat, encode, write.
///
/// Blocking; callers move it off the async runtime.
#[derive(Clone)]
pub struct ProcessingEngine {
    codec: Arc<dyn Codec>,
}

impl ProcessingEngine {
    /// Create a new processing engine backed by the built-in codec
    pub fn new() -> Self {
        Self::with_codec(Arc::new(ImageCodec::new()))
    }

    /// Create an engine around another codec
    pub fn with_codec(codec: Arc<dyn Codec>) -> Self {
        Self { codec }
    }

    pub fn codec(&self) -> &Arc<dyn Codec> {
        &self.codec
    }

    /// Compress `input` into `output`. Never fails: errors land in the result.
    pub fn process_file(
        &self,
        input: &Path,
        output: &Path,
        settings: &ResolvedSettings,
    ) -> CompressionResult {
        let start_time = Instant::now();
        debug!("Processing file: {:?} -> {:?}", input, output);

        match self.try_process_file(input, output, settings) {
            Ok(result) => {
                debug!(
                    "Compressed {:?}: {} -> {} bytes ({}) in {:?}",
                    input,
                    result.original_size,
                    result.compressed_size,
                    result.compression_rate,
                    start_time.elapsed()
                );
                result
            }
            Err(e) => {
                let failed_at = e.file_path().map_or(input, PathBuf::as_path);
                warn!(
                    "Failed to compress {:?} with {} codec at {:?}: {}",
                    input, self.codec.name(), failed_at, e
                );
                CompressionResult::failed(input.to_path_buf(), e.user_message())
            }
        }
    }

    fn try_process_file(
        &self,
        input: &Path,
        output: &Path,
        settings: &ResolvedSettings,
    ) -> Result<CompressionResult> {
        let original_size = std::fs::metadata(input)
            .with_file_context(input.to_path_buf())?
            .len();

        let encoded = self.codec.encode(input, settings)
            .with_file_context(input.to_path_buf())?;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_file_context(output.to_path_buf())?;
            }
        }
        std::fs::write(output, &encoded.bytes)
            .with_file_context(output.to_path_buf())?;

        let compressed_size = encoded.bytes.len() as u64;
        let original_format = input
            .extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        Ok(CompressionResult {
            success: true,
            original_path: input.to_path_buf(),
            output_path: output.to_path_buf(),
            original_size,
            compressed_size,
            compression_rate: compression_rate(original_size, compressed_size),
            original_format,
            output_format: encoded.format,
            width: encoded.width,
            height: encoded.height,
            error: None,
        })
    }
}

impl Default for ProcessingEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{resolve, SettingsOverrides};
    use crate::error::CompressError;
    use tempfile::TempDir;

    struct FixedCodec;

    impl Codec for FixedCodec {
        fn encode(&self, _input: &Path, settings: &ResolvedSettings) -> Result<EncodedImage> {
            Ok(EncodedImage {
                bytes: vec![0u8; 250],
                width: 40,
                height: 30,
                format: settings.output_format.clone(),
            })
        }
    }

    struct BrokenCodec;

    impl Codec for BrokenCodec {
        fn encode(&self, _input: &Path, _settings: &ResolvedSettings) -> Result<EncodedImage> {
            Err(CompressError::codec("corrupt scanline", None))
        }
    }

    #[test]
    fn test_compression_rate_formatting() {
        assert_eq!(compression_rate(1000, 250), "75.0%");
        assert_eq!(compression_rate(0, 0), "0%");
        assert_eq!(compression_rate(3, 1), "66.7%");
        assert_eq!(compression_rate(100, 150), "-50.0%");
    }

    #[test]
    fn test_failed_result_is_zeroed() {
        let result = CompressionResult::failed(PathBuf::from("a.jpg"), "boom");
        assert!(!result.success);
        assert_eq!(result.output_path, PathBuf::new());
        assert_eq!(result.original_size, 0);
        assert_eq!(result.compressed_size, 0);
        assert_eq!(result.width, 0);
        assert_eq!(result.compression_rate, "0%");
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_process_file_success() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.JPG");
        std::fs::write(&input, vec![1u8; 1000]).unwrap();
        let output = dir.path().join("out/photo_compressed.jpg");

        let settings = resolve(&input, &SettingsOverrides::new(), &SettingsOverrides::new()).unwrap();
        let engine = ProcessingEngine::with_codec(Arc::new(FixedCodec));
        let result = engine.process_file(&input, &output, &settings);

        assert!(result.success);
        assert_eq!(result.original_size, 1000);
        assert_eq!(result.compressed_size, 250);
        assert_eq!(result.compression_rate, "75.0%");
        assert_eq!(result.original_format, "jpg");
        assert_eq!(result.saved_bytes(), 750);
        assert_eq!(std::fs::metadata(&output).unwrap().len(), 250);
    }

    #[test]
    fn test_process_file_codec_failure() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("photo.png");
        std::fs::write(&input, b"not really a png").unwrap();
        let output = dir.path().join("photo_compressed.png");

        let settings = resolve(&input, &SettingsOverrides::new(), &SettingsOverrides::new()).unwrap();
        let engine = ProcessingEngine::with_codec(Arc::new(BrokenCodec));
        let result = engine.process_file(&input, &output, &settings);

        assert!(!result.success);
        assert!(result.error.unwrap().contains("corrupt scanline"));
        assert!(!output.exists());
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("gone.png");
        let settings = resolve(&input, &SettingsOverrides::new(), &SettingsOverrides::new()).unwrap();

        let engine = ProcessingEngine::with_codec(Arc::new(FixedCodec));
        let result = engine.process_file(&input, &dir.path().join("x.png"), &settings);
        assert!(!result.success);
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let result = CompressionResult::failed(PathBuf::from("a.jpg"), "boom");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["compressionRate"], "0%");
        assert_eq!(json["originalPath"], "a.jpg");
        assert_eq!(json["outputPath"], "");
    }
}
