//! Error types and handling for BatchPress

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for BatchPress operations
pub type Result<T> = std::result::Result<T, CompressError>;

/// Main error type for BatchPress operations
#[derive(Debug, Error)]
pub enum CompressError {
    /// I/O related errors
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    /// Bad or incomplete settings, raised before anything is scheduled
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// File format not supported
    #[error("Unsupported image format: {format} (file: {file:?})")]
    UnsupportedFormat {
        format: String,
        file: Option<PathBuf>,
    },

    /// Encoder failure for a specific file
    #[error("Codec error: {message} (file: {file:?})")]
    CodecError {
        message: String,
        file: Option<PathBuf>,
    },

    /// An execution unit died or answered with garbage
    #[error("Worker failure: {message}")]
    WorkerError { message: String },

    /// A statistics document could not be written
    #[error("Failed to persist {path:?}: {source}")]
    PersistenceError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    SerdeError(String),

    /// System resource errors
    #[error("System resource error: {message}")]
    SystemError { message: String },
}

impl CompressError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(format: S, file: Option<PathBuf>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
            file,
        }
    }

    /// Create a new codec error
    pub fn codec<S: Into<String>>(message: S, file: Option<PathBuf>) -> Self {
        Self::CodecError {
            message: message.into(),
            file,
        }
    }

    /// Create a new worker failure
    pub fn worker<S: Into<String>>(message: S) -> Self {
        Self::WorkerError {
            message: message.into(),
        }
    }

    /// Create a new persistence error
    pub fn persistence(path: PathBuf, source: std::io::Error) -> Self {
        Self::PersistenceError { path, source }
    }

    /// Create a new system error
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::SystemError {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (the batch can continue)
    pub fn is_recoverable(&self) -> bool {
        match self {
            // These affect a single task only
            Self::IoError(_)
            | Self::ImageError(_)
            | Self::UnsupportedFormat { .. }
            | Self::CodecError { .. }
            | Self::WorkerError { .. } => true,

            // In-memory state is still valid, only the disk copy lags
            Self::PersistenceError { .. } => true,

            // These stop the batch before it starts
            Self::ConfigError { .. }
            | Self::SerdeError(_)
            | Self::SystemError { .. } => false,
        }
    }

    /// Get the associated file path if available
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::UnsupportedFormat { file, .. } | Self::CodecError { file, .. } => file.as_ref(),
            Self::PersistenceError { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::IoError(e) => format!("File system error: {}", e),
            Self::ImageError(e) => format!("Image processing failed: {}", e),
            Self::UnsupportedFormat { format, .. } => {
                format!(
                    "Unsupported image format: {}. Supported formats: JPEG, PNG, WebP, GIF, TIFF, BMP",
                    format
                )
            }
            Self::CodecError { message, .. } => format!("Compression failed: {}", message),
            Self::WorkerError { message } => format!("Worker stopped unexpectedly: {}", message),
            Self::PersistenceError { path, source } => {
                format!("Could not save statistics to {}: {}", path.display(), source)
            }
            other => other.to_string(),
        }
    }
}

// Convert serde errors to our error type
impl From<toml::de::Error> for CompressError {
    fn from(err: toml::de::Error) -> Self {
        Self::SerdeError(format!("TOML parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for CompressError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::SerdeError(format!("YAML parsing error: {}", err))
    }
}

impl From<serde_json::Error> for CompressError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerdeError(format!("JSON error: {}", err))
    }
}

/// Error context extension for adding file path information
pub trait ErrorContext<T> {
    /// Add file context to an error
    fn with_file_context(self, file: PathBuf) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<CompressError>,
{
    fn with_file_context(self, file: PathBuf) -> Result<T> {
        self.map_err(|e| {
            let mut error = e.into();

            match &mut error {
                CompressError::UnsupportedFormat { file: ref mut f, .. }
                | CompressError::CodecError { file: ref mut f, .. } => {
                    if f.is_none() {
                        *f = Some(file);
                    }
                }
                _ => {}
            }

            error
        })
    }
}
