//! Error types for the serving pipeline
//!
//! Every fallible operation in the crate returns [`Result`]. The variants map
//! one-to-one onto the pipeline stage that failed, so the serving facade can
//! log the internal detail and report only a caller-safe message.

use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, MagnoliaError>;

/// Errors raised by the model serving pipeline
#[derive(Debug, Error)]
pub enum MagnoliaError {
    /// Declared content type is not an image type
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Upload carried no bytes
    #[error("Invalid input: uploaded file is empty")]
    EmptyUpload,

    /// Bytes could not be decoded as a raster image
    #[error("Image decode failed: {0}")]
    Decode(String),

    /// Model artifact is absent locally and could not be fetched
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    /// Model artifact exists but could not be deserialized
    #[error("Model load failed: {0}")]
    ModelLoad(String),

    /// Forward pass failed or produced an unusable output
    #[error("Inference failed: {0}")]
    Inference(String),

    /// Configuration value is out of range or malformed
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What was wrong with the configuration
        reason: String,
    },

    /// Filesystem operation outside the model lifecycle failed
    #[error("I/O error: {0}")]
    Io(String),
}

impl MagnoliaError {
    /// Coarse classification used for logging, metrics and status mapping
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) | Self::EmptyUpload => ErrorKind::InvalidInput,
            Self::Decode(_) => ErrorKind::Decode,
            Self::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            Self::ModelLoad(_) => ErrorKind::ModelLoad,
            Self::Inference(_) => ErrorKind::Inference,
            Self::InvalidConfiguration { .. } | Self::Io(_) => ErrorKind::Internal,
        }
    }

    /// Message that is safe to return to untrusted callers
    ///
    /// Usually the kind's message; an empty upload gets its own.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::EmptyUpload => "Uploaded file is empty",
            other => other.kind().public_message(),
        }
    }
}

impl From<std::io::Error> for MagnoliaError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Stable error classification exposed outside the pipeline
///
/// The kind never carries paths, URLs or runtime messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Content type rejected before decoding
    InvalidInput,
    /// Upload is not a parseable image
    Decode,
    /// Model artifact missing and unfetchable
    ModelUnavailable,
    /// Model artifact corrupt or incompatible
    ModelLoad,
    /// Forward pass failed
    Inference,
    /// Anything else (task panics, configuration, filesystem)
    Internal,
}

impl ErrorKind {
    /// All kinds, in metrics export order
    pub const ALL: [ErrorKind; 6] = [
        ErrorKind::InvalidInput,
        ErrorKind::Decode,
        ErrorKind::ModelUnavailable,
        ErrorKind::ModelLoad,
        ErrorKind::Inference,
        ErrorKind::Internal,
    ];

    /// Snake-case label for logs and metrics
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Decode => "decode",
            Self::ModelUnavailable => "model_unavailable",
            Self::ModelLoad => "model_load",
            Self::Inference => "inference",
            Self::Internal => "internal",
        }
    }

    /// Whether the failure was caused by the request rather than the server
    #[must_use]
    pub const fn is_client_error(self) -> bool {
        matches!(self, Self::InvalidInput | Self::Decode)
    }

    /// Message that is safe to return to untrusted callers
    #[must_use]
    pub const fn public_message(self) -> &'static str {
        match self {
            Self::InvalidInput => "Uploaded file must have an image content type",
            Self::Decode => "Uploaded file could not be decoded as an image",
            Self::ModelUnavailable => "Classification model is not available",
            Self::ModelLoad => "Classification model could not be loaded",
            Self::Inference => "Classification failed",
            Self::Internal => "Internal server error",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::InvalidInput => 0,
            Self::Decode => 1,
            Self::ModelUnavailable => 2,
            Self::ModelLoad => 3,
            Self::Inference => 4,
            Self::Internal => 5,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
