//! Runtime configuration
//!
//! Every setting is a CLI flag with a `MAGNOLIA_*` environment fallback.
//! The argument groups are flattened into the subcommands that need them
//! and turned into pipeline components by the `build_*` helpers.

use std::{fmt, path::PathBuf, str::FromStr, sync::Arc, time::Duration};

use clap::Args;

use crate::{
    engine::InferenceEngine,
    error::{MagnoliaError, Result},
    fetch::ModelFetcher,
    model::ModelLoader,
    preprocess::{ImagePreprocessor, Normalization, ResizeFilter},
    store::{ModelSource, ModelStore},
    submit::SubmissionArchive,
};

/// Default artifact location
pub const DEFAULT_MODEL_PATH: &str = "resnet50_nilo.onnx";

/// Default upload size limit (10 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

/// When the model is loaded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPolicy {
    /// Load and warm up before accepting connections
    #[default]
    Eager,
    /// Load on the first classification request
    Lazy,
}

impl LoadPolicy {
    /// Lowercase name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eager => "eager",
            Self::Lazy => "lazy",
        }
    }
}

impl fmt::Display for LoadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadPolicy {
    type Err = MagnoliaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eager" => Ok(Self::Eager),
            "lazy" => Ok(Self::Lazy),
            other => Err(MagnoliaError::InvalidConfiguration {
                reason: format!("unknown load policy '{other}' (expected eager or lazy)"),
            }),
        }
    }
}

/// Where the model comes from
#[derive(Debug, Clone, Args)]
pub struct ModelArgs {
    /// Local model artifact (ONNX)
    #[arg(long, env = "MAGNOLIA_MODEL_PATH", default_value = DEFAULT_MODEL_PATH)]
    pub model_path: PathBuf,

    /// Download the artifact from this URL when it is missing locally
    #[arg(long, env = "MAGNOLIA_MODEL_URL")]
    pub model_url: Option<String>,

    /// Bound on the whole artifact download, in seconds
    #[arg(long, env = "MAGNOLIA_FETCH_TIMEOUT_SECS", default_value_t = 300)]
    pub fetch_timeout_secs: u64,
}

impl ModelArgs {
    /// Check ranges and URL syntax
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::InvalidConfiguration`] on the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.fetch_timeout_secs == 0 {
            return Err(invalid("fetch timeout must be at least 1 second"));
        }
        if self.model_path.as_os_str().is_empty() {
            return Err(invalid("model path must not be empty"));
        }
        if let Some(url) = &self.model_url {
            let parsed = reqwest::Url::parse(url)
                .map_err(|e| invalid(format!("model URL is not valid: {e}")))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(invalid(format!(
                    "model URL scheme '{}' is not supported",
                    parsed.scheme()
                )));
            }
        }
        Ok(())
    }

    /// Artifact source
    #[must_use]
    pub fn source(&self) -> ModelSource {
        let source = ModelSource::new(&self.model_path);
        match &self.model_url {
            Some(url) => source.with_remote_url(url.clone()),
            None => source,
        }
    }

    /// Build the store around `loader`
    ///
    /// # Errors
    ///
    /// Returns `Err` if validation fails or the HTTP client cannot be built.
    pub fn build_store(&self, loader: Arc<dyn ModelLoader>) -> Result<ModelStore> {
        self.validate()?;
        let fetcher = ModelFetcher::with_timeout(Duration::from_secs(self.fetch_timeout_secs))?;
        Ok(ModelStore::new(self.source(), loader, fetcher))
    }
}

/// Preprocessing and inference settings
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Pixel normalization: rescale (divide by 255) or caffe (BGR mean subtraction)
    #[arg(long, env = "MAGNOLIA_NORMALIZATION", default_value = "rescale")]
    pub normalization: Normalization,

    /// Resize interpolation: nearest or bilinear
    #[arg(long, env = "MAGNOLIA_RESIZE_FILTER", default_value = "nearest")]
    pub resize_filter: ResizeFilter,

    /// Forward passes allowed to run at once
    #[arg(long, env = "MAGNOLIA_MAX_CONCURRENT_INFERENCES", default_value_t = 1)]
    pub max_concurrent_inferences: usize,

    /// Bound on one forward pass, in seconds
    #[arg(long, env = "MAGNOLIA_INFERENCE_TIMEOUT_SECS", default_value_t = 30)]
    pub inference_timeout_secs: u64,
}

impl PipelineArgs {
    /// Check ranges
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::InvalidConfiguration`] on the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_inferences == 0 {
            return Err(invalid("max concurrent inferences must be at least 1"));
        }
        if self.inference_timeout_secs == 0 {
            return Err(invalid("inference timeout must be at least 1 second"));
        }
        Ok(())
    }

    /// Preprocessor with the configured policies
    #[must_use]
    pub fn preprocessor(&self) -> ImagePreprocessor {
        ImagePreprocessor::new(self.normalization, self.resize_filter)
    }

    /// Engine with the configured concurrency and timeout
    #[must_use]
    pub fn engine(&self) -> InferenceEngine {
        InferenceEngine::new(
            self.max_concurrent_inferences,
            Duration::from_secs(self.inference_timeout_secs),
        )
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Host to bind to
    #[arg(short = 'H', long, env = "MAGNOLIA_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind to
    #[arg(short, long, env = "MAGNOLIA_PORT", default_value_t = 8000)]
    pub port: u16,

    /// eager: load before serving; lazy: load on first request
    #[arg(long, env = "MAGNOLIA_LOAD_POLICY", default_value = "eager")]
    pub load_policy: LoadPolicy,

    /// Directory for images sent to /submit/
    #[arg(long, env = "MAGNOLIA_SUBMISSIONS_DIR", default_value = "submitted_images")]
    pub submissions_dir: PathBuf,

    /// Largest accepted request body, in bytes
    #[arg(long, env = "MAGNOLIA_MAX_UPLOAD_BYTES", default_value_t = DEFAULT_MAX_UPLOAD_BYTES)]
    pub max_upload_bytes: usize,
}

impl ServeArgs {
    /// Check ranges
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::InvalidConfiguration`] on the first bad value.
    pub fn validate(&self) -> Result<()> {
        if self.max_upload_bytes == 0 {
            return Err(invalid("max upload bytes must be positive"));
        }
        if self.host.trim().is_empty() {
            return Err(invalid("host must not be empty"));
        }
        Ok(())
    }

    /// `host:port` string for binding
    #[must_use]
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Submission archive at the configured directory
    #[must_use]
    pub fn archive(&self) -> SubmissionArchive {
        SubmissionArchive::new(&self.submissions_dir)
    }
}

fn invalid(reason: impl Into<String>) -> MagnoliaError {
    MagnoliaError::InvalidConfiguration {
        reason: reason.into(),
    }
}
