//! Serving facade
//!
//! Orchestrates one classification request:
//! validate content type → preprocess → get model → classify.
//!
//! Every failure is logged with its internal detail and converted into a
//! [`ReportedError`] carrying only the kind and a caller-safe message, so no
//! paths, URLs or runtime messages reach the transport layer.

use std::{sync::Arc, time::Instant};

use crate::{
    engine::InferenceEngine,
    error::{ErrorKind, MagnoliaError, Result},
    metrics::MetricsCollector,
    model::ModelInfo,
    prediction::PredictionResult,
    preprocess::{validate_content_type, ImagePreprocessor},
    store::ModelStore,
    tensor::ImageTensor,
};

/// The only error shape that leaves the pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedError {
    /// Failure classification (logging, metrics, status mapping)
    pub kind: ErrorKind,
    /// Human-readable message safe for untrusted callers
    pub message: String,
}

impl ReportedError {
    /// Report an error of `kind` with its public message
    #[must_use]
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: kind.public_message().to_string(),
        }
    }

    /// Whether the caller is at fault
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.kind.is_client_error()
    }
}

impl From<&MagnoliaError> for ReportedError {
    fn from(err: &MagnoliaError) -> Self {
        Self {
            kind: err.kind(),
            message: err.public_message().to_string(),
        }
    }
}

impl std::fmt::Display for ReportedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ReportedError {}

/// Per-process request pipeline shared by all handlers
#[derive(Debug)]
pub struct ServingFacade {
    store: Arc<ModelStore>,
    preprocessor: ImagePreprocessor,
    engine: InferenceEngine,
    metrics: MetricsCollector,
}

impl ServingFacade {
    /// Assemble the pipeline
    #[must_use]
    pub fn new(
        store: Arc<ModelStore>,
        preprocessor: ImagePreprocessor,
        engine: InferenceEngine,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            store,
            preprocessor,
            engine,
            metrics,
        }
    }

    /// Model store backing this pipeline
    #[must_use]
    pub fn store(&self) -> &Arc<ModelStore> {
        &self.store
    }

    /// Metrics recorded by this pipeline
    #[must_use]
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Whether the model is loaded and requests will not pay the load cost
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.store.is_loaded()
    }

    /// Classify one uploaded image
    ///
    /// # Errors
    ///
    /// Returns a [`ReportedError`] for any failure; the internal error is
    /// logged, never returned.
    pub async fn handle_classification_request(
        &self,
        raw_bytes: Vec<u8>,
        content_type: &str,
    ) -> std::result::Result<PredictionResult, ReportedError> {
        let start = Instant::now();
        match self.run_pipeline(raw_bytes, content_type).await {
            Ok(result) => {
                let elapsed = start.elapsed();
                self.metrics.record_success(result.label, elapsed);
                tracing::info!(
                    label = %result.label,
                    probability = result.probability,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "classified image"
                );
                Ok(result)
            },
            Err(err) => {
                let kind = err.kind();
                self.metrics.record_failure(kind);
                if kind.is_client_error() {
                    tracing::warn!(kind = %kind, error = %err, "rejected classification request");
                } else {
                    tracing::error!(kind = %kind, error = %err, "classification failed");
                }
                Err(ReportedError::from(&err))
            },
        }
    }

    async fn run_pipeline(&self, raw_bytes: Vec<u8>, content_type: &str) -> Result<PredictionResult> {
        // Fail fast: no blocking task, no decode work for non-images
        validate_content_type(content_type)?;

        let preprocessor = self.preprocessor;
        let content_type = content_type.to_string();
        let tensor = tokio::task::spawn_blocking(move || {
            preprocessor.decode_and_normalize(&raw_bytes, &content_type)
        })
        .await
        .map_err(|e| MagnoliaError::Decode(format!("preprocessing task failed: {e}")))??;

        let model = self.store.get_model().await?;
        self.engine.classify(model, tensor).await
    }

    /// Load the model and run one forward pass on a blank image
    ///
    /// Used for eager loading so a broken artifact aborts startup instead of
    /// failing the first request.
    ///
    /// # Errors
    ///
    /// Returns the load or inference error unchanged.
    pub async fn warm_up(&self) -> Result<ModelInfo> {
        let start = Instant::now();
        let model = self.store.get_model().await?;
        let info = model.info().clone();
        let warm = self.engine.classify(model, ImageTensor::zeros()).await?;
        tracing::info!(
            backend = %info.backend,
            blank_probability = warm.probability,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model warm-up complete"
        );
        Ok(info)
    }
}
