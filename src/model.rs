//! Loaded classifier and its backends
//!
//! The serving pipeline treats the model artifact as a black box: a
//! [`ModelLoader`] turns a file into a [`BinaryClassifier`], and the
//! [`ModelHandle`] wraps it with the metadata the engine validates against.
//!
//! The production backend is [`OnnxLoader`], which compiles an ONNX graph
//! with tract. Tests substitute their own loaders (see [`crate::testing`]).

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

use serde::Serialize;
use tract_onnx::prelude::*;

use crate::{
    error::{MagnoliaError, Result},
    tensor::{ImageTensor, INPUT_SHAPE},
};

/// A deserialized binary classifier
///
/// Implementations must be safe to call from several threads; the engine
/// decides how many forward passes may run at once.
pub trait BinaryClassifier: Send + Sync {
    /// Run one forward pass and return the raw scalar output
    ///
    /// Any per-call runtime state must be released before returning, on both
    /// the success and the error path.
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::Inference`] if the runtime fails.
    fn forward(&self, input: &ImageTensor) -> Result<f32>;

    /// Short backend name for logs and `/ready`
    fn backend(&self) -> &'static str;
}

/// Deserializes a model artifact from disk
pub trait ModelLoader: Send + Sync {
    /// Load the artifact at `path`
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::ModelLoad`] if the file cannot be parsed or
    /// is incompatible with the expected input shape.
    fn load(&self, path: &Path) -> Result<Box<dyn BinaryClassifier>>;
}

/// Metadata of a loaded model
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ModelInfo {
    /// Artifact the model was loaded from
    pub path: PathBuf,
    /// Backend that executes it
    pub backend: String,
    /// Expected input shape
    pub input_shape: Vec<usize>,
    /// Number of output values per image
    pub output_arity: usize,
}

/// The process-wide loaded model
///
/// Immutable after construction and shared behind an `Arc` by the store.
pub struct ModelHandle {
    classifier: Box<dyn BinaryClassifier>,
    info: ModelInfo,
}

impl ModelHandle {
    /// Wrap a loaded classifier
    #[must_use]
    pub fn new(classifier: Box<dyn BinaryClassifier>, path: impl Into<PathBuf>) -> Self {
        let info = ModelInfo {
            path: path.into(),
            backend: classifier.backend().to_string(),
            input_shape: INPUT_SHAPE.to_vec(),
            output_arity: 1,
        };
        Self { classifier, info }
    }

    /// Model metadata
    #[must_use]
    pub fn info(&self) -> &ModelInfo {
        &self.info
    }

    /// Validate the input shape, then run the classifier
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::Inference`] on shape mismatch or runtime
    /// failure.
    pub fn forward(&self, input: &ImageTensor) -> Result<f32> {
        if input.shape() != self.info.input_shape.as_slice() {
            return Err(MagnoliaError::Inference(format!(
                "input shape {:?} does not match model input {:?}",
                input.shape(),
                self.info.input_shape
            )));
        }
        self.classifier.forward(input)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle").field("info", &self.info).finish()
    }
}

/// Optimized, runnable tract plan
type OnnxPlan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Loads ONNX artifacts with tract
///
/// The graph input is pinned to `f32[1, 224, 224, 3]` before optimization.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnnxLoader;

impl ModelLoader for OnnxLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn BinaryClassifier>> {
        let start = Instant::now();
        let load_err = |stage: &str, e: TractError| {
            MagnoliaError::ModelLoad(format!("{stage} {}: {e:#}", path.display()))
        };

        let plan = tract_onnx::onnx()
            .model_for_path(path)
            .map_err(|e| load_err("failed to parse", e))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 224, 224, 3)),
            )
            .map_err(|e| load_err("incompatible input in", e))?
            .into_optimized()
            .map_err(|e| load_err("failed to optimize", e))?
            .into_runnable()
            .map_err(|e| load_err("failed to plan", e))?;

        tracing::debug!(
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compiled onnx plan"
        );
        Ok(Box::new(OnnxClassifier { plan }))
    }
}

/// Classifier backed by a compiled tract plan
pub struct OnnxClassifier {
    plan: OnnxPlan,
}

impl BinaryClassifier for OnnxClassifier {
    fn forward(&self, input: &ImageTensor) -> Result<f32> {
        let values = input.as_slice().ok_or_else(|| {
            MagnoliaError::Inference("input tensor is not contiguous".to_string())
        })?;
        let tensor = Tensor::from_shape(input.shape(), values)
            .map_err(|e| MagnoliaError::Inference(format!("{e:#}")))?;

        // Per-call execution state; dropped with this frame on every path
        let mut state = SimpleState::new(&self.plan)
            .map_err(|e| MagnoliaError::Inference(format!("{e:#}")))?;
        let outputs = state
            .run(tvec!(tensor.into()))
            .map_err(|e| MagnoliaError::Inference(format!("{e:#}")))?;

        let output = outputs
            .first()
            .ok_or_else(|| MagnoliaError::Inference("model produced no outputs".to_string()))?;
        let scores = output
            .as_slice::<f32>()
            .map_err(|e| MagnoliaError::Inference(format!("{e:#}")))?;

        match scores {
            [p] => Ok(*p),
            other => Err(MagnoliaError::Inference(format!(
                "expected a single sigmoid output, got {} values",
                other.len()
            ))),
        }
    }

    fn backend(&self) -> &'static str {
        "tract-onnx"
    }
}
