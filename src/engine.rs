//! Inference engine
//!
//! Runs forward passes on the blocking thread pool and turns the raw output
//! into a [`PredictionResult`].
//!
//! Each call holds an [`InferenceScope`] for exactly as long as the runtime
//! is executing: an owned semaphore permit (bounding how many forward passes
//! share the model at once) plus the backend's per-call state. The scope is
//! moved into the blocking task, so it is released when the pass actually
//! finishes, whether it succeeded, failed, panicked, or the waiting request
//! already gave up on a timeout.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::{
    error::{MagnoliaError, Result},
    model::ModelHandle,
    prediction::PredictionResult,
    tensor::ImageTensor,
};

/// Default bound on one forward pass
pub const DEFAULT_INFERENCE_TIMEOUT: Duration = Duration::from_secs(30);

/// Guard held for the duration of one forward pass
#[derive(Debug)]
pub struct InferenceScope {
    _permit: OwnedSemaphorePermit,
    entered: Instant,
}

impl InferenceScope {
    fn enter(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: permit,
            entered: Instant::now(),
        }
    }
}

impl Drop for InferenceScope {
    fn drop(&mut self) {
        tracing::trace!(
            held_us = self.entered.elapsed().as_micros() as u64,
            "inference scope released"
        );
    }
}

/// Executes forward passes against the shared model
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    timeout: Duration,
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self::new(1, DEFAULT_INFERENCE_TIMEOUT)
    }
}

impl InferenceEngine {
    /// Create an engine allowing `max_concurrent` simultaneous passes
    /// (at least one), each bounded by `timeout`
    #[must_use]
    pub fn new(max_concurrent: usize, timeout: Duration) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            timeout,
        }
    }

    /// Maximum simultaneous forward passes
    #[must_use]
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Per-pass timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Forward passes that could start right now
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    /// Classify one image
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::Inference`] if the shape does not match the
    /// model, the runtime fails or panics, the pass exceeds the timeout, or
    /// the output is not a probability. The cached model stays valid.
    pub async fn classify(
        &self,
        model: Arc<ModelHandle>,
        tensor: ImageTensor,
    ) -> Result<PredictionResult> {
        let start = Instant::now();
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| MagnoliaError::Inference("inference engine is shut down".to_string()))?;
        let queued = start.elapsed();
        let scope = InferenceScope::enter(permit);

        let pass = tokio::task::spawn_blocking(move || {
            let _scope = scope;
            model.forward(&tensor)
        });

        let p = match tokio::time::timeout(self.timeout, pass).await {
            Ok(Ok(output)) => output?,
            Ok(Err(join)) => {
                return Err(MagnoliaError::Inference(format!(
                    "forward pass aborted: {join}"
                )));
            },
            Err(_) => {
                return Err(MagnoliaError::Inference(format!(
                    "forward pass exceeded {:?}",
                    self.timeout
                )));
            },
        };

        let result = PredictionResult::from_probability(p)?;
        tracing::debug!(
            label = %result.label,
            probability = result.probability,
            queued_us = queued.as_micros() as u64,
            total_us = start.elapsed().as_micros() as u64,
            "forward pass complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{prediction::Label, testing::FixedClassifier};

    fn handle(classifier: FixedClassifier) -> Arc<ModelHandle> {
        Arc::new(ModelHandle::new(Box::new(classifier), "test.onnx"))
    }

    #[tokio::test]
    async fn test_classify_nilo() {
        let engine = InferenceEngine::default();
        let result = engine
            .classify(handle(FixedClassifier::new(0.87)), ImageTensor::zeros())
            .await
            .unwrap();
        assert_eq!(result.label, Label::Nilo);
        assert!((result.probability - 0.87).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_classify_threshold_exact() {
        let engine = InferenceEngine::default();
        for (p, label) in [
            (0.5, Label::NotNilo),
            (0.500_000_1, Label::Nilo),
            (0.499_999_9, Label::NotNilo),
        ] {
            let result = engine
                .classify(handle(FixedClassifier::new(p)), ImageTensor::zeros())
                .await
                .unwrap();
            assert_eq!(result.label, label, "p = {p}");
            assert_eq!(result.probability, p);
        }
    }

    #[tokio::test]
    async fn test_out_of_range_output_is_inference_error() {
        let engine = InferenceEngine::default();
        for p in [1.5, -0.2, f32::NAN] {
            let err = engine
                .classify(handle(FixedClassifier::new(p)), ImageTensor::zeros())
                .await
                .unwrap_err();
            assert!(matches!(err, MagnoliaError::Inference(_)));
        }
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_inference_error() {
        let engine = InferenceEngine::default();
        let tensor = ImageTensor::from_vec([1, 1, 1, 3], vec![0.0; 3]).unwrap();
        let err = engine
            .classify(handle(FixedClassifier::new(0.7)), tensor)
            .await
            .unwrap_err();
        assert!(matches!(err, MagnoliaError::Inference(_)));
    }

    #[tokio::test]
    async fn test_permit_released_after_failure() {
        let engine = InferenceEngine::new(2, DEFAULT_INFERENCE_TIMEOUT);
        let err = engine
            .classify(handle(FixedClassifier::failing()), ImageTensor::zeros())
            .await
            .unwrap_err();
        assert!(matches!(err, MagnoliaError::Inference(_)));
        assert_eq!(engine.available_permits(), 2);

        // Model stays usable for the next request
        let ok = engine
            .classify(handle(FixedClassifier::new(0.1)), ImageTensor::zeros())
            .await
            .unwrap();
        assert_eq!(ok.label, Label::NotNilo);
    }

    #[tokio::test]
    async fn test_timeout_reports_error_and_eventually_releases() {
        let engine = InferenceEngine::new(1, Duration::from_millis(20));
        let slow = FixedClassifier::new(0.9).with_delay(Duration::from_millis(200));
        let counters = slow.counters();

        let err = engine
            .classify(handle(slow), ImageTensor::zeros())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeded"));
        // The pass is still running and still holds its permit
        assert_eq!(engine.available_permits(), 0);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(engine.available_permits(), 1);
        assert_eq!(counters.in_flight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_single_permit_serializes_forward_passes() {
        let engine = InferenceEngine::new(1, DEFAULT_INFERENCE_TIMEOUT);
        let classifier = FixedClassifier::new(0.6).with_delay(Duration::from_millis(10));
        let counters = classifier.counters();
        let model = handle(classifier);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                let model = Arc::clone(&model);
                tokio::spawn(async move { engine.classify(model, ImageTensor::zeros()).await })
            })
            .collect();
        for task in futures::future::join_all(tasks).await {
            task.unwrap().unwrap();
        }

        assert_eq!(counters.calls(), 8);
        assert_eq!(counters.max_in_flight(), 1);
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        let engine = InferenceEngine::new(0, DEFAULT_INFERENCE_TIMEOUT);
        assert_eq!(engine.max_concurrent(), 1);
        assert_eq!(engine.available_permits(), 1);
        assert_eq!(engine.timeout(), DEFAULT_INFERENCE_TIMEOUT);
    }
}
