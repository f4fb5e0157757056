//! Model store: artifact acquisition and the process-wide model cache
//!
//! The store owns the single loaded [`ModelHandle`]. Reads are lock-free via
//! `ArcSwapOption`; the "not yet loaded" transition is serialized by one
//! async gate so concurrent first callers trigger exactly one download and
//! one deserialization and then all receive the same `Arc`.
//!
//! ```rust,ignore
//! let store = ModelStore::new(
//!     ModelSource::new("resnet50_nilo.onnx").with_remote_url(url),
//!     Arc::new(OnnxLoader),
//!     ModelFetcher::new()?,
//! );
//! let model = store.get_model().await?;
//! ```

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Instant,
};

use arc_swap::ArcSwapOption;
use tokio::sync::Mutex;

use crate::{
    error::{MagnoliaError, Result},
    fetch::ModelFetcher,
    model::{ModelHandle, ModelLoader},
};

/// Where the model artifact lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSource {
    /// Local artifact path
    pub local_path: PathBuf,
    /// Download location used when `local_path` does not exist
    pub remote_url: Option<String>,
}

impl ModelSource {
    /// Local-only source
    #[must_use]
    pub fn new(local_path: impl Into<PathBuf>) -> Self {
        Self {
            local_path: local_path.into(),
            remote_url: None,
        }
    }

    /// Enable remote fetch
    #[must_use]
    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }
}

/// Lifecycle counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Completed downloads
    pub downloads: usize,
    /// Completed deserializations
    pub loads: usize,
    /// Failed `get_model` attempts
    pub load_failures: usize,
}

/// Process-wide owner of the loaded model
///
/// Cheap to share behind an `Arc`; the load itself runs on a detached task
/// that owns the gate, so a caller that goes away mid-load (for example a
/// disconnected client) neither aborts the load nor lets a second one start.
pub struct ModelStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    source: ModelSource,
    loader: Arc<dyn ModelLoader>,
    fetcher: ModelFetcher,
    cached: ArcSwapOption<ModelHandle>,
    load_gate: Mutex<()>,
    downloads: AtomicUsize,
    loads: AtomicUsize,
    load_failures: AtomicUsize,
}

impl ModelStore {
    /// Create an empty store; nothing is fetched or loaded until asked
    #[must_use]
    pub fn new(source: ModelSource, loader: Arc<dyn ModelLoader>, fetcher: ModelFetcher) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                source,
                loader,
                fetcher,
                cached: ArcSwapOption::empty(),
                load_gate: Mutex::new(()),
                downloads: AtomicUsize::new(0),
                loads: AtomicUsize::new(0),
                load_failures: AtomicUsize::new(0),
            }),
        }
    }

    /// Configured artifact source
    #[must_use]
    pub fn source(&self) -> &ModelSource {
        &self.inner.source
    }

    /// Whether a model is cached (lock-free)
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.cached.load().is_some()
    }

    /// Lifecycle counters
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = &self.inner;
        StoreStats {
            downloads: inner.downloads.load(Ordering::Relaxed),
            loads: inner.loads.load(Ordering::Relaxed),
            load_failures: inner.load_failures.load(Ordering::Relaxed),
        }
    }

    /// Make sure the artifact exists locally, downloading it if needed
    ///
    /// The download runs to completion even if the caller is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::ModelUnavailable`] if the file is absent and
    /// no remote URL is configured, or if the download fails. A failed
    /// download leaves nothing at the local path.
    pub async fn ensure_available(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        detached(async move {
            let _gate = inner.load_gate.lock().await;
            inner.ensure_available_locked().await
        })
        .await
    }

    /// Return the cached model, loading it on first use
    ///
    /// # Errors
    ///
    /// - [`MagnoliaError::ModelUnavailable`] if the artifact cannot be
    ///   obtained
    /// - [`MagnoliaError::ModelLoad`] if it cannot be deserialized
    ///
    /// Failures are not cached; the next call tries again.
    pub async fn get_model(&self) -> Result<Arc<ModelHandle>> {
        if let Some(model) = self.inner.cached.load_full() {
            return Ok(model);
        }

        let inner = Arc::clone(&self.inner);
        detached(async move { inner.load_once().await }).await
    }

    /// Drop the cached model so the next [`get_model`](Self::get_model)
    /// reloads it
    ///
    /// Requests already holding the old handle finish with it.
    pub async fn invalidate(&self) {
        let _gate = self.inner.load_gate.lock().await;
        if self.inner.cached.swap(None).is_some() {
            tracing::info!(path = %self.inner.source.local_path.display(), "model cache invalidated");
        }
    }
}

impl StoreInner {
    /// Gate, re-check, load, publish. Runs on a detached task.
    async fn load_once(&self) -> Result<Arc<ModelHandle>> {
        let _gate = self.load_gate.lock().await;
        if let Some(model) = self.cached.load_full() {
            return Ok(model);
        }

        match self.load_locked().await {
            Ok(model) => {
                self.cached.store(Some(Arc::clone(&model)));
                Ok(model)
            },
            Err(e) => {
                self.load_failures.fetch_add(1, Ordering::Relaxed);
                tracing::error!(error = %e, kind = %e.kind(), "model load failed");
                Err(e)
            },
        }
    }

    async fn ensure_available_locked(&self) -> Result<()> {
        let path = &self.source.local_path;
        if artifact_exists(path).await {
            return Ok(());
        }

        let Some(url) = self.source.remote_url.as_deref() else {
            return Err(MagnoliaError::ModelUnavailable(format!(
                "{} does not exist and no remote URL is configured",
                path.display()
            )));
        };

        self.fetcher.fetch(url, path).await?;
        self.downloads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn load_locked(&self) -> Result<Arc<ModelHandle>> {
        self.ensure_available_locked().await?;

        let start = Instant::now();
        let loader = Arc::clone(&self.loader);
        let path = self.source.local_path.clone();
        let classifier = tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| MagnoliaError::ModelLoad(format!("loader task failed: {e}")))??;

        let model = Arc::new(ModelHandle::new(classifier, self.source.local_path.clone()));
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            path = %self.source.local_path.display(),
            backend = %model.info().backend,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "model loaded"
        );
        Ok(model)
    }
}

/// Run `work` on its own task; dropping the returned future detaches it
/// instead of cancelling it
async fn detached<T, F>(work: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| MagnoliaError::ModelLoad(format!("model store task failed: {e}")))?
}

impl std::fmt::Debug for ModelStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelStore")
            .field("source", &self.inner.source)
            .field("loaded", &self.is_loaded())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn artifact_exists(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(meta) if meta.is_file())
}
