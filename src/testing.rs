//! Test doubles for the model layer
//!
//! Used by the unit tests in this crate and by the integration tests under
//! `tests/`. Nothing here touches a real model runtime.

use std::{
    io::Cursor,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use image::{DynamicImage, ImageOutputFormat, Rgb, RgbImage};

use crate::{
    error::{MagnoliaError, Result},
    model::{BinaryClassifier, ModelLoader},
    tensor::ImageTensor,
};

/// Classifier whose forward pass always returns the same scalar
///
/// Tracks how many passes ran and the highest number that ran at once.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    output: f32,
    delay: Duration,
    fail: bool,
    counters: Arc<ForwardCounters>,
}

/// Shared forward-pass counters of a [`FixedClassifier`]
#[derive(Debug, Default)]
pub struct ForwardCounters {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ForwardCounters {
    /// Completed or started forward passes
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Passes running right now
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Highest observed number of simultaneous passes
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl FixedClassifier {
    /// Always return `output`
    pub fn new(output: f32) -> Self {
        Self {
            output,
            delay: Duration::ZERO,
            fail: false,
            counters: Arc::new(ForwardCounters::default()),
        }
    }

    /// Always fail the forward pass
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(0.0)
        }
    }

    /// Sleep inside every forward pass
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Counters shared with every clone of this classifier
    pub fn counters(&self) -> Arc<ForwardCounters> {
        Arc::clone(&self.counters)
    }
}

impl BinaryClassifier for FixedClassifier {
    fn forward(&self, _input: &ImageTensor) -> Result<f32> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            Err(MagnoliaError::Inference("injected forward failure".to_string()))
        } else {
            Ok(self.output)
        }
    }

    fn backend(&self) -> &'static str {
        "fixed"
    }
}

/// Loader that hands out [`FixedClassifier`]s and counts calls
#[derive(Debug)]
pub struct CountingLoader {
    classifier: FixedClassifier,
    calls: AtomicUsize,
    fail_first: usize,
    delay: Duration,
}

impl CountingLoader {
    /// Every load succeeds with a classifier returning `output`
    pub fn fixed(output: f32) -> Self {
        Self::with_classifier(FixedClassifier::new(output))
    }

    /// Every load succeeds with clones of `classifier`
    pub fn with_classifier(classifier: FixedClassifier) -> Self {
        Self {
            classifier,
            calls: AtomicUsize::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
        }
    }

    /// The first `n` loads fail with [`MagnoliaError::ModelLoad`]
    pub fn failing_first(n: usize, output: f32) -> Self {
        Self {
            fail_first: n,
            ..Self::fixed(output)
        }
    }

    /// Sleep inside every load, widening the first-load race window
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `load` calls so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Forward-pass counters of the classifiers this loader hands out
    pub fn counters(&self) -> Arc<ForwardCounters> {
        self.classifier.counters()
    }
}

impl ModelLoader for CountingLoader {
    fn load(&self, path: &Path) -> Result<Box<dyn BinaryClassifier>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if call < self.fail_first {
            return Err(MagnoliaError::ModelLoad(format!(
                "injected load failure for {}",
                path.display()
            )));
        }
        Ok(Box::new(self.classifier.clone()))
    }
}

/// Encode a `width`×`height` RGB gradient as JPEG
///
/// # Panics
///
/// Panics if encoding fails, which only happens on allocation failure.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, ImageOutputFormat::Jpeg(90))
        .expect("in-memory JPEG encoding");
    buf.into_inner()
}
