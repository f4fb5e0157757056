//! # Magnolia
//!
//! Serving pipeline for a binary leaf classifier that tells "Nilo" leaves
//! apart from everything else.
//!
//! A request carries raw image bytes and a declared content type. The
//! pipeline validates the type, decodes and resizes the image to the
//! model's 224×224 RGB input, runs one forward pass against a model that is
//! loaded once per process, and thresholds the output probability at 0.5.
//!
//! ## Example
//!
//! ```rust
//! use magnolia::prediction::{Label, PredictionResult};
//!
//! let result = PredictionResult::from_probability(0.87).unwrap();
//! assert_eq!(result.label, Label::Nilo);
//!
//! // Exactly 0.5 is not Nilo
//! let result = PredictionResult::from_probability(0.5).unwrap();
//! assert_eq!(result.label, Label::NotNilo);
//! ```
//!
//! ## Architecture
//!
//! - [`store::ModelStore`]: artifact fetch and the process-wide model cache
//! - [`preprocess::ImagePreprocessor`]: bytes to normalized tensor
//! - [`engine::InferenceEngine`]: bounded, scoped forward passes
//! - [`serving::ServingFacade`]: per-request orchestration and error reporting
//! - [`api`]: axum router on top of the facade

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
// Clippy allows (MUST come after deny/warn to override them)
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_precision_loss)] // usize -> f64 precision loss is acceptable
#![allow(clippy::cast_possible_truncation)] // u128 -> u64 for durations is safe
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)] // Not all methods need #[must_use]
#![allow(clippy::doc_markdown)] // Allow technical terms without backticks
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod model;
pub mod metrics;
pub mod prediction;
pub mod preprocess;
pub mod serving;
pub mod store;
pub mod submit;
pub mod tensor;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use error::{ErrorKind, MagnoliaError, Result};
pub use prediction::{Label, PredictionResult};
pub use serving::{ReportedError, ServingFacade};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with("0."));
        assert!(VERSION.contains('.'));
    }
}
