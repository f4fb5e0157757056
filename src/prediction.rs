//! Classification result and decision rule

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MagnoliaError, Result};

/// Model outputs strictly above this value are labelled [`Label::Nilo`]
pub const DECISION_THRESHOLD: f32 = 0.5;

/// Binary class label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Label {
    /// The leaf is a Nilo leaf
    #[serde(rename = "Nilo")]
    Nilo,
    /// Anything else
    #[serde(rename = "Not Nilo")]
    NotNilo,
}

impl Label {
    /// Apply the decision threshold; `p == 0.5` falls to [`Label::NotNilo`]
    #[must_use]
    pub fn from_probability(p: f32) -> Self {
        if p > DECISION_THRESHOLD {
            Self::Nilo
        } else {
            Self::NotNilo
        }
    }

    /// Display name as returned to clients
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nilo => "Nilo",
            Self::NotNilo => "Not Nilo",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of classifying one image
///
/// `probability` is always the raw model output, i.e. the likelihood of
/// "Nilo", even when the label is "Not Nilo".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    /// Thresholded label
    #[serde(rename = "class")]
    pub label: Label,
    /// Raw sigmoid output in `[0, 1]`
    #[serde(rename = "confidence")]
    pub probability: f32,
}

impl PredictionResult {
    /// Build a result from the raw model output
    ///
    /// # Errors
    ///
    /// Returns [`MagnoliaError::Inference`] if `p` is NaN or outside
    /// `[0, 1]`, which means the artifact is not a sigmoid classifier.
    pub fn from_probability(p: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&p) {
            return Err(MagnoliaError::Inference(format!(
                "model output {p} is not a probability"
            )));
        }
        Ok(Self {
            label: Label::from_probability(p),
            probability: p,
        })
    }
}
