//! Image tensor
//!
//! [`ImageTensor`] is the model's input: a single image as a batch of one,
//! laid out NHWC as `(1, 224, 224, 3)` f32 values.

use ndarray::{Array4, ArrayView3, Axis};

use crate::error::{MagnoliaError, Result};

/// Height and width the classifier was trained on
pub const INPUT_SIDE: usize = 224;

/// Colour channels (RGB or BGR depending on normalization)
pub const INPUT_CHANNELS: usize = 3;

/// Full input shape including the batch axis
pub const INPUT_SHAPE: [usize; 4] = [1, INPUT_SIDE, INPUT_SIDE, INPUT_CHANNELS];

/// Normalized, batched image ready for a forward pass
///
/// # Examples
///
/// ```
/// use magnolia::tensor::{ImageTensor, INPUT_SHAPE};
///
/// let t = ImageTensor::zeros();
/// assert_eq!(t.shape(), &INPUT_SHAPE);
/// assert_eq!(t.len(), 224 * 224 * 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Array4<f32>,
}

impl ImageTensor {
    /// Create a tensor from flattened NHWC data
    ///
    /// # Errors
    ///
    /// Returns `Err` if the shape is not four-dimensional with a batch of one,
    /// or if the data length does not match the shape.
    pub fn from_vec(shape: [usize; 4], data: Vec<f32>) -> Result<Self> {
        if shape[0] != 1 {
            return Err(MagnoliaError::Inference(format!(
                "expected a batch of one image, got batch size {}",
                shape[0]
            )));
        }
        if shape.contains(&0) {
            return Err(MagnoliaError::Inference(
                "tensor dimensions cannot be zero".to_string(),
            ));
        }

        let data = Array4::from_shape_vec(shape, data)
            .map_err(|e| MagnoliaError::Inference(format!("tensor shape mismatch: {e}")))?;
        Ok(Self { data })
    }

    /// All-zero tensor of the model input shape, used for warm-up
    #[must_use]
    pub fn zeros() -> Self {
        Self {
            data: Array4::zeros(INPUT_SHAPE),
        }
    }

    /// Shape as `[batch, height, width, channels]`
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Total number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the tensor holds no elements
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Contiguous row-major view of the values
    ///
    /// Tensors are only ever built in standard layout, so this is `None` only
    /// for tensors constructed outside this module.
    #[must_use]
    pub fn as_slice(&self) -> Option<&[f32]> {
        self.data.as_slice()
    }

    /// The single image without its batch axis, `(height, width, channels)`
    #[must_use]
    pub fn image(&self) -> ArrayView3<'_, f32> {
        self.data.index_axis(Axis(0), 0)
    }

    /// Smallest and largest value, or `None` for an empty tensor
    #[must_use]
    pub fn value_range(&self) -> Option<(f32, f32)> {
        self.data.iter().fold(None, |acc, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }
}
