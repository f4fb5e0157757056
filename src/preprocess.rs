//! Image preprocessing
//!
//! Turns uploaded bytes into an [`ImageTensor`]:
//!
//! 1. reject non-image content types before touching the bytes
//! 2. decode (JPEG, PNG, GIF, BMP, WebP, TIFF)
//! 3. convert to 3-channel RGB (alpha dropped, grayscale expanded)
//! 4. resize to 224×224
//! 5. normalize with the policy the model artifact was trained with
//!
//! ## Normalization
//!
//! The two policies are not interchangeable; the same weights produce
//! materially different confidences under each. [`Normalization::Rescale`]
//! is the default because the Nilo artifact was trained and served on
//! pixels divided by 255.

use std::{fmt, str::FromStr};

use image::{imageops::FilterType, RgbImage};

use crate::{
    error::{MagnoliaError, Result},
    tensor::{ImageTensor, INPUT_CHANNELS, INPUT_SIDE},
};

/// Per-channel means subtracted by the Caffe-style ResNet50 convention (BGR order)
pub const CAFFE_BGR_MEANS: [f32; 3] = [103.939, 116.779, 123.68];

/// Pixel normalization policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Normalization {
    /// Divide by 255 into `[0, 1]`, channels stay RGB
    #[default]
    Rescale,
    /// Reorder to BGR and subtract [`CAFFE_BGR_MEANS`], no scaling
    Caffe,
}

impl Normalization {
    /// Normalize one RGB pixel into the three output channel values
    #[must_use]
    pub fn apply(self, [r, g, b]: [u8; 3]) -> [f32; 3] {
        match self {
            Self::Rescale => [
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
            ],
            Self::Caffe => [
                f32::from(b) - CAFFE_BGR_MEANS[0],
                f32::from(g) - CAFFE_BGR_MEANS[1],
                f32::from(r) - CAFFE_BGR_MEANS[2],
            ],
        }
    }

    /// Configuration name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rescale => "rescale",
            Self::Caffe => "caffe",
        }
    }
}

impl fmt::Display for Normalization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Normalization {
    type Err = MagnoliaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rescale" => Ok(Self::Rescale),
            "caffe" => Ok(Self::Caffe),
            other => Err(MagnoliaError::InvalidConfiguration {
                reason: format!("unknown normalization '{other}' (expected rescale or caffe)"),
            }),
        }
    }
}

/// Interpolation used when resizing to the model input size
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResizeFilter {
    /// Nearest neighbour
    #[default]
    Nearest,
    /// Bilinear
    Bilinear,
}

impl ResizeFilter {
    fn filter_type(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
        }
    }

    /// Configuration name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nearest => "nearest",
            Self::Bilinear => "bilinear",
        }
    }
}

impl fmt::Display for ResizeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResizeFilter {
    type Err = MagnoliaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nearest" => Ok(Self::Nearest),
            "bilinear" => Ok(Self::Bilinear),
            other => Err(MagnoliaError::InvalidConfiguration {
                reason: format!("unknown resize filter '{other}' (expected nearest or bilinear)"),
            }),
        }
    }
}

/// Reject anything that is not `image/<subtype>`
///
/// Parameters (`; charset=...`) and letter case are ignored.
///
/// # Errors
///
/// Returns [`MagnoliaError::InvalidInput`] for non-image or malformed types.
pub fn validate_content_type(content_type: &str) -> Result<()> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match essence.split_once('/') {
        Some(("image", subtype)) if !subtype.is_empty() && !subtype.contains('/') => Ok(()),
        _ => Err(MagnoliaError::InvalidInput(format!(
            "content type '{content_type}' is not an image type"
        ))),
    }
}

/// Decodes and normalizes uploads into model input tensors
///
/// Holds no mutable state; one instance is shared by all requests.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePreprocessor {
    normalization: Normalization,
    filter: ResizeFilter,
}

impl ImagePreprocessor {
    /// Create a preprocessor with the given policies
    #[must_use]
    pub fn new(normalization: Normalization, filter: ResizeFilter) -> Self {
        Self {
            normalization,
            filter,
        }
    }

    /// Normalization policy in use
    #[must_use]
    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Resize filter in use
    #[must_use]
    pub fn filter(&self) -> ResizeFilter {
        self.filter
    }

    /// Validate, decode, resize and normalize one upload
    ///
    /// # Errors
    ///
    /// - [`MagnoliaError::InvalidInput`] if `content_type` is not an image
    ///   type (no decoding is attempted)
    /// - [`MagnoliaError::Decode`] if the bytes are empty or not a parseable
    ///   image
    pub fn decode_and_normalize(&self, raw_bytes: &[u8], content_type: &str) -> Result<ImageTensor> {
        validate_content_type(content_type)?;
        let rgb = decode_rgb(raw_bytes)?;
        self.normalize(&rgb)
    }

    /// Resize and normalize an already decoded RGB image
    ///
    /// # Errors
    ///
    /// Returns `Err` only if the tensor cannot be assembled, which indicates
    /// a bug in the resize step.
    pub fn normalize(&self, rgb: &RgbImage) -> Result<ImageTensor> {
        let side = INPUT_SIDE as u32;
        let resized = image::imageops::resize(rgb, side, side, self.filter.filter_type());

        let mut data = Vec::with_capacity(INPUT_SIDE * INPUT_SIDE * INPUT_CHANNELS);
        for pixel in resized.pixels() {
            data.extend_from_slice(&self.normalization.apply(pixel.0));
        }

        ImageTensor::from_vec([1, INPUT_SIDE, INPUT_SIDE, INPUT_CHANNELS], data)
    }
}

/// Decode raster bytes into 8-bit RGB
///
/// # Errors
///
/// Returns [`MagnoliaError::Decode`] for empty, truncated or unrecognised
/// input.
pub fn decode_rgb(raw_bytes: &[u8]) -> Result<RgbImage> {
    if raw_bytes.is_empty() {
        return Err(MagnoliaError::Decode("empty upload".to_string()));
    }
    let decoded =
        image::load_from_memory(raw_bytes).map_err(|e| MagnoliaError::Decode(e.to_string()))?;
    Ok(decoded.to_rgb8())
}

/// MIME type for the detected raster format, used when no content type was
/// declared (for example when classifying a local file)
#[must_use]
pub fn sniff_content_type(raw_bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(raw_bytes).ok()?;
    let mime = match format {
        image::ImageFormat::Png => "image/png",
        image::ImageFormat::Jpeg => "image/jpeg",
        image::ImageFormat::Gif => "image/gif",
        image::ImageFormat::WebP => "image/webp",
        image::ImageFormat::Bmp => "image/bmp",
        image::ImageFormat::Tiff => "image/tiff",
        _ => "image/octet-stream",
    };
    Some(mime)
}
