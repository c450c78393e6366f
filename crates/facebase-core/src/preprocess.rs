//! Image preparation: converts an arbitrary face crop into the fixed-size,
//! fixed-channel sample a recognizer expects.
//!
//! Every numeric step runs inside [`contained`]: an error or a panic is
//! logged and the caller receives an empty [`Sample`], which downstream code
//! treats as "skip this image".

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, RgbImage};
use ndarray::Array3;
use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("image has no pixels ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("sample size must be non-zero")]
    ZeroSampleSize,
    #[error("pixel buffer does not match {width}x{height}x{channels}")]
    Shape { width: u32, height: u32, channels: usize },
}

/// Channel layout of a prepared sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorMode {
    /// Single 8-bit luminance channel.
    Gray,
    /// Three 8-bit channels, R G B.
    Rgb,
}

impl ColorMode {
    pub fn channels(self) -> usize {
        match self {
            ColorMode::Gray => 1,
            ColorMode::Rgb => 3,
        }
    }
}

/// Square size and channel layout a recognizer wants its samples in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleSpec {
    pub size: u32,
    pub mode: ColorMode,
}

impl SampleSpec {
    pub const fn gray(size: u32) -> Self {
        Self { size, mode: ColorMode::Gray }
    }

    pub const fn rgb(size: u32) -> Self {
        Self { size, mode: ColorMode::Rgb }
    }
}

/// A prepared face sample: `(height, width, channels)` of 8-bit pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pixels: Array3<u8>,
}

impl Sample {
    /// The "skip this image" sample.
    pub fn empty() -> Self {
        Self {
            pixels: Array3::zeros((0, 0, 0)),
        }
    }

    pub fn from_pixels(pixels: Array3<u8>) -> Self {
        Self { pixels }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn width(&self) -> usize {
        self.pixels.shape()[1]
    }

    pub fn height(&self) -> usize {
        self.pixels.shape()[0]
    }

    pub fn channels(&self) -> usize {
        self.pixels.shape()[2]
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// Whether this sample already has the layout `spec` asks for.
    pub fn matches(&self, spec: SampleSpec) -> bool {
        !self.is_empty()
            && self.width() == spec.size as usize
            && self.height() == spec.size as usize
            && self.channels() == spec.mode.channels()
    }

    /// Pixel values scaled to [0, 1] in row-major, channel-interleaved order.
    pub fn to_unit_vector(&self) -> Vec<f32> {
        self.pixels.iter().map(|&p| p as f32 / 255.0).collect()
    }

    /// Convert back into an image, e.g. to re-run preparation or for diagnostics.
    pub fn to_image(&self) -> Option<DynamicImage> {
        let (h, w, c) = self.pixels.dim();
        let raw: Vec<u8> = self.pixels.iter().copied().collect();
        match c {
            1 => GrayImage::from_raw(w as u32, h as u32, raw).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w as u32, h as u32, raw).map(DynamicImage::ImageRgb8),
            _ => None,
        }
    }
}

/// Run a numeric step, converting both returned errors and panics into `None`.
///
/// Failures are logged at error severity with the operation name and never
/// propagate further.
pub fn contained<T, E: Display>(op: &str, f: impl FnOnce() -> Result<T, E>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            tracing::error!(op, error = %err, "numeric backend failure");
            None
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(op, panic = %message, "numeric backend fault");
            None
        }
    }
}

/// Converts images into samples of one [`SampleSpec`].
#[derive(Debug, Clone, Copy)]
pub struct Preprocessor {
    spec: SampleSpec,
}

impl Preprocessor {
    pub fn new(spec: SampleSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> SampleSpec {
        self.spec
    }

    /// Prepare with the configured channel layout.
    pub fn prepare(&self, image: &DynamicImage) -> Sample {
        contained("prepare", || try_prepare(image, self.spec)).unwrap_or_else(Sample::empty)
    }
}

/// Convert, then resize to a `spec.size` square ignoring aspect ratio.
///
/// Input already at the target size is not resampled, so preparing a
/// prepared sample's image yields the same sample.
pub fn try_prepare(image: &DynamicImage, spec: SampleSpec) -> Result<Sample, PreprocessError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PreprocessError::EmptyImage {
            width: image.width(),
            height: image.height(),
        });
    }
    if spec.size == 0 {
        return Err(PreprocessError::ZeroSampleSize);
    }

    let size = spec.size;
    let raw = match spec.mode {
        ColorMode::Gray => {
            let mut gray = image.to_luma8();
            if gray.dimensions() != (size, size) {
                gray = imageops::resize(&gray, size, size, FilterType::Triangle);
            }
            gray.into_raw()
        }
        ColorMode::Rgb => {
            let mut rgb = image.to_rgb8();
            if rgb.dimensions() != (size, size) {
                rgb = imageops::resize(&rgb, size, size, FilterType::Triangle);
            }
            rgb.into_raw()
        }
    };

    let channels = spec.mode.channels();
    let pixels = Array3::from_shape_vec((size as usize, size as usize, channels), raw).map_err(|_| {
        PreprocessError::Shape {
            width: size,
            height: size,
            channels,
        }
    })?;
    Ok(Sample::from_pixels(pixels))
}
