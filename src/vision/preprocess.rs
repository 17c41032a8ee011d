//! Image normalization for the meter OCR model
//!
//! Turns a captured photo of any resolution into the fixed 320x320,
//! canonically oriented RGB buffer the model expects, and converts it into
//! an input tensor for model backends.

use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbImage};
use ndarray::Array4;
use tracing::debug;

use crate::error::MeterReaderError;

/// Width and height of every normalized image
pub const NORMALIZED_SIZE: u32 = 320;

/// Rotation applied to every capture to undo the sensor's landscape mount.
///
/// This is a fixed property of the one supported device mounting, not a
/// value derived from capture metadata.
pub const SENSOR_MOUNT_ROTATION: Rotation = Rotation::Deg90;

/// Clockwise rotation in quarter turns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    /// Rotation in degrees
    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 90,
            Rotation::Deg180 => 180,
            Rotation::Deg270 => 270,
        }
    }
}

/// A 320x320 RGB image in canonical orientation.
///
/// Only the normalizer can build one, so holding a `NormalizedImage` means the
/// size contract already holds.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage {
    pixels: RgbImage,
}

impl NormalizedImage {
    /// Pixel buffer
    pub fn pixels(&self) -> &RgbImage {
        &self.pixels
    }

    /// Consume into the pixel buffer
    pub fn into_pixels(self) -> RgbImage {
        self.pixels
    }

    /// Get dimensions as (width, height)
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }
}

/// Rotate then rescale an image to exactly 320x320.
///
/// Scaling is non-uniform and unfiltered, so the aspect distortion depends
/// only on the rotated input size.
pub fn normalize(raw: &DynamicImage, rotation: Rotation) -> NormalizedImage {
    let rgb = raw.to_rgb8();
    let (src_w, src_h) = rgb.dimensions();

    let rotated = match rotation {
        Rotation::Deg0 => rgb,
        Rotation::Deg90 => imageops::rotate90(&rgb),
        Rotation::Deg180 => imageops::rotate180(&rgb),
        Rotation::Deg270 => imageops::rotate270(&rgb),
    };

    let pixels = imageops::resize(&rotated, NORMALIZED_SIZE, NORMALIZED_SIZE, FilterType::Nearest);

    debug!(
        "Normalized {}x{} capture (rotated {} deg) to {}x{}",
        src_w,
        src_h,
        rotation.degrees(),
        NORMALIZED_SIZE,
        NORMALIZED_SIZE
    );

    NormalizedImage { pixels }
}

/// Decode an encoded photo and normalize it
pub fn decode_and_normalize(
    encoded: &[u8],
    rotation: Rotation,
) -> Result<NormalizedImage, MeterReaderError> {
    let raw = image::load_from_memory(encoded)?;
    Ok(normalize(&raw, rotation))
}

/// Convert a normalized image to an NHWC tensor (batch size 1) scaled to 0-1
pub fn to_input_tensor(image: &NormalizedImage) -> Array4<f32> {
    let (width, height) = image.dimensions();
    let pixels = image.pixels();

    Array4::<f32>::from_shape_fn((1, height as usize, width as usize, 3), |(_, y, x, c)| {
        pixels.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    })
}
