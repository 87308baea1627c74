//! Import of ordinary raster images into the raw pixel layout.
//!
//! A decoded image becomes a pixel set with one Z-section, one timepoint
//! and one channel per colour channel (luma, luma+alpha, RGB or RGBA).
//! 8-bit images import as `uint8`, 16-bit as `uint16` and 32-bit float as
//! `float`, with sample values unchanged.

use std::path::Path;

use image::DynamicImage;
use roiscope_core::{Mask, PixelSetDimensions, PixelSetId, PixelType, RoiError};

use crate::raw::{ByteOrder, RawMetadata, write_pixel_set};

/// Errors that can occur while importing an image.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// The image bytes could not be decoded.
    #[error("image decode failed: {0}")]
    Decode(#[from] image::ImageError),

    /// The decoded colour layout has no pixel-set equivalent.
    #[error("unsupported colour type: {0}")]
    UnsupportedColor(String),

    /// Writing the pixel set failed.
    #[error(transparent)]
    Store(#[from] RoiError),
}

/// Widen a sample slice to `f64`.
fn widen<T: Copy + Into<f64>>(raw: &[T]) -> Vec<f64> {
    raw.iter().map(|&v| v.into()).collect()
}

/// Sample type, channel count and interleaved samples of an image.
fn interleaved(image: &DynamicImage) -> Result<(PixelType, u32, Vec<f64>), ImportError> {
    Ok(match image {
        DynamicImage::ImageLuma8(b) => (PixelType::Uint8, 1, widen(b.as_raw())),
        DynamicImage::ImageLumaA8(b) => (PixelType::Uint8, 2, widen(b.as_raw())),
        DynamicImage::ImageRgb8(b) => (PixelType::Uint8, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba8(b) => (PixelType::Uint8, 4, widen(b.as_raw())),
        DynamicImage::ImageLuma16(b) => (PixelType::Uint16, 1, widen(b.as_raw())),
        DynamicImage::ImageLumaA16(b) => (PixelType::Uint16, 2, widen(b.as_raw())),
        DynamicImage::ImageRgb16(b) => (PixelType::Uint16, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba16(b) => (PixelType::Uint16, 4, widen(b.as_raw())),
        DynamicImage::ImageRgb32F(b) => (PixelType::Float, 3, widen(b.as_raw())),
        DynamicImage::ImageRgba32F(b) => (PixelType::Float, 4, widen(b.as_raw())),
        other => return Err(ImportError::UnsupportedColor(format!("{:?}", other.color()))),
    })
}

/// Convert a decoded image into pixel-set metadata and XYZCT samples.
///
/// # Errors
///
/// Returns [`ImportError::UnsupportedColor`] for colour layouts without a
/// pixel-set equivalent.
pub fn pixel_set_from_image(image: &DynamicImage) -> Result<(RawMetadata, Vec<f64>), ImportError> {
    let (pixel_type, channels, samples) = interleaved(image)?;
    let dimensions = PixelSetDimensions::new(image.width(), image.height(), 1, channels, 1);
    let plane = dimensions.plane_len();
    let stride = channels as usize;

    // Interleaved (x, y, c) -> planar c-major.
    let mut planar = vec![0.0; dimensions.total_len()];
    for (i, value) in samples.into_iter().enumerate() {
        planar[(i % stride) * plane + i / stride] = value;
    }

    let metadata = RawMetadata {
        dimensions,
        pixel_type,
        byte_order: ByteOrder::Little,
    };
    Ok((metadata, planar))
}

/// Decode `image_bytes` (PNG, JPEG, TIFF, BMP) and write it into `root` as
/// pixel set `pixel_set`.
///
/// # Errors
///
/// Returns [`ImportError::Decode`] if the bytes are not a supported image,
/// [`ImportError::UnsupportedColor`] for unsupported colour layouts and
/// [`ImportError::Store`] if writing fails.
pub fn import_image(
    image_bytes: &[u8],
    root: &Path,
    pixel_set: PixelSetId,
) -> Result<RawMetadata, ImportError> {
    let image = image::load_from_memory(image_bytes)?;
    let (metadata, samples) = pixel_set_from_image(&image)?;
    write_pixel_set(root, pixel_set, &metadata, &samples)?;
    tracing::info!(
        %pixel_set,
        width = metadata.dimensions.size_x,
        height = metadata.dimensions.size_y,
        channels = metadata.dimensions.size_c,
        "imported image"
    );
    Ok(metadata)
}

/// Decode `image_bytes` into a mask shape anchored at `(x, y)`; every
/// non-zero luma pixel is set.
///
/// # Errors
///
/// Returns [`ImportError::Decode`] if the bytes are not a supported image.
pub fn load_mask(image_bytes: &[u8], x: f64, y: f64) -> Result<Mask, ImportError> {
    let gray = image::load_from_memory(image_bytes)?.to_luma8();
    Ok(Mask::from_gray(x, y, &gray))
}
