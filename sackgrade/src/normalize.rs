//! Image normalization: any RGB raster in, a fixed 128x128 RGB raster out.

use image::{imageops, imageops::FilterType, RgbImage};
use log::debug;

use crate::error::{DetectorError, DetectorResult};

/// Side length of the normalized raster.
pub const NORMALIZED_SIZE: u32 = 128;

/// Channels per pixel (R, G, B).
pub const CHANNELS: usize = 3;

/// Resampling filter. Feature parity with the training pipeline depends on this
/// never changing between model versions.
pub const RESIZE_FILTER: FilterType = FilterType::Triangle;

/// A 128x128 RGB raster. Only constructible through [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedImage(RgbImage);

impl NormalizedImage {
    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    /// Interleaved RGB bytes, row-major.
    pub fn as_raw(&self) -> &[u8] {
        self.0.as_raw()
    }

    pub fn as_image(&self) -> &RgbImage {
        &self.0
    }
}

/// Resample an RGB image to the fixed normalized size.
pub fn normalize(image: &RgbImage) -> DetectorResult<NormalizedImage> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(DetectorError::InvalidImage(format!(
            "image has zero extent ({width}x{height})"
        )));
    }

    let resized = if (width, height) == (NORMALIZED_SIZE, NORMALIZED_SIZE) {
        image.clone()
    } else {
        imageops::resize(image, NORMALIZED_SIZE, NORMALIZED_SIZE, RESIZE_FILTER)
    };

    debug!("Normalized {width}x{height} image to {NORMALIZED_SIZE}x{NORMALIZED_SIZE}");
    Ok(NormalizedImage(resized))
}

/// Normalize an interleaved raster whose layout is described by the caller.
///
/// `channels` must be 3 and the bytes must be in R, G, B order.
pub fn normalize_raw(
    width: u32,
    height: u32,
    channels: usize,
    data: &[u8],
) -> DetectorResult<NormalizedImage> {
    if data.is_empty() {
        return Err(DetectorError::InvalidImage("image buffer is empty".into()));
    }
    if channels != CHANNELS {
        return Err(DetectorError::InvalidImage(format!(
            "expected {CHANNELS} channels, got {channels}"
        )));
    }
    if width == 0 || height == 0 {
        return Err(DetectorError::InvalidImage(format!(
            "image has zero extent ({width}x{height})"
        )));
    }

    let expected = width as usize * height as usize * channels;
    if data.len() != expected {
        return Err(DetectorError::InvalidImage(format!(
            "buffer holds {} bytes, {width}x{height}x{channels} needs {expected}",
            data.len()
        )));
    }

    let image = RgbImage::from_raw(width, height, data.to_vec()).ok_or_else(|| {
        DetectorError::InvalidImage(format!("cannot build {width}x{height} RGB raster"))
    })?;
    normalize(&image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn test_normalize_resizes_to_fixed_size() {
        let img = RgbImage::from_pixel(259, 194, Rgb([10, 20, 30]));
        let normalized = normalize(&img).unwrap();
        assert_eq!(normalized.width(), NORMALIZED_SIZE);
        assert_eq!(normalized.height(), NORMALIZED_SIZE);
        assert_eq!(normalized.as_raw().len(), 128 * 128 * 3);
    }

    #[test]
    fn test_normalize_uniform_color_is_preserved() {
        let img = RgbImage::from_pixel(259, 194, Rgb([255, 0, 0]));
        let normalized = normalize(&img).unwrap();
        assert!(normalized
            .as_image()
            .pixels()
            .all(|p| *p == Rgb([255, 0, 0])));
    }

    #[test]
    fn test_normalize_upsamples_tiny_image() {
        let img = RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]));
        let normalized = normalize(&img).unwrap();
        assert_eq!(normalized.as_image().dimensions(), (128, 128));
    }

    #[test]
    fn test_normalize_rejects_zero_extent() {
        let img = RgbImage::new(0, 10);
        let err = normalize(&img).unwrap_err();
        assert!(matches!(err, DetectorError::InvalidImage(_)));
    }

    #[test]
    fn test_normalize_raw_validation() {
        assert!(matches!(
            normalize_raw(2, 2, 3, &[]),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            normalize_raw(2, 2, 4, &[0u8; 16]),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            normalize_raw(2, 2, 3, &[0u8; 11]),
            Err(DetectorError::InvalidImage(_))
        ));
        assert!(matches!(
            normalize_raw(0, 2, 3, &[0u8; 6]),
            Err(DetectorError::InvalidImage(_))
        ));

        let normalized = normalize_raw(2, 2, 3, &[7u8; 12]).unwrap();
        assert_eq!(normalized.as_image().dimensions(), (128, 128));
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let img = RgbImage::from_fn(37, 53, |x, y| Rgb([(x * 7) as u8, (y * 3) as u8, 99]));
        assert_eq!(normalize(&img).unwrap(), normalize(&img).unwrap());
    }
}
