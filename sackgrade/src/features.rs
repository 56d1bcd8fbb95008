//! Color statistics descriptor fed to the classifier.
//!
//! Layout of the 68 values:
//!
//! | range    | content                                   |
//! |----------|-------------------------------------------|
//! | `0..3`   | mean R, G, B                              |
//! | `3..6`   | standard deviation R, G, B                |
//! | `6..9`   | mean H, S, V                              |
//! | `9..12`  | standard deviation H, S, V                |
//! | `12..44` | hue histogram, 32 bins over `[0, 180)`    |
//! | `44..60` | saturation histogram, 16 bins `[0, 256)`  |
//! | `60..68` | value histogram, 8 bins over `[0, 256)`   |
//!
//! HSV uses the 8-bit convention of the training pipeline (hue halved to fit a byte) and
//! the same fixed-point arithmetic, so features are bit-identical to the ones the model
//! was fitted on.

use once_cell::sync::Lazy;
use std::ops::Range;

use crate::error::{DetectorError, DetectorResult};
use crate::normalize::{NormalizedImage, CHANNELS};

pub const FEATURE_DIM: usize = 68;

pub const HUE_BINS: usize = 32;
pub const SATURATION_BINS: usize = 16;
pub const VALUE_BINS: usize = 8;

const HUE_RANGE: f64 = 180.0;
const BYTE_RANGE: f64 = 256.0;
const HIST_EPSILON: f32 = 1e-7;

const RGB_MEAN: Range<usize> = 0..3;
const RGB_STD: Range<usize> = 3..6;
const HSV_MEAN: Range<usize> = 6..9;
const HSV_STD: Range<usize> = 9..12;
const HUE_HIST: Range<usize> = 12..44;
const SATURATION_HIST: Range<usize> = 44..60;
const VALUE_HIST: Range<usize> = 60..68;

const HSV_SHIFT: i32 = 12;
const HSV_ROUND: i32 = 1 << (HSV_SHIFT - 1);

/// `round((255 << 12) / v)`, zero for `v == 0`.
static SATURATION_DIV: Lazy<[i32; 256]> = Lazy::new(|| {
    let mut table = [0i32; 256];
    for (v, entry) in table.iter_mut().enumerate().skip(1) {
        *entry = ((255 << HSV_SHIFT) as f64 / v as f64).round() as i32;
    }
    table
});

/// `round((180 << 12) / (6 * diff))`, zero for `diff == 0`.
static HUE_DIV: Lazy<[i32; 256]> = Lazy::new(|| {
    let mut table = [0i32; 256];
    for (diff, entry) in table.iter_mut().enumerate().skip(1) {
        *entry = ((180 << HSV_SHIFT) as f64 / (6.0 * diff as f64)).round() as i32;
    }
    table
});

/// Fixed-length feature vector.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector([f32; FEATURE_DIM]);

impl FeatureVector {
    pub fn from_array(values: [f32; FEATURE_DIM]) -> Self {
        Self(values)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        FEATURE_DIM
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn rgb_mean(&self) -> &[f32] {
        &self.0[RGB_MEAN]
    }

    pub fn rgb_std(&self) -> &[f32] {
        &self.0[RGB_STD]
    }

    pub fn hsv_mean(&self) -> &[f32] {
        &self.0[HSV_MEAN]
    }

    pub fn hsv_std(&self) -> &[f32] {
        &self.0[HSV_STD]
    }

    pub fn hue_histogram(&self) -> &[f32] {
        &self.0[HUE_HIST]
    }

    pub fn saturation_histogram(&self) -> &[f32] {
        &self.0[SATURATION_HIST]
    }

    pub fn value_histogram(&self) -> &[f32] {
        &self.0[VALUE_HIST]
    }
}

impl TryFrom<&[f32]> for FeatureVector {
    type Error = DetectorError;

    fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
        let array: [f32; FEATURE_DIM] = values.try_into().map_err(|_| {
            DetectorError::FeatureExtraction(format!(
                "expected {FEATURE_DIM} features, got {}",
                values.len()
            ))
        })?;
        Ok(Self(array))
    }
}

/// Convert one RGB pixel to 8-bit HSV (`H` in `[0, 180)`, `S` and `V` in `[0, 256)`).
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(i32::from);

    let v = r.max(g).max(b);
    let diff = v - r.min(g).min(b);

    let s = (diff * SATURATION_DIV[v as usize] + HSV_ROUND) >> HSV_SHIFT;

    let h_raw = if v == r {
        g - b
    } else if v == g {
        b - r + 2 * diff
    } else {
        r - g + 4 * diff
    };
    let mut h = (h_raw * HUE_DIV[diff as usize] + HSV_ROUND) >> HSV_SHIFT;
    if h < 0 {
        h += HUE_RANGE as i32;
    }

    [h as u8, s as u8, v as u8]
}

/// Extract the descriptor from a normalized image.
pub fn extract(image: &NormalizedImage) -> DetectorResult<FeatureVector> {
    extract_from_raster(image.width(), image.height(), image.as_raw())
}

pub(crate) fn extract_from_raster(
    width: u32,
    height: u32,
    data: &[u8],
) -> DetectorResult<FeatureVector> {
    let pixel_count = width as usize * height as usize;
    if pixel_count == 0 || data.len() != pixel_count * CHANNELS {
        return Err(DetectorError::FeatureExtraction(format!(
            "malformed raster: {} bytes for {width}x{height}x{CHANNELS}",
            data.len()
        )));
    }

    let hsv: Vec<u8> = data
        .chunks_exact(CHANNELS)
        .flat_map(|px| rgb_to_hsv([px[0], px[1], px[2]]))
        .collect();

    let (rgb_mean, rgb_std) = channel_stats(data);
    let (hsv_mean, hsv_std) = channel_stats(&hsv);

    let hue_hist = histogram(&hsv, 0, HUE_BINS, HUE_RANGE);
    let sat_hist = histogram(&hsv, 1, SATURATION_BINS, BYTE_RANGE);
    let val_hist = histogram(&hsv, 2, VALUE_BINS, BYTE_RANGE);

    let mut values = [0f32; FEATURE_DIM];
    values[RGB_MEAN].copy_from_slice(&rgb_mean);
    values[RGB_STD].copy_from_slice(&rgb_std);
    values[HSV_MEAN].copy_from_slice(&hsv_mean);
    values[HSV_STD].copy_from_slice(&hsv_std);
    values[HUE_HIST].copy_from_slice(&hue_hist);
    values[SATURATION_HIST].copy_from_slice(&sat_hist);
    values[VALUE_HIST].copy_from_slice(&val_hist);

    Ok(FeatureVector(values))
}

/// Per-channel mean and population standard deviation, accumulated in f64.
fn channel_stats(data: &[u8]) -> ([f32; 3], [f32; 3]) {
    let n = (data.len() / CHANNELS) as f64;

    let mut sums = [0f64; 3];
    for px in data.chunks_exact(CHANNELS) {
        for (c, sum) in sums.iter_mut().enumerate() {
            *sum += px[c] as f64;
        }
    }
    let means = sums.map(|s| s / n);

    let mut sq = [0f64; 3];
    for px in data.chunks_exact(CHANNELS) {
        for (c, acc) in sq.iter_mut().enumerate() {
            let d = px[c] as f64 - means[c];
            *acc += d * d;
        }
    }

    (
        means.map(|m| m as f32),
        sq.map(|s| (s / n).sqrt() as f32),
    )
}

/// Uniform histogram of one channel over `[0, range)`, normalized to sum to ~1.
fn histogram(data: &[u8], channel: usize, bins: usize, range: f64) -> Vec<f32> {
    let scale = bins as f64 / range;
    let mut counts = vec![0f32; bins];
    for px in data.chunks_exact(CHANNELS) {
        let value = px[channel] as f64;
        if value < range {
            let bin = ((value * scale).floor() as usize).min(bins - 1);
            counts[bin] += 1.0;
        }
    }

    let denom = counts.iter().sum::<f32>() + HIST_EPSILON;
    counts.iter().map(|c| c / denom).collect()
}
