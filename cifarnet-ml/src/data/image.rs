//! Loading a single photograph for classification.

use crate::data::RawImages;
use crate::error::MlError;
use crate::nn::Tensor;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Read a JPEG or PNG, convert it to RGB and resize it to `size` (height,
/// width) with nearest-neighbour sampling. Returns a one-image collection.
pub fn load_custom_image(path: &Path, (height, width): (usize, usize)) -> Result<RawImages, MlError> {
    if !path.exists() {
        return Err(MlError::not_found(format!("image {}", path.display())));
    }
    let decoded = image::open(path)?;
    tracing::debug!(
        path = %path.display(),
        width = decoded.width(),
        height = decoded.height(),
        "decoded custom image"
    );
    let resized = decoded
        .resize_exact(width as u32, height as u32, FilterType::Nearest)
        .to_rgb8();
    RawImages::new(1, (height, width, 3), resized.into_raw())
}

/// Minimum, maximum and mean pixel value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl PixelStats {
    pub fn of_raw(images: &RawImages) -> Self {
        Self::compute(images.pixels().iter().map(|&p| p as f32))
    }

    pub fn of_tensor(tensor: &Tensor) -> Self {
        Self::compute(tensor.data().iter().copied())
    }

    fn compute(values: impl Iterator<Item = f32>) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f64;
        let mut n = 0usize;
        for v in values {
            min = min.min(v);
            max = max.max(v);
            sum += v as f64;
            n += 1;
        }
        if n == 0 {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
            };
        }
        Self {
            min,
            max,
            mean: (sum / n as f64) as f32,
        }
    }
}

impl std::fmt::Display for PixelStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "min={:.4} max={:.4} mean={:.4}", self.min, self.max, self.mean)
    }
}
