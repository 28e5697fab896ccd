//! Image datasets: raw and labeled collections, the CIFAR-10 binary loader,
//! custom photographs, preprocessing and train/validation splitting.

pub mod cifar;
pub mod image;
pub mod preprocess;
pub mod split;

use crate::error::MlError;
use crate::nn::{Targets, Tensor};
use serde::{Deserialize, Serialize};

pub use self::cifar::{CifarDataset, CifarLoader};
pub use self::image::{PixelStats, load_custom_image};
pub use self::preprocess::{LabelEncoding, decode_one_hot, normalize, one_hot, prepare_samples};
pub use self::split::{Fold, Split, k_fold_indices, split_indices, train_validation_split};

/// Built-in CIFAR-10 class names, indexed by label.
pub const CLASS_NAMES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

pub const NUM_CLASSES: usize = CLASS_NAMES.len();

/// Unnormalized images stored as bytes in HWC order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawImages {
    count: usize,
    height: usize,
    width: usize,
    channels: usize,
    pixels: Vec<u8>,
}

impl RawImages {
    pub fn new(
        count: usize,
        (height, width, channels): (usize, usize, usize),
        pixels: Vec<u8>,
    ) -> Result<Self, MlError> {
        let expected = count * height * width * channels;
        if pixels.len() != expected {
            return Err(MlError::shape(format!(
                "{count} images of {height}x{width}x{channels} need {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            count,
            height,
            width,
            channels,
            pixels,
        })
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// `(height, width, channels)` of every image.
    pub fn image_shape(&self) -> (usize, usize, usize) {
        (self.height, self.width, self.channels)
    }

    /// Full shape with the batch axis first.
    pub fn shape(&self) -> [usize; 4] {
        [self.count, self.height, self.width, self.channels]
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn image(&self, index: usize) -> &[u8] {
        let len = self.height * self.width * self.channels;
        &self.pixels[index * len..(index + 1) * len]
    }

    /// Gather images by index, preserving the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, MlError> {
        let len = self.height * self.width * self.channels;
        let mut pixels = Vec::with_capacity(indices.len() * len);
        for &i in indices {
            if i >= self.count {
                return Err(MlError::shape(format!(
                    "image index {i} out of range for {} images",
                    self.count
                )));
            }
            pixels.extend_from_slice(self.image(i));
        }
        Self::new(indices.len(), self.image_shape(), pixels)
    }
}

/// Images paired with integer class labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabeledImages {
    pub images: RawImages,
    pub labels: Vec<u8>,
}

impl LabeledImages {
    pub fn new(images: RawImages, labels: Vec<u8>) -> Result<Self, MlError> {
        if images.len() != labels.len() {
            return Err(MlError::dataset(format!(
                "{} images but {} labels",
                images.len(),
                labels.len()
            )));
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Number of samples per class, indexed by label.
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0; num_classes];
        for &label in &self.labels {
            if let Some(c) = counts.get_mut(label as usize) {
                *c += 1;
            }
        }
        counts
    }

    /// Gather samples by index, preserving the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, MlError> {
        let labels = indices
            .iter()
            .map(|&i| {
                self.labels.get(i).copied().ok_or_else(|| {
                    MlError::shape(format!("label index {i} out of range for {}", self.labels.len()))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(self.images.select(indices)?, labels)
    }

    pub fn summary(&self, class_names: &[String]) -> DatasetSummary {
        let counts = self.class_counts(class_names.len());
        DatasetSummary {
            shape: self.images.shape(),
            class_counts: class_names.iter().cloned().zip(counts).collect(),
        }
    }
}

/// Shape and per-class counts of a labeled collection, for console reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub shape: [usize; 4],
    pub class_counts: Vec<(String, usize)>,
}

impl std::fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "shape: {:?}", self.shape)?;
        for (name, count) in &self.class_counts {
            writeln!(f, "  {name:<12} {count:>6}")?;
        }
        Ok(())
    }
}

/// Normalized images and their targets, ready for a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Samples {
    pub images: Tensor,
    pub targets: Targets,
}

impl Samples {
    pub fn new(images: Tensor, targets: Targets) -> Result<Self, MlError> {
        if images.batch_len() != targets.len() {
            return Err(MlError::shape(format!(
                "{} images but {} targets",
                images.batch_len(),
                targets.len()
            )));
        }
        Ok(Self { images, targets })
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn select(&self, indices: &[usize]) -> Result<Self, MlError> {
        Ok(Self {
            images: self.images.select(indices)?,
            targets: self.targets.select(indices)?,
        })
    }
}
