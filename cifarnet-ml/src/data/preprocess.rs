//! Conversions from raw bytes and integer labels into model inputs.

use crate::data::{LabeledImages, RawImages, Samples};
use crate::error::MlError;
use crate::nn::{Targets, Tensor};
use serde::{Deserialize, Serialize};

/// How class labels are presented to the loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    /// Class indices, for the sparse cross-entropy loss.
    Sparse,
    /// One-hot rows, for the categorical cross-entropy loss.
    #[default]
    OneHot,
}

/// Scale bytes into `[0, 1]`. Produces a fresh tensor; the input is untouched.
pub fn normalize(images: &RawImages) -> Tensor {
    let data = images.pixels().iter().map(|&p| p as f32 / 255.0).collect();
    Tensor::from_parts(images.shape().to_vec(), data)
}

/// One-hot encode `labels` into an `[n, num_classes]` tensor.
pub fn one_hot(labels: &[u8], num_classes: usize) -> Result<Tensor, MlError> {
    let mut data = vec![0.0f32; labels.len() * num_classes];
    for (i, &label) in labels.iter().enumerate() {
        let label = label as usize;
        if label >= num_classes {
            return Err(MlError::dataset(format!(
                "label {label} at index {i} is outside {num_classes} classes"
            )));
        }
        data[i * num_classes + label] = 1.0;
    }
    Tensor::new(vec![labels.len(), num_classes], data)
}

/// Class index of each one-hot row.
pub fn decode_one_hot(encoded: &Tensor) -> Vec<usize> {
    encoded.argmax_rows()
}

/// Normalize images and encode labels in one step.
pub fn prepare_samples(
    labeled: &LabeledImages,
    encoding: LabelEncoding,
    num_classes: usize,
) -> Result<Samples, MlError> {
    let images = normalize(&labeled.images);
    let targets = match encoding {
        LabelEncoding::OneHot => Targets::OneHot(one_hot(&labeled.labels, num_classes)?),
        LabelEncoding::Sparse => {
            if let Some(&bad) = labeled.labels.iter().find(|&&l| l as usize >= num_classes) {
                return Err(MlError::dataset(format!(
                    "label {bad} is outside {num_classes} classes"
                )));
            }
            Targets::Sparse(labeled.labels.iter().map(|&l| l as usize).collect())
        }
    };
    Samples::new(images, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_normalize_scales_once() {
        let raw = RawImages::new(1, (1, 1, 3), vec![0, 51, 255]).unwrap();
        let t = normalize(&raw);
        assert_eq!(t.shape(), &[1, 1, 1, 3]);
        assert_eq!(t.data(), &[0.0, 0.2, 1.0]);
        assert_eq!(raw.pixels(), &[0, 51, 255]);
    }

    #[test]
    fn test_one_hot_and_decode() {
        let encoded = one_hot(&[3, 0, 9], 10).unwrap();
        assert_eq!(encoded.shape(), &[3, 10]);
        assert_eq!(encoded.sample(0)[3], 1.0);
        assert_eq!(encoded.sample(0).iter().sum::<f32>(), 1.0);
        assert_eq!(decode_one_hot(&encoded), vec![3, 0, 9]);
    }

    #[test]
    fn test_one_hot_rejects_out_of_range_label() {
        assert!(matches!(one_hot(&[10], 10), Err(MlError::Dataset(_))));
    }

    #[test]
    fn test_prepare_samples_encodings() {
        let raw = RawImages::new(2, (1, 1, 1), vec![0, 255]).unwrap();
        let labeled = LabeledImages::new(raw, vec![1, 4]).unwrap();
        let sparse = prepare_samples(&labeled, LabelEncoding::Sparse, 10).unwrap();
        assert_eq!(sparse.targets, Targets::Sparse(vec![1, 4]));
        let onehot = prepare_samples(&labeled, LabelEncoding::OneHot, 10).unwrap();
        assert_eq!(onehot.targets.class_indices(), vec![1, 4]);
    }
}
