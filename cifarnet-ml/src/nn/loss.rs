//! Cross-entropy losses and the label targets they consume.

use crate::error::MlError;
use crate::nn::tensor::Tensor;
use serde::{Deserialize, Serialize};

/// Probabilities are clipped into `[EPSILON, 1 - EPSILON]` before taking logs.
pub const EPSILON: f32 = 1e-7;

/// Class labels for a batch of samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "values", rename_all = "snake_case")]
pub enum Targets {
    /// Raw class indices.
    Sparse(Vec<usize>),
    /// `[n, num_classes]` rows with a single 1.0 at the class index.
    OneHot(Tensor),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Self::Sparse(labels) => labels.len(),
            Self::OneHot(t) => t.batch_len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Class index per sample (arg-max for one-hot rows).
    pub fn class_indices(&self) -> Vec<usize> {
        match self {
            Self::Sparse(labels) => labels.clone(),
            Self::OneHot(t) => t.argmax_rows(),
        }
    }

    pub fn select(&self, indices: &[usize]) -> Result<Self, MlError> {
        match self {
            Self::Sparse(labels) => indices
                .iter()
                .map(|&i| {
                    labels.get(i).copied().ok_or_else(|| {
                        MlError::shape(format!("label index {i} out of range for {}", labels.len()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()
                .map(Self::Sparse),
            Self::OneHot(t) => t.select(indices).map(Self::OneHot),
        }
    }

    pub fn slice(&self, start: usize, end: usize) -> Self {
        match self {
            Self::Sparse(labels) => Self::Sparse(labels[start..end].to_vec()),
            Self::OneHot(t) => Self::OneHot(t.slice_batch(start, end)),
        }
    }
}

/// Loss function configured at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Loss {
    /// Expects one-hot targets.
    CategoricalCrossentropy { from_logits: bool },
    /// Expects class-index targets.
    SparseCategoricalCrossentropy { from_logits: bool },
}

impl Loss {
    pub fn from_logits(&self) -> bool {
        match self {
            Self::CategoricalCrossentropy { from_logits }
            | Self::SparseCategoricalCrossentropy { from_logits } => *from_logits,
        }
    }

    /// Mean loss over the batch.
    pub fn value(&self, outputs: &Tensor, targets: &Targets) -> Result<f32, MlError> {
        Ok(self.evaluate(outputs, targets, false)?.0)
    }

    /// Mean loss over the batch and its gradient w.r.t. `outputs`.
    pub fn value_and_grad(
        &self,
        outputs: &Tensor,
        targets: &Targets,
    ) -> Result<(f32, Tensor), MlError> {
        let (loss, grad) = self.evaluate(outputs, targets, true)?;
        let grad = Tensor::new(outputs.shape().to_vec(), grad)?;
        Ok((loss, grad))
    }

    fn evaluate(
        &self,
        outputs: &Tensor,
        targets: &Targets,
        with_grad: bool,
    ) -> Result<(f32, Vec<f32>), MlError> {
        let width = match outputs.shape() {
            [_, width] => *width,
            other => {
                return Err(MlError::shape(format!(
                    "loss expects [batch, classes] outputs, got {other:?}"
                )));
            }
        };
        let n = outputs.batch_len();
        if targets.len() != n {
            return Err(MlError::shape(format!(
                "{} targets for a batch of {n} outputs",
                targets.len()
            )));
        }
        let rows = self.target_rows(targets, width)?;

        let mut total = 0.0f64;
        let mut grad = if with_grad {
            vec![0.0f32; outputs.len()]
        } else {
            Vec::new()
        };
        let scale = 1.0 / n.max(1) as f32;

        for (b, t) in rows.chunks(width).enumerate() {
            let out = outputs.sample(b);
            if self.from_logits() {
                let max = out.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let log_sum = out.iter().map(|z| (z - max).exp()).sum::<f32>().ln();
                for j in 0..width {
                    let log_p = out[j] - max - log_sum;
                    total -= (t[j] * log_p) as f64;
                    if with_grad {
                        grad[b * width + j] = (log_p.exp() - t[j]) * scale;
                    }
                }
            } else {
                for j in 0..width {
                    let p = out[j].clamp(EPSILON, 1.0 - EPSILON);
                    total -= (t[j] * p.ln()) as f64;
                    if with_grad {
                        grad[b * width + j] = -t[j] / p * scale;
                    }
                }
            }
        }

        Ok(((total / n.max(1) as f64) as f32, grad))
    }

    /// Dense target distribution per row, validating the target encoding.
    fn target_rows(&self, targets: &Targets, width: usize) -> Result<Vec<f32>, MlError> {
        match (self, targets) {
            (Self::CategoricalCrossentropy { .. }, Targets::OneHot(t)) => {
                if t.sample_shape() != [width].as_slice() {
                    return Err(MlError::shape(format!(
                        "one-hot targets of shape {:?} for {width} outputs",
                        t.sample_shape()
                    )));
                }
                Ok(t.data().to_vec())
            }
            (Self::SparseCategoricalCrossentropy { .. }, Targets::Sparse(labels)) => {
                let mut rows = vec![0.0f32; labels.len() * width];
                for (b, &label) in labels.iter().enumerate() {
                    if label >= width {
                        return Err(MlError::dataset(format!(
                            "label {label} outside the {width} output classes"
                        )));
                    }
                    rows[b * width + label] = 1.0;
                }
                Ok(rows)
            }
            (Self::CategoricalCrossentropy { .. }, Targets::Sparse(_)) => Err(MlError::config(
                "categorical cross-entropy needs one-hot targets; use the sparse loss for class indices",
            )),
            (Self::SparseCategoricalCrossentropy { .. }, Targets::OneHot(_)) => Err(MlError::config(
                "sparse categorical cross-entropy needs class-index targets",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::activation::softmax;

    #[test]
    fn test_logits_and_probability_losses_agree() {
        let logits = Tensor::new(vec![2, 3], vec![0.2, 1.5, -0.7, 2.0, 0.1, 0.3]).unwrap();
        let probs = Tensor::new(vec![2, 3], softmax(logits.data(), 3)).unwrap();
        let sparse = Targets::Sparse(vec![1, 0]);
        let a = Loss::SparseCategoricalCrossentropy { from_logits: true }
            .value(&logits, &sparse)
            .unwrap();
        let b = Loss::SparseCategoricalCrossentropy { from_logits: false }
            .value(&probs, &sparse)
            .unwrap();
        assert!((a - b).abs() < 1e-5);
    }

    #[test]
    fn test_logits_gradient_is_probs_minus_targets() {
        let logits = Tensor::new(vec![1, 3], vec![1.0, 2.0, 3.0]).unwrap();
        let (_, grad) = Loss::SparseCategoricalCrossentropy { from_logits: true }
            .value_and_grad(&logits, &Targets::Sparse(vec![2]))
            .unwrap();
        let p = softmax(logits.data(), 3);
        assert!((grad.data()[0] - p[0]).abs() < 1e-6);
        assert!((grad.data()[2] - (p[2] - 1.0)).abs() < 1e-6);
    }

    #[test]
    fn test_encoding_mismatch_is_config_error() {
        let out = Tensor::new(vec![1, 2], vec![0.5, 0.5]).unwrap();
        let err = Loss::CategoricalCrossentropy { from_logits: false }
            .value(&out, &Targets::Sparse(vec![0]))
            .unwrap_err();
        assert!(matches!(err, MlError::Config(_)));
    }

    #[test]
    fn test_clipping_keeps_loss_finite() {
        let out = Tensor::new(vec![1, 2], vec![0.0, 1.0]).unwrap();
        let onehot = Tensor::new(vec![1, 2], vec![1.0, 0.0]).unwrap();
        let loss = Loss::CategoricalCrossentropy { from_logits: false }
            .value(&out, &Targets::OneHot(onehot))
            .unwrap();
        assert!(loss.is_finite());
        assert!((loss - (-EPSILON.ln())).abs() < 1e-3);
    }
}
