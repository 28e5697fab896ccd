//! Dense `f32` tensor with a leading batch axis.

use crate::error::MlError;
use serde::{Deserialize, Serialize};

/// Row-major tensor. The first axis is the batch axis for every tensor that
/// flows between layers; images use `[n, height, width, channels]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, MlError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(MlError::shape(format!(
                "shape {shape:?} needs {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// Build from parts whose lengths the caller already guarantees agree.
    pub(crate) fn from_parts(shape: Vec<usize>, data: Vec<f32>) -> Self {
        debug_assert_eq!(shape.iter().product::<usize>(), data.len());
        Self { shape, data }
    }

    pub fn zeros(shape: Vec<usize>) -> Self {
        let len = shape.iter().product();
        Self {
            shape,
            data: vec![0.0; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of samples along the batch axis.
    pub fn batch_len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Shape of a single sample (everything after the batch axis).
    pub fn sample_shape(&self) -> &[usize] {
        self.shape.get(1..).unwrap_or(&[])
    }

    /// Number of values in a single sample.
    pub fn sample_len(&self) -> usize {
        self.sample_shape().iter().product()
    }

    pub fn sample(&self, index: usize) -> &[f32] {
        let len = self.sample_len();
        &self.data[index * len..(index + 1) * len]
    }

    /// Gather samples by index into a new tensor, in the given order.
    pub fn select(&self, indices: &[usize]) -> Result<Self, MlError> {
        let n = self.batch_len();
        let len = self.sample_len();
        let mut data = Vec::with_capacity(indices.len() * len);
        for &i in indices {
            if i >= n {
                return Err(MlError::shape(format!(
                    "sample index {i} out of range for batch of {n}"
                )));
            }
            data.extend_from_slice(self.sample(i));
        }
        let mut shape = self.shape.clone();
        shape[0] = indices.len();
        Ok(Self { shape, data })
    }

    /// Contiguous range of samples `[start, end)`.
    pub fn slice_batch(&self, start: usize, end: usize) -> Self {
        let len = self.sample_len();
        let mut shape = self.shape.clone();
        shape[0] = end - start;
        Self {
            shape,
            data: self.data[start * len..end * len].to_vec(),
        }
    }

    pub fn reshape(self, shape: Vec<usize>) -> Result<Self, MlError> {
        Self::new(shape, self.data)
    }

    /// Arg-max over the last axis, one index per row.
    pub fn argmax_rows(&self) -> Vec<usize> {
        let width = self.shape.last().copied().unwrap_or(0);
        if width == 0 {
            return Vec::new();
        }
        self.data
            .chunks(width)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate() {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect()
    }

    /// Concatenate tensors along the batch axis. All sample shapes must match.
    pub fn concat(parts: &[Tensor]) -> Result<Self, MlError> {
        let first = parts
            .first()
            .ok_or_else(|| MlError::shape("cannot concatenate zero tensors"))?;
        let sample_shape = first.sample_shape().to_vec();
        let mut data = Vec::new();
        let mut n = 0;
        for part in parts {
            if part.sample_shape() != sample_shape.as_slice() {
                return Err(MlError::shape(format!(
                    "cannot concatenate sample shapes {:?} and {:?}",
                    sample_shape,
                    part.sample_shape()
                )));
            }
            n += part.batch_len();
            data.extend_from_slice(&part.data);
        }
        let mut shape = vec![n];
        shape.extend(sample_shape);
        Ok(Self { shape, data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_wrong_length() {
        assert!(Tensor::new(vec![2, 3], vec![0.0; 5]).is_err());
        assert!(Tensor::new(vec![2, 3], vec![0.0; 6]).is_ok());
    }

    #[test]
    fn test_select_and_argmax() {
        let t = Tensor::new(vec![3, 2], vec![0.1, 0.9, 0.8, 0.2, 0.4, 0.6]).unwrap();
        assert_eq!(t.argmax_rows(), vec![1, 0, 1]);
        let picked = t.select(&[2, 0]).unwrap();
        assert_eq!(picked.shape(), &[2, 2]);
        assert_eq!(picked.data(), &[0.4, 0.6, 0.1, 0.9]);
        assert!(t.select(&[3]).is_err());
    }

    #[test]
    fn test_concat_and_slice() {
        let a = Tensor::new(vec![1, 2], vec![1.0, 2.0]).unwrap();
        let b = Tensor::new(vec![2, 2], vec![3.0, 4.0, 5.0, 6.0]).unwrap();
        let c = Tensor::concat(&[a, b]).unwrap();
        assert_eq!(c.shape(), &[3, 2]);
        assert_eq!(c.slice_batch(1, 3).data(), &[3.0, 4.0, 5.0, 6.0]);
    }
}
