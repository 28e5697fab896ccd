//! Element-wise and row-wise activation functions with their derivatives.

use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;
const LEAKY_RELU_ALPHA: f32 = 0.3;

/// Activation applied to a layer's pre-activation output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Sigmoid,
    Tanh,
    Selu,
    LeakyRelu,
    /// Normalizes each row (last axis) into a probability vector.
    Softmax,
}

impl Activation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Selu => "selu",
            Self::LeakyRelu => "leaky_relu",
            Self::Softmax => "softmax",
        }
    }

    /// Apply the activation. `width` is the length of the last axis, used by
    /// softmax to find row boundaries.
    pub fn apply(&self, z: &[f32], out: &mut [f32], width: usize) {
        match self {
            Self::Softmax => {
                for (zr, or) in z.chunks(width).zip(out.chunks_mut(width)) {
                    softmax_row(zr, or);
                }
            }
            _ => {
                for (o, &x) in out.iter_mut().zip(z) {
                    *o = self.scalar(x);
                }
            }
        }
    }

    fn scalar(&self, x: f32) -> f32 {
        match self {
            Self::Linear | Self::Softmax => x,
            Self::Relu => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Self::Tanh => x.tanh(),
            Self::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * (x.exp() - 1.0)
                }
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_RELU_ALPHA * x
                }
            }
        }
    }

    /// Chain rule through the activation: turns `grad_a` (w.r.t. outputs)
    /// into `grad_z` (w.r.t. pre-activations).
    pub fn backward(&self, z: &[f32], a: &[f32], grad_a: &[f32], grad_z: &mut [f32], width: usize) {
        match self {
            Self::Softmax => {
                for ((ar, gr), dr) in a
                    .chunks(width)
                    .zip(grad_a.chunks(width))
                    .zip(grad_z.chunks_mut(width))
                {
                    let dot: f32 = ar.iter().zip(gr).map(|(y, g)| y * g).sum();
                    for ((d, &y), &g) in dr.iter_mut().zip(ar).zip(gr) {
                        *d = y * (g - dot);
                    }
                }
            }
            _ => {
                for i in 0..grad_z.len() {
                    grad_z[i] = grad_a[i] * self.derivative(z[i], a[i]);
                }
            }
        }
    }

    fn derivative(&self, z: f32, a: f32) -> f32 {
        match self {
            Self::Linear | Self::Softmax => 1.0,
            Self::Relu => {
                if z > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => a * (1.0 - a),
            Self::Tanh => 1.0 - a * a,
            Self::Selu => {
                if z > 0.0 {
                    SELU_SCALE
                } else {
                    a + SELU_SCALE * SELU_ALPHA
                }
            }
            Self::LeakyRelu => {
                if z > 0.0 {
                    1.0
                } else {
                    LEAKY_RELU_ALPHA
                }
            }
        }
    }
}

fn softmax_row(z: &[f32], out: &mut [f32]) {
    let max = z.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0;
    for (o, &x) in out.iter_mut().zip(z) {
        *o = (x - max).exp();
        sum += *o;
    }
    for o in out.iter_mut() {
        *o /= sum;
    }
}

/// Softmax over the last axis, returning a fresh buffer.
pub fn softmax(z: &[f32], width: usize) -> Vec<f32> {
    let mut out = vec![0.0; z.len()];
    Activation::Softmax.apply(z, &mut out, width);
    out
}

impl fmt::Display for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Activation {
    type Err = MlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "linear" | "none" => Ok(Self::Linear),
            "relu" => Ok(Self::Relu),
            "sigmoid" => Ok(Self::Sigmoid),
            "tanh" => Ok(Self::Tanh),
            "selu" => Ok(Self::Selu),
            "leaky_relu" | "leakyrelu" => Ok(Self::LeakyRelu),
            "softmax" => Ok(Self::Softmax),
            other => Err(MlError::config(format!(
                "unknown activation function '{other}'"
            ))),
        }
    }
}
