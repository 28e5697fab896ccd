//! Sequential model: an ordered stack of layers with compile settings,
//! prediction, summary rendering and on-disk persistence.

use crate::error::MlError;
use crate::nn::layers::{Layer, Param};
use crate::nn::loss::{Loss, Targets};
use crate::nn::optim::OptimizerConfig;
use crate::nn::tensor::Tensor;
use crate::persistence::{self, JsonStyle};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

/// Optimizer and loss attached by [`Sequential::compile`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompileConfig {
    pub optimizer: OptimizerConfig,
    pub loss: Loss,
}

/// A feed-forward stack of layers mapping a per-sample input shape to a
/// vector of class scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sequential {
    pub name: String,
    input_shape: Vec<usize>,
    layers: Vec<Layer>,
    compiled: Option<CompileConfig>,
}

/// On-disk envelope for a saved model.
#[derive(Debug, Serialize, Deserialize)]
struct SavedModel {
    format_version: u32,
    saved_at: DateTime<Utc>,
    checksum: String,
    model: Sequential,
}

impl Sequential {
    pub fn new(name: impl Into<String>, input_shape: Vec<usize>) -> Self {
        Self {
            name: name.into(),
            input_shape,
            layers: Vec::new(),
            compiled: None,
        }
    }

    /// Append a layer, checking that it accepts the current output shape.
    pub fn add(&mut self, layer: Layer) -> Result<(), MlError> {
        let current = self.output_shape()?;
        layer.output_shape(&current)?;
        self.layers.push(layer);
        Ok(())
    }

    pub fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    /// Per-sample output shape of the last layer.
    pub fn output_shape(&self) -> Result<Vec<usize>, MlError> {
        let mut shape = self.input_shape.clone();
        for layer in &self.layers {
            shape = layer.output_shape(&shape)?;
        }
        Ok(shape)
    }

    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn param_count(&self) -> usize {
        self.layers.iter().map(Layer::param_count).sum()
    }

    pub fn compile(&mut self, optimizer: OptimizerConfig, loss: Loss) {
        self.compiled = Some(CompileConfig { optimizer, loss });
    }

    pub fn compiled(&self) -> Option<&CompileConfig> {
        self.compiled.as_ref()
    }

    fn check_input(&self, images: &Tensor) -> Result<(), MlError> {
        if images.sample_shape() != self.input_shape.as_slice() {
            return Err(MlError::shape(format!(
                "model '{}' expects samples of shape {:?}, got {:?}",
                self.name,
                self.input_shape,
                images.sample_shape()
            )));
        }
        Ok(())
    }

    /// Inference over a whole batch. Does not touch the model's state.
    pub fn predict(&self, images: &Tensor) -> Result<Tensor, MlError> {
        self.check_input(images)?;
        let mut x = images.clone();
        for layer in &self.layers {
            x = layer.infer(&x)?;
        }
        Ok(x)
    }

    /// Inference in chunks of `batch_size` samples.
    pub fn predict_batched(&self, images: &Tensor, batch_size: usize) -> Result<Tensor, MlError> {
        self.check_input(images)?;
        let n = images.batch_len();
        let step = batch_size.max(1);
        let mut parts = Vec::with_capacity(n.div_ceil(step));
        for start in (0..n).step_by(step) {
            let end = (start + step).min(n);
            parts.push(self.predict(&images.slice_batch(start, end))?);
        }
        if parts.is_empty() {
            let mut shape = vec![0];
            shape.extend(self.output_shape()?);
            return Ok(Tensor::zeros(shape));
        }
        Tensor::concat(&parts)
    }

    /// Training-mode forward pass; caches activations for [`Self::backward`].
    pub fn forward_train(&mut self, images: &Tensor, rng: &mut StdRng) -> Result<Tensor, MlError> {
        self.check_input(images)?;
        let mut x = images.clone();
        for layer in &mut self.layers {
            x = layer.forward_train(&x, rng)?;
        }
        Ok(x)
    }

    /// Backpropagate `grad` (w.r.t. the model output) through every layer.
    pub fn backward(&mut self, grad: &Tensor) -> Result<(), MlError> {
        let mut g = grad.clone();
        for layer in self.layers.iter_mut().rev() {
            g = layer.backward(&g)?;
        }
        Ok(())
    }

    pub fn params_mut(&mut self) -> Vec<&mut Param> {
        self.layers
            .iter_mut()
            .flat_map(Layer::params_mut)
            .collect()
    }

    pub fn zero_grad(&mut self) {
        for param in self.params_mut() {
            param.zero_grad();
        }
    }

    /// Mean loss and accuracy over a labeled set, using the compiled loss.
    pub fn evaluate_loss(
        &self,
        images: &Tensor,
        targets: &Targets,
        batch_size: usize,
    ) -> Result<(f64, f64), MlError> {
        let loss = self
            .compiled
            .ok_or_else(|| MlError::model(format!("model '{}' is not compiled", self.name)))?
            .loss;
        let n = images.batch_len();
        if targets.len() != n {
            return Err(MlError::shape(format!(
                "{} targets for {n} images",
                targets.len()
            )));
        }
        if n == 0 {
            return Err(MlError::invalid_input("cannot evaluate on an empty set"));
        }
        let step = batch_size.max(1);
        let mut total_loss = 0.0f64;
        let mut correct = 0usize;
        for start in (0..n).step_by(step) {
            let end = (start + step).min(n);
            let batch_targets = targets.slice(start, end);
            let outputs = self.predict(&images.slice_batch(start, end))?;
            total_loss += loss.value(&outputs, &batch_targets)? as f64 * (end - start) as f64;
            correct += outputs
                .argmax_rows()
                .iter()
                .zip(batch_targets.class_indices())
                .filter(|(p, t)| **p == *t)
                .count();
        }
        Ok((total_loss / n as f64, correct as f64 / n as f64))
    }

    /// Text table of layers, output shapes and parameter counts.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Model: \"{}\"", self.name);
        let _ = writeln!(out, "{:<28}{:<24}{:>10}", "Layer (type)", "Output Shape", "Param #");
        let _ = writeln!(out, "{}", "=".repeat(62));
        let _ = writeln!(
            out,
            "{:<28}{:<24}{:>10}",
            "input (InputLayer)",
            format_shape(&self.input_shape),
            0
        );
        let mut shape = self.input_shape.clone();
        let mut counts: std::collections::HashMap<&str, usize> = std::collections::HashMap::new();
        for layer in &self.layers {
            shape = match layer.output_shape(&shape) {
                Ok(s) => s,
                Err(_) => break,
            };
            let kind = layer.kind();
            let seen = counts.entry(kind).or_insert(0);
            let name = if *seen == 0 {
                kind.to_ascii_lowercase()
            } else {
                format!("{}_{}", kind.to_ascii_lowercase(), seen)
            };
            *seen += 1;
            let _ = writeln!(
                out,
                "{:<28}{:<24}{:>10}",
                format!("{name} ({kind})"),
                format_shape(&shape),
                layer.param_count()
            );
        }
        let _ = writeln!(out, "{}", "=".repeat(62));
        let _ = writeln!(out, "Total params: {}", self.param_count());
        out
    }

    /// Write the model (weights, architecture and compile settings) to `path`.
    pub fn save(&self, path: &Path) -> Result<(), MlError> {
        let envelope = SavedModel {
            format_version: FORMAT_VERSION,
            saved_at: Utc::now(),
            checksum: self.checksum()?,
            model: self.clone(),
        };
        persistence::write_artifact(path, &envelope, JsonStyle::Compact)?;
        tracing::info!(
            model = %self.name,
            path = %path.display(),
            params = self.param_count(),
            "saved model"
        );
        Ok(())
    }

    /// Load a model written by [`Self::save`], verifying version and checksum.
    pub fn load(path: &Path) -> Result<Self, MlError> {
        let envelope: SavedModel = persistence::read_artifact(path)?;
        if envelope.format_version != FORMAT_VERSION {
            return Err(MlError::model(format!(
                "unsupported model format version {} in {}",
                envelope.format_version,
                path.display()
            )));
        }
        let model = envelope.model;
        if model.checksum()? != envelope.checksum {
            return Err(MlError::model(format!(
                "checksum mismatch in {}: file is corrupted",
                path.display()
            )));
        }
        model.output_shape()?;
        tracing::info!(
            model = %model.name,
            path = %path.display(),
            saved_at = %envelope.saved_at,
            "loaded model"
        );
        Ok(model)
    }

    fn checksum(&self) -> Result<String, MlError> {
        let bytes = serde_json::to_vec(self)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)))
    }
}

fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("(None, {})", dims.join(", "))
}
