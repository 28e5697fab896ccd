//! Mini-batch training loop.

use crate::data::Samples;
use crate::error::MlError;
use crate::nn::{Optimizer, Sequential};
use crate::training::callbacks::{AnomalyDetection, CallbackAction, EarlyStopping, TrainingCallback};
use crate::training::metrics::{EpochMetrics, TrainingHistory};
use crate::training::reproducibility::SeedManager;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Fits compiled models on labeled samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trainer {
    pub epochs: usize,
    pub batch_size: usize,
    /// Reshuffle the training set before every epoch.
    pub shuffle: bool,
    pub seed: u64,
    /// Stop once validation loss stops improving.
    #[serde(default)]
    pub early_stopping: Option<EarlyStopping>,
    /// Abort when the epoch loss exceeds this multiple of its recent mean.
    pub anomaly_threshold: f64,
}

impl Default for Trainer {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            shuffle: true,
            seed: 42,
            early_stopping: None,
            anomaly_threshold: 3.0,
        }
    }
}

impl Trainer {
    pub fn new(epochs: usize, batch_size: usize, seed: u64) -> Self {
        Self {
            epochs,
            batch_size,
            seed,
            ..Self::default()
        }
    }

    /// Train `model` in place and return the per-epoch history.
    ///
    /// Optimizer state starts fresh on every call. Dropout is active for the
    /// training batches and disabled when scoring `validation`.
    pub fn fit(
        &self,
        model: &mut Sequential,
        train: &Samples,
        validation: Option<&Samples>,
    ) -> Result<TrainingHistory, MlError> {
        let compiled = *model
            .compiled()
            .ok_or_else(|| MlError::model(format!("model '{}' is not compiled", model.name)))?;
        if train.is_empty() {
            return Err(MlError::invalid_input("training set is empty"));
        }
        if self.batch_size == 0 || self.epochs == 0 {
            return Err(MlError::config("epochs and batch_size must be positive"));
        }

        let mut seeds = SeedManager::new(self.seed);
        let mut shuffle_rng = StdRng::seed_from_u64(seeds.get_seed("shuffle"));
        let mut dropout_rng = StdRng::seed_from_u64(seeds.get_seed("dropout"));
        let mut optimizer = Optimizer::new(compiled.optimizer);
        let mut anomaly = AnomalyDetection::new(self.anomaly_threshold, 5);
        let mut early_stopping = self.early_stopping.clone();
        let mut history = TrainingHistory::default();
        let started = Instant::now();
        let n = train.len();

        tracing::info!(
            model = %model.name,
            samples = n,
            validation = validation.map_or(0, Samples::len),
            epochs = self.epochs,
            batch_size = self.batch_size,
            optimizer = %compiled.optimizer,
            "starting training"
        );

        for epoch in 1..=self.epochs {
            let mut order: Vec<usize> = (0..n).collect();
            if self.shuffle {
                order.shuffle(&mut shuffle_rng);
            }

            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;
            for (batch, indices) in order.chunks(self.batch_size).enumerate() {
                let batch_samples = train.select(indices)?;
                model.zero_grad();
                let outputs = model.forward_train(&batch_samples.images, &mut dropout_rng)?;
                let (loss, grad) = compiled.loss.value_and_grad(&outputs, &batch_samples.targets)?;
                if !loss.is_finite() {
                    return Err(MlError::training(format!(
                        "non-finite loss {loss} in epoch {epoch}, batch {batch}"
                    )));
                }
                model.backward(&grad)?;
                optimizer.step(model.params_mut())?;

                loss_sum += loss as f64 * indices.len() as f64;
                correct += outputs
                    .argmax_rows()
                    .iter()
                    .zip(batch_samples.targets.class_indices())
                    .filter(|(p, t)| **p == *t)
                    .count();
                tracing::debug!(epoch, batch, loss, "batch complete");
            }

            let (val_loss, val_accuracy) = match validation {
                Some(v) => {
                    let (l, a) = model.evaluate_loss(&v.images, &v.targets, self.batch_size)?;
                    (Some(l), Some(a))
                }
                None => (None, None),
            };
            let metrics = EpochMetrics {
                loss: loss_sum / n as f64,
                accuracy: correct as f64 / n as f64,
                val_loss,
                val_accuracy,
            };
            history.record_epoch(metrics);
            tracing::info!(
                epoch,
                epochs = self.epochs,
                loss = metrics.loss,
                accuracy = metrics.accuracy,
                val_loss = ?metrics.val_loss,
                val_accuracy = ?metrics.val_accuracy,
                "epoch complete"
            );

            let mut stop = false;
            let callbacks: [Option<&mut dyn TrainingCallback>; 2] = [
                Some(&mut anomaly),
                early_stopping.as_mut().map(|c| c as &mut dyn TrainingCallback),
            ];
            for callback in callbacks.into_iter().flatten() {
                match callback.on_epoch_end(epoch, &history) {
                    CallbackAction::Continue => {}
                    CallbackAction::Stop => stop = true,
                    CallbackAction::Abort(reason) => {
                        return Err(MlError::training(format!("epoch {epoch}: {reason}")));
                    }
                }
            }
            if stop {
                break;
            }
        }

        history.total_training_time_secs = started.elapsed().as_secs_f64();
        tracing::info!(
            model = %model.name,
            epochs = history.epochs_completed,
            best_epoch = ?history.best_epoch,
            secs = history.total_training_time_secs,
            "training finished"
        );
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Activation, Dense, Flatten, Layer, Loss, OptimizerConfig, Targets, Tensor};

    /// Two linearly separable classes of 2x2x1 "images".
    fn toy_samples() -> Samples {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let class = i % 2;
            let v = if class == 0 { 0.1 } else { 0.9 };
            data.extend([v, v, v, v]);
            labels.push(class);
        }
        Samples::new(
            Tensor::new(vec![40, 2, 2, 1], data).unwrap(),
            Targets::Sparse(labels),
        )
        .unwrap()
    }

    fn toy_model() -> Sequential {
        let mut rng = StdRng::seed_from_u64(3);
        let mut model = Sequential::new("toy", vec![2, 2, 1]);
        model.add(Layer::Flatten(Flatten::new())).unwrap();
        model
            .add(Layer::Dense(Dense::new(4, 2, Activation::Linear, &mut rng)))
            .unwrap();
        model.compile(
            OptimizerConfig::Adam {
                lr: 0.05,
                beta1: 0.9,
                beta2: 0.999,
            },
            Loss::SparseCategoricalCrossentropy { from_logits: true },
        );
        model
    }

    #[test]
    fn test_fit_reduces_loss() {
        let samples = toy_samples();
        let mut model = toy_model();
        let history = Trainer::new(30, 8, 1)
            .fit(&mut model, &samples, Some(&samples))
            .unwrap();
        assert_eq!(history.epochs_completed, 30);
        assert_eq!(history.val_loss.len(), 30);
        assert!(history.loss[29] < history.loss[0]);
        assert_eq!(history.last("val_accuracy"), Some(1.0));
    }

    #[test]
    fn test_fit_requires_compiled_model() {
        let mut model = Sequential::new("raw", vec![2, 2, 1]);
        model.add(Layer::Flatten(Flatten::new())).unwrap();
        let err = Trainer::default()
            .fit(&mut model, &toy_samples(), None)
            .unwrap_err();
        assert!(matches!(err, MlError::Model(_)));
    }

    #[test]
    fn test_mismatched_targets_fail() {
        let samples = toy_samples();
        let mut model = toy_model();
        model.compile(
            OptimizerConfig::adam(),
            Loss::CategoricalCrossentropy { from_logits: true },
        );
        let err = Trainer::new(1, 8, 1).fit(&mut model, &samples, None).unwrap_err();
        assert!(matches!(err, MlError::Config(_)));
    }

    #[test]
    fn test_same_seed_same_history() {
        let samples = toy_samples();
        let trainer = Trainer::new(3, 8, 11);
        let a = trainer.fit(&mut toy_model(), &samples, Some(&samples)).unwrap();
        let b = trainer.fit(&mut toy_model(), &samples, Some(&samples)).unwrap();
        assert_eq!(a.loss, b.loss);
        assert_eq!(a.val_accuracy, b.val_accuracy);
    }

    #[test]
    fn test_early_stopping_ends_training() {
        let samples = toy_samples();
        let mut model = toy_model();
        let trainer = Trainer {
            early_stopping: Some(EarlyStopping::new(1, 10.0)),
            ..Trainer::new(10, 8, 1)
        };
        let history = trainer.fit(&mut model, &samples, Some(&samples)).unwrap();
        assert_eq!(history.epochs_completed, 2);
    }
}
