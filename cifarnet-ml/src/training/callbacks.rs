//! Training callbacks: early stopping and anomaly detection.

use crate::training::metrics::TrainingHistory;
use serde::{Deserialize, Serialize};

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    /// End training normally after this epoch.
    Stop,
    /// End training with an error.
    Abort(String),
}

/// Trait for training callbacks.
pub trait TrainingCallback {
    /// Called at the end of each epoch (1-based) with the history so far.
    fn on_epoch_end(&mut self, epoch: usize, history: &TrainingHistory) -> CallbackAction;
}

/// Stops training once the monitored loss stops improving.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStopping {
    pub patience: usize,
    pub min_delta: f64,
    #[serde(skip)]
    counter: usize,
    #[serde(skip)]
    best_loss: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best_loss: None,
        }
    }

    pub fn observe(&mut self, loss: f64) -> CallbackAction {
        match self.best_loss {
            Some(best) if loss >= best - self.min_delta => {
                self.counter += 1;
                if self.counter >= self.patience {
                    CallbackAction::Stop
                } else {
                    CallbackAction::Continue
                }
            }
            _ => {
                self.best_loss = Some(loss);
                self.counter = 0;
                CallbackAction::Continue
            }
        }
    }
}

impl TrainingCallback for EarlyStopping {
    /// Monitors validation loss, or training loss when there is no validation set.
    fn on_epoch_end(&mut self, epoch: usize, history: &TrainingHistory) -> CallbackAction {
        let loss = history
            .val_loss
            .last()
            .or(history.loss.last())
            .copied()
            .unwrap_or(f64::MAX);
        let action = self.observe(loss);
        if action == CallbackAction::Stop {
            tracing::info!(epoch, patience = self.patience, "early stopping");
        }
        action
    }
}

/// Aborts training on a non-finite loss or a spike above `threshold` times
/// the recent mean.
#[derive(Debug, Clone)]
pub struct AnomalyDetection {
    pub threshold: f64,
    window: Vec<f64>,
    window_size: usize,
}

impl AnomalyDetection {
    pub fn new(threshold: f64, window_size: usize) -> Self {
        Self {
            threshold,
            window: Vec::new(),
            window_size,
        }
    }

    pub fn observe(&mut self, loss: f64) -> CallbackAction {
        if !loss.is_finite() {
            return CallbackAction::Abort(format!("loss became {loss}"));
        }

        self.window.push(loss);
        if self.window.len() > self.window_size {
            self.window.remove(0);
        }

        if self.window.len() >= 3 {
            let mean = self.window.iter().sum::<f64>() / self.window.len() as f64;
            if loss > mean * self.threshold {
                return CallbackAction::Abort(format!(
                    "loss spiked to {loss:.4} (window mean {mean:.4})"
                ));
            }
        }

        CallbackAction::Continue
    }
}

impl Default for AnomalyDetection {
    fn default() -> Self {
        Self::new(3.0, 5)
    }
}

impl TrainingCallback for AnomalyDetection {
    fn on_epoch_end(&mut self, _epoch: usize, history: &TrainingHistory) -> CallbackAction {
        let loss = history.loss.last().copied().unwrap_or(0.0);
        self.observe(loss)
    }
}
