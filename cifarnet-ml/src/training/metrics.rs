//! Per-epoch training history.

use serde::{Deserialize, Serialize};

/// Metric series recorded by [`Trainer::fit`](crate::training::Trainer::fit).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs_completed: usize,
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    /// 1-based epoch with the lowest validation loss (training loss when no
    /// validation set was given).
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
    pub total_training_time_secs: f64,
}

/// Metrics observed in one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
}

impl TrainingHistory {
    pub fn record_epoch(&mut self, epoch: EpochMetrics) {
        self.loss.push(epoch.loss);
        self.accuracy.push(epoch.accuracy);
        if let Some(vl) = epoch.val_loss {
            self.val_loss.push(vl);
        }
        if let Some(va) = epoch.val_accuracy {
            self.val_accuracy.push(va);
        }
        self.epochs_completed += 1;

        let check_loss = epoch.val_loss.unwrap_or(epoch.loss);
        if self.best_loss.is_none_or(|best| check_loss < best) {
            self.best_loss = Some(check_loss);
            self.best_epoch = Some(self.epochs_completed);
        }
    }

    /// Series by name: `loss`, `accuracy`, `val_loss` or `val_accuracy`.
    pub fn metric(&self, name: &str) -> Option<&[f64]> {
        match name {
            "loss" => Some(&self.loss),
            "accuracy" | "acc" => Some(&self.accuracy),
            "val_loss" => Some(&self.val_loss),
            "val_accuracy" | "val_acc" => Some(&self.val_accuracy),
            _ => None,
        }
    }

    /// Last value of a named series.
    pub fn last(&self, name: &str) -> Option<f64> {
        self.metric(name).and_then(|s| s.last().copied())
    }
}
