//! Training infrastructure: the trainer, histories, callbacks, seeds and sweeps.

pub mod callbacks;
pub mod metrics;
pub mod reproducibility;
pub mod runner;
pub mod sweep;

pub use callbacks::{AnomalyDetection, CallbackAction, EarlyStopping, TrainingCallback};
pub use metrics::{EpochMetrics, TrainingHistory};
pub use reproducibility::{EnvironmentSnapshot, SeedManager};
pub use runner::Trainer;
pub use sweep::{
    DropoutRate, FitOutcome, HyperparamSweep, Objective, SweepReport, SweepTrial, TrialOutcome,
    TrialSettings, activation_sweep, cross_validate, dropout_sweep, optimizer_sweep,
};
