//! Hyperparameter sweeps: one freshly built model per candidate, trials run
//! in order, results aligned with candidates.

use crate::algorithms::evaluation::{CrossValidation, CrossValidationResult, evaluate};
use crate::algorithms::neural::{Architecture, OutputKind, build_model};
use crate::data::split::{k_fold_indices, train_validation_split};
use crate::data::{LabeledImages, Samples, prepare_samples};
use crate::error::MlError;
use crate::nn::{Activation, OptimizerConfig};
use crate::persistence::{self, JsonStyle};
use crate::training::metrics::TrainingHistory;
use crate::training::reproducibility::EnvironmentSnapshot;
use crate::training::runner::Trainer;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Write as _};
use std::path::{Path, PathBuf};

/// Whether a lower or higher trial score is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    Minimize,
    Maximize,
}

/// An ordered list of candidate values for one hyperparameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperparamSweep<C> {
    pub id: String,
    pub experiment_name: String,
    pub objective: Objective,
    pub candidates: Vec<C>,
}

/// What a single trial produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialOutcome<R> {
    /// Value ranked by the sweep's objective.
    pub score: f64,
    pub detail: R,
}

/// A completed sweep trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepTrial<C, R> {
    pub trial_number: usize,
    pub candidate: C,
    pub score: f64,
    pub detail: R,
}

/// All trials of a sweep, `trials[i]` belonging to `candidates[i]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepReport<C, R> {
    pub id: String,
    pub experiment_name: String,
    pub objective: Objective,
    pub trials: Vec<SweepTrial<C, R>>,
    pub best_trial: Option<usize>,
    pub environment: EnvironmentSnapshot,
}

impl<C: Clone> HyperparamSweep<C> {
    pub fn new(experiment_name: &str, objective: Objective, candidates: Vec<C>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            experiment_name: experiment_name.to_string(),
            objective,
            candidates,
        }
    }

    /// Run `trial` for every candidate, strictly in order. The first failing
    /// trial aborts the sweep.
    pub fn run<R, F>(&self, mut trial: F) -> Result<SweepReport<C, R>, MlError>
    where
        F: FnMut(usize, &C) -> Result<TrialOutcome<R>, MlError>,
    {
        let mut trials = Vec::with_capacity(self.candidates.len());
        for (index, candidate) in self.candidates.iter().enumerate() {
            tracing::info!(
                sweep = %self.experiment_name,
                trial = index + 1,
                of = self.candidates.len(),
                "starting trial"
            );
            let outcome = trial(index, candidate)?;
            tracing::info!(
                sweep = %self.experiment_name,
                trial = index + 1,
                score = outcome.score,
                "trial finished"
            );
            trials.push(SweepTrial {
                trial_number: index,
                candidate: candidate.clone(),
                score: outcome.score,
                detail: outcome.detail,
            });
        }
        let best_trial = best_index(&trials, self.objective);
        Ok(SweepReport {
            id: self.id.clone(),
            experiment_name: self.experiment_name.clone(),
            objective: self.objective,
            trials,
            best_trial,
            environment: EnvironmentSnapshot::capture(),
        })
    }
}

fn best_index<C, R>(trials: &[SweepTrial<C, R>], objective: Objective) -> Option<usize> {
    trials
        .iter()
        .filter(|t| t.score.is_finite())
        .min_by(|a, b| {
            let ord = a.score.total_cmp(&b.score);
            match objective {
                Objective::Minimize => ord,
                Objective::Maximize => ord.reverse(),
            }
        })
        .map(|t| t.trial_number)
}

impl<C, R> SweepReport<C, R> {
    pub fn best(&self) -> Option<&SweepTrial<C, R>> {
        self.best_trial.and_then(|i| self.trials.get(i))
    }

    pub fn scores(&self) -> Vec<f64> {
        self.trials.iter().map(|t| t.score).collect()
    }
}

impl<C: Display, R> SweepReport<C, R> {
    /// Console table of candidates and scores, best trial marked.
    pub fn render(&self, score_name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "sweep '{}' ({})", self.experiment_name, self.id);
        let _ = writeln!(out, "{:<6}{:<24}{:>12}", "trial", "candidate", score_name);
        for t in &self.trials {
            let marker = if Some(t.trial_number) == self.best_trial { " *" } else { "" };
            let _ = writeln!(
                out,
                "{:<6}{:<24}{:>12.4}{marker}",
                t.trial_number,
                t.candidate.to_string(),
                t.score
            );
        }
        if let Some(best) = self.best() {
            let _ = writeln!(out, "best: {} ({score_name} {:.4})", best.candidate, best.score);
        }
        out
    }
}

impl<C: Serialize, R: Serialize> SweepReport<C, R> {
    /// Write the report as `sweep_<experiment>.json` under `dir`.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, MlError> {
        let path = persistence::artifact_path(dir, &format!("sweep_{}", self.experiment_name));
        persistence::write_artifact(&path, self, JsonStyle::Pretty)?;
        Ok(path)
    }
}

/// Settings shared by every trial of a sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSettings {
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_fraction: f64,
    /// Seeds the split, weight init and shuffling of every trial alike.
    pub seed: u64,
    pub num_classes: usize,
}

impl TrialSettings {
    fn trainer(&self) -> Trainer {
        Trainer::new(self.epochs, self.batch_size, self.seed)
    }
}

/// Final validation metrics and full history of a trained trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitOutcome {
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub history: TrainingHistory,
}

/// Dropout rate candidate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DropoutRate(pub f32);

impl Display for DropoutRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn split_for(
    architecture: &Architecture,
    data: &LabeledImages,
    settings: &TrialSettings,
) -> Result<(Samples, Samples), MlError> {
    let samples = prepare_samples(data, architecture.label_encoding(), settings.num_classes)?;
    let split = train_validation_split(&samples, settings.validation_fraction, settings.seed)?;
    Ok((split.train, split.validation))
}

fn fit_trial(
    architecture: &Architecture,
    optimizer: OptimizerConfig,
    train: &Samples,
    validation: &Samples,
    settings: &TrialSettings,
) -> Result<FitOutcome, MlError> {
    let mut model = build_model(architecture, optimizer, settings.num_classes, settings.seed)?;
    let history = settings.trainer().fit(&mut model, train, Some(validation))?;
    let val_loss = history
        .last("val_loss")
        .ok_or_else(|| MlError::training("trial recorded no validation loss"))?;
    let val_accuracy = history.last("val_accuracy").unwrap_or(0.0);
    Ok(FitOutcome {
        val_loss,
        val_accuracy,
        history,
    })
}

/// Train the dropout architecture once per rate; ranked by final validation loss.
pub fn dropout_sweep(
    data: &LabeledImages,
    rates: &[f32],
    settings: &TrialSettings,
) -> Result<SweepReport<DropoutRate, FitOutcome>, MlError> {
    let template = Architecture::Dropout { rate: 0.5 };
    let (train, validation) = split_for(&template, data, settings)?;
    let sweep = HyperparamSweep::new(
        "dropout",
        Objective::Minimize,
        rates.iter().copied().map(DropoutRate).collect(),
    );
    sweep.run(|_, rate| {
        let architecture = Architecture::Dropout { rate: rate.0 };
        let outcome = fit_trial(&architecture, OptimizerConfig::adam(), &train, &validation, settings)?;
        Ok(TrialOutcome {
            score: outcome.val_loss,
            detail: outcome,
        })
    })
}

/// Train the simple architecture once per hidden activation; ranked by
/// final validation loss. Each trial keeps its full history.
pub fn activation_sweep(
    data: &LabeledImages,
    activations: &[Activation],
    settings: &TrialSettings,
) -> Result<SweepReport<Activation, FitOutcome>, MlError> {
    let simple = |activation| Architecture::Simple {
        activation,
        output: OutputKind::Logits,
    };
    let (train, validation) = split_for(&simple(Activation::Relu), data, settings)?;
    let sweep = HyperparamSweep::new("activation", Objective::Minimize, activations.to_vec());
    sweep.run(|_, &activation| {
        let outcome = fit_trial(
            &simple(activation),
            OptimizerConfig::adam(),
            &train,
            &validation,
            settings,
        )?;
        Ok(TrialOutcome {
            score: outcome.val_loss,
            detail: outcome,
        })
    })
}

/// Score `architecture` with `optimizer` by k-fold cross-validation accuracy.
/// Every fold trains a freshly built model.
pub fn cross_validate(
    architecture: &Architecture,
    optimizer: OptimizerConfig,
    samples: &Samples,
    settings: &TrialSettings,
    cv: &CrossValidation,
) -> Result<CrossValidationResult, MlError> {
    let labels = samples.targets.class_indices();
    let folds = k_fold_indices(
        samples.len(),
        cv.n_folds,
        cv.shuffle_seed(),
        cv.stratified.then_some(labels.as_slice()),
    )?;
    let mut scores = Vec::with_capacity(folds.len());
    for (i, fold) in folds.iter().enumerate() {
        let train = samples.select(&fold.train)?;
        let test = samples.select(&fold.test)?;
        let mut model = build_model(architecture, optimizer, settings.num_classes, settings.seed)?;
        settings.trainer().fit(&mut model, &train, None)?;
        let report = evaluate(&model, &test, settings.batch_size)?;
        tracing::debug!(fold = i + 1, accuracy = report.accuracy, "fold scored");
        scores.push(report.accuracy);
    }
    Ok(CrossValidationResult::from_scores(scores, "accuracy"))
}

/// Grid search over optimizers on the simple architecture; ranked by mean
/// cross-validation accuracy.
pub fn optimizer_sweep(
    data: &LabeledImages,
    optimizers: &[OptimizerConfig],
    settings: &TrialSettings,
    cv: &CrossValidation,
) -> Result<SweepReport<OptimizerConfig, CrossValidationResult>, MlError> {
    let architecture = Architecture::Simple {
        activation: Activation::Relu,
        output: OutputKind::Logits,
    };
    let samples = prepare_samples(data, architecture.label_encoding(), settings.num_classes)?;
    let sweep = HyperparamSweep::new("optimizer", Objective::Maximize, optimizers.to_vec());
    sweep.run(|_, &optimizer| {
        let result = cross_validate(&architecture, optimizer, &samples, settings, cv)?;
        Ok(TrialOutcome {
            score: result.mean_score,
            detail: result,
        })
    })
}
