//! Configuration for data loading, training, sweeps and outputs.
//!
//! Values are layered with figment: built-in defaults, the user config file,
//! the workspace `cifarnet.toml`, an explicit file, then `CIFARNET_*`
//! environment variables (`__` separates nesting, e.g.
//! `CIFARNET_TRAINING__EPOCHS=3`).

use crate::algorithms::evaluation::CrossValidation;
use crate::algorithms::neural::Architecture;
use crate::data::{CifarLoader, NUM_CLASSES};
use crate::nn::{Activation, OptimizerConfig};
use crate::training::{EarlyStopping, Trainer, TrialSettings};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const WORKSPACE_CONFIG_FILE: &str = "cifarnet.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CifarnetConfig {
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Dataset location and preparation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory holding the CIFAR-10 `.bin` batch files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub max_train_samples: Option<usize>,
    #[serde(default)]
    pub max_test_samples: Option<usize>,
    /// Fraction of the training images held out for validation.
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    #[serde(default = "default_seed")]
    pub split_seed: u64,
    /// Photograph classified by `cifarnet predict`.
    #[serde(default)]
    pub custom_image: Option<PathBuf>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_train_samples: None,
            max_test_samples: None,
            validation_fraction: default_validation_fraction(),
            split_seed: default_seed(),
            custom_image: None,
        }
    }
}

impl DataConfig {
    pub fn loader(&self) -> CifarLoader {
        CifarLoader::new(&self.data_dir).with_limits(self.max_train_samples, self.max_test_samples)
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/cifar-10-batches-bin")
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    42
}

/// Settings for a single training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub architecture: Architecture,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Seeds weight initialization, shuffling and dropout masks.
    #[serde(default = "default_seed")]
    pub seed: u64,
    #[serde(default = "default_true")]
    pub shuffle: bool,
    /// Enables early stopping on validation loss when set.
    #[serde(default)]
    pub early_stopping_patience: Option<usize>,
    #[serde(default)]
    pub early_stopping_min_delta: f64,
    #[serde(default = "default_anomaly_threshold")]
    pub anomaly_threshold: f64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: Architecture::default(),
            optimizer: OptimizerConfig::default(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            seed: default_seed(),
            shuffle: true,
            early_stopping_patience: None,
            early_stopping_min_delta: 0.0,
            anomaly_threshold: default_anomaly_threshold(),
        }
    }
}

impl TrainingConfig {
    pub fn trainer(&self) -> Trainer {
        Trainer {
            epochs: self.epochs,
            batch_size: self.batch_size,
            shuffle: self.shuffle,
            seed: self.seed,
            early_stopping: self
                .early_stopping_patience
                .map(|patience| EarlyStopping::new(patience, self.early_stopping_min_delta)),
            anomaly_threshold: self.anomaly_threshold,
        }
    }
}

fn default_epochs() -> usize {
    10
}

fn default_batch_size() -> usize {
    32
}

fn default_true() -> bool {
    true
}

fn default_anomaly_threshold() -> f64 {
    3.0
}

/// Candidate lists and budgets for the three sweeps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    #[serde(default = "default_dropout_rates")]
    pub dropout_rates: Vec<f32>,
    #[serde(default = "default_dropout_epochs")]
    pub dropout_epochs: usize,
    #[serde(default = "default_activations")]
    pub activations: Vec<Activation>,
    #[serde(default = "default_epochs")]
    pub activation_epochs: usize,
    #[serde(default = "default_optimizers")]
    pub optimizers: Vec<OptimizerConfig>,
    #[serde(default = "default_optimizer_epochs")]
    pub optimizer_epochs: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cv_folds")]
    pub cv_folds: usize,
    #[serde(default = "default_true")]
    pub cv_stratified: bool,
    /// Base seed shared by every trial.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            dropout_rates: default_dropout_rates(),
            dropout_epochs: default_dropout_epochs(),
            activations: default_activations(),
            activation_epochs: default_epochs(),
            optimizers: default_optimizers(),
            optimizer_epochs: default_optimizer_epochs(),
            batch_size: default_batch_size(),
            cv_folds: default_cv_folds(),
            cv_stratified: true,
            seed: default_seed(),
        }
    }
}

impl SweepConfig {
    pub fn trial_settings(&self, epochs: usize, data: &DataConfig) -> TrialSettings {
        TrialSettings {
            epochs,
            batch_size: self.batch_size,
            validation_fraction: data.validation_fraction,
            seed: self.seed,
            num_classes: NUM_CLASSES,
        }
    }

    pub fn cross_validation(&self) -> CrossValidation {
        CrossValidation {
            n_folds: self.cv_folds,
            stratified: self.cv_stratified,
            shuffle: true,
            random_state: Some(self.seed),
        }
    }
}

fn default_dropout_rates() -> Vec<f32> {
    vec![0.15, 0.3, 0.45, 0.6, 0.75]
}

fn default_dropout_epochs() -> usize {
    20
}

fn default_activations() -> Vec<Activation> {
    vec![
        Activation::Relu,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Selu,
        Activation::LeakyRelu,
    ]
}

fn default_optimizers() -> Vec<OptimizerConfig> {
    vec![
        OptimizerConfig::sgd(),
        OptimizerConfig::rmsprop(),
        OptimizerConfig::adam(),
    ]
}

fn default_optimizer_epochs() -> usize {
    2
}

fn default_cv_folds() -> usize {
    3
}

/// Where models, histories and reports are written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub save_model: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            save_model: true,
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("fit_outputs")
}

/// Path of the user-level config file, if a home directory is known.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "cifarnet", "cifarnet")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Build the layered figment without extracting it.
pub fn config_figment(workspace: Option<&Path>, explicit: Option<&Path>) -> Figment {
    let mut figment = Figment::from(Serialized::defaults(CifarnetConfig::default()));

    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    if let Some(path) = explicit {
        figment = figment.merge(Toml::file(path));
    }

    figment.merge(Env::prefixed("CIFARNET_").split("__"))
}

/// Load the merged configuration. An explicit file must exist.
pub fn load_config(
    workspace: Option<&Path>,
    explicit: Option<&Path>,
) -> Result<CifarnetConfig, Box<figment::Error>> {
    if let Some(path) = explicit {
        if !path.exists() {
            return Err(Box::new(figment::Error::from(format!(
                "config file {} does not exist",
                path.display()
            ))));
        }
    }
    config_figment(workspace, explicit).extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = CifarnetConfig::default();
        assert_eq!(config.training.architecture, Architecture::Intro);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.sweep.dropout_rates.len(), 5);
        assert_eq!(config.sweep.activation_epochs, 10);
        assert_eq!(config.sweep.optimizer_epochs, 2);
        assert_eq!(config.sweep.cv_folds, 3);
        assert_eq!(config.data.validation_fraction, 0.2);
        assert_eq!(config.output.dir, PathBuf::from("fit_outputs"));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = CifarnetConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let deserialized: CifarnetConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(deserialized, config);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: CifarnetConfig = toml::from_str(
            r#"
            [training]
            epochs = 3
            architecture = { name = "dropout", rate = 0.3 }
            "#,
        )
        .unwrap();
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.architecture, Architecture::Dropout { rate: 0.3 });
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.sweep, SweepConfig::default());
    }

    #[test]
    fn test_load_config_workspace_and_explicit_layers() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(WORKSPACE_CONFIG_FILE),
            "[training]\nepochs = 4\nbatch_size = 16\n",
        )
        .unwrap();
        let explicit = dir.path().join("run.toml");
        std::fs::write(&explicit, "[training]\nepochs = 7\n").unwrap();

        let config = load_config(Some(dir.path()), Some(&explicit)).unwrap();
        assert_eq!(config.training.epochs, 7);
        assert_eq!(config.training.batch_size, 16);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_config(None, Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_trainer_from_config() {
        let training = TrainingConfig {
            early_stopping_patience: Some(2),
            ..TrainingConfig::default()
        };
        let trainer = training.trainer();
        assert_eq!(trainer.epochs, 10);
        assert_eq!(trainer.early_stopping.map(|e| e.patience), Some(2));
    }
}
