//! Gradient-descent optimizers.

use crate::error::MlError;
use crate::nn::layers::Param;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const EPSILON: f32 = 1e-7;

/// Optimizer choice and hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Sgd { lr: f32, momentum: f32 },
    RmsProp { lr: f32, rho: f32 },
    Adam { lr: f32, beta1: f32, beta2: f32 },
}

impl OptimizerConfig {
    pub fn sgd() -> Self {
        Self::Sgd {
            lr: 0.01,
            momentum: 0.0,
        }
    }

    pub fn rmsprop() -> Self {
        Self::RmsProp { lr: 0.001, rho: 0.9 }
    }

    pub fn adam() -> Self {
        Self::Adam {
            lr: 0.001,
            beta1: 0.9,
            beta2: 0.999,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sgd { .. } => "sgd",
            Self::RmsProp { .. } => "rmsprop",
            Self::Adam { .. } => "adam",
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match self {
            Self::Sgd { lr, .. } | Self::RmsProp { lr, .. } | Self::Adam { lr, .. } => *lr,
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::adam()
    }
}

impl fmt::Display for OptimizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OptimizerConfig {
    type Err = MlError;

    /// Parses an optimizer name into its default hyperparameters.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sgd" => Ok(Self::sgd()),
            "rmsprop" | "rms_prop" => Ok(Self::rmsprop()),
            "adam" => Ok(Self::adam()),
            other => Err(MlError::config(format!("unknown optimizer '{other}'"))),
        }
    }
}

/// Optimizer with its per-parameter state. Created fresh for every `fit`.
#[derive(Debug, Clone)]
pub struct Optimizer {
    config: OptimizerConfig,
    iterations: u32,
    first: Vec<Vec<f32>>,
    second: Vec<Vec<f32>>,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            iterations: 0,
            first: Vec::new(),
            second: Vec::new(),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }

    /// Apply one update to every parameter using its accumulated gradient.
    /// Parameters must be passed in the same order on every call.
    pub fn step(&mut self, params: Vec<&mut Param>) -> Result<(), MlError> {
        if self.first.is_empty() {
            self.first = params.iter().map(|p| vec![0.0; p.len()]).collect();
            self.second = params.iter().map(|p| vec![0.0; p.len()]).collect();
        }
        if self.first.len() != params.len() {
            return Err(MlError::training(format!(
                "optimizer tracks {} parameters, got {}",
                self.first.len(),
                params.len()
            )));
        }
        self.iterations += 1;
        let t = self.iterations as i32;

        for (i, param) in params.into_iter().enumerate() {
            let Param { value, grad } = param;
            if grad.len() != value.len() || self.first[i].len() != value.len() {
                return Err(MlError::training(format!(
                    "parameter {i} has no gradient of matching size"
                )));
            }
            let m = &mut self.first[i];
            let v = &mut self.second[i];
            match self.config {
                OptimizerConfig::Sgd { lr, momentum } => {
                    for j in 0..value.len() {
                        m[j] = momentum * m[j] - lr * grad[j];
                        value[j] += m[j];
                    }
                }
                OptimizerConfig::RmsProp { lr, rho } => {
                    for j in 0..value.len() {
                        v[j] = rho * v[j] + (1.0 - rho) * grad[j] * grad[j];
                        value[j] -= lr * grad[j] / (v[j].sqrt() + EPSILON);
                    }
                }
                OptimizerConfig::Adam { lr, beta1, beta2 } => {
                    let lr_t = lr * (1.0 - beta2.powi(t)).sqrt() / (1.0 - beta1.powi(t));
                    for j in 0..value.len() {
                        m[j] = beta1 * m[j] + (1.0 - beta1) * grad[j];
                        v[j] = beta2 * v[j] + (1.0 - beta2) * grad[j] * grad[j];
                        value[j] -= lr_t * m[j] / (v[j].sqrt() + EPSILON);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic_descent(config: OptimizerConfig, steps: usize) -> f32 {
        // minimize (w - 3)^2
        let mut param = Param::new(vec![0.0]);
        let mut opt = Optimizer::new(config);
        for _ in 0..steps {
            param.zero_grad();
            param.grad[0] = 2.0 * (param.value[0] - 3.0);
            opt.step(vec![&mut param]).unwrap();
        }
        param.value[0]
    }

    #[test]
    fn test_sgd_converges() {
        let w = quadratic_descent(OptimizerConfig::sgd(), 500);
        assert!((w - 3.0).abs() < 1e-2, "w = {w}");
    }

    #[test]
    fn test_adam_and_rmsprop_move_toward_minimum() {
        for config in [
            OptimizerConfig::Adam {
                lr: 0.1,
                beta1: 0.9,
                beta2: 0.999,
            },
            OptimizerConfig::RmsProp { lr: 0.05, rho: 0.9 },
        ] {
            let w = quadratic_descent(config, 300);
            assert!((w - 3.0).abs() < 0.2, "{config}: w = {w}");
        }
    }

    #[test]
    fn test_parse_optimizer_names() {
        assert_eq!("Adam".parse::<OptimizerConfig>().unwrap().name(), "adam");
        assert_eq!("RMSprop".parse::<OptimizerConfig>().unwrap().name(), "rmsprop");
        assert_eq!("SGD".parse::<OptimizerConfig>().unwrap().name(), "sgd");
        assert!("adagrad".parse::<OptimizerConfig>().is_err());
    }
}
