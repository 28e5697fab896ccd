//! Neural network architecture configurations and the model builder.

use crate::data::LabelEncoding;
use crate::error::MlError;
use crate::nn::{
    Activation, Conv2d, Dense, Dropout, Flatten, Layer, Loss, MaxPool2d, OptimizerConfig,
    Sequential,
};
use crate::training::reproducibility::SeedManager;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-sample input shape of CIFAR-10 images.
pub const INPUT_SHAPE: [usize; 3] = [32, 32, 3];

/// Layer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerConfig {
    Conv2d {
        filters: usize,
        kernel_size: usize,
        activation: Activation,
    },
    MaxPool2d {
        pool_size: usize,
    },
    Flatten,
    Dense {
        units: usize,
        activation: Activation,
    },
    Dropout {
        rate: f32,
    },
}

/// Final-layer output of the simple architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// Probabilities; paired with a loss on probabilities.
    Softmax,
    /// Unnormalized scores; paired with a from-logits loss.
    #[default]
    Logits,
}

/// The named architectures of the course.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "snake_case")]
pub enum Architecture {
    /// Two conv/pool stages and a small dense head.
    #[default]
    Intro,
    /// Three conv stages with dropout before the dense head.
    Dropout { rate: f32 },
    /// Two unpooled convolutions and a single dense output layer.
    Simple {
        activation: Activation,
        output: OutputKind,
    },
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Intro => write!(f, "intro"),
            Self::Dropout { rate } => write!(f, "dropout(rate={rate})"),
            Self::Simple { activation, output } => {
                write!(f, "simple(activation={activation}, output={output:?})")
            }
        }
    }
}

impl Architecture {
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::Intro => "cifar_model_intro",
            Self::Dropout { .. } => "cifar_model_dropout",
            Self::Simple { .. } => "cifar_model_simple",
        }
    }

    /// Layer stack for `num_classes` outputs.
    pub fn layers(&self, num_classes: usize) -> Vec<LayerConfig> {
        let conv = |filters, activation| LayerConfig::Conv2d {
            filters,
            kernel_size: 3,
            activation,
        };
        match *self {
            Self::Intro => vec![
                conv(16, Activation::Relu),
                LayerConfig::MaxPool2d { pool_size: 2 },
                conv(32, Activation::Relu),
                LayerConfig::MaxPool2d { pool_size: 2 },
                LayerConfig::Flatten,
                LayerConfig::Dense {
                    units: 64,
                    activation: Activation::Relu,
                },
                LayerConfig::Dense {
                    units: num_classes,
                    activation: Activation::Softmax,
                },
            ],
            Self::Dropout { rate } => vec![
                conv(16, Activation::Relu),
                LayerConfig::MaxPool2d { pool_size: 2 },
                conv(32, Activation::Relu),
                LayerConfig::MaxPool2d { pool_size: 2 },
                conv(64, Activation::Relu),
                LayerConfig::Dropout { rate },
                LayerConfig::Flatten,
                LayerConfig::Dense {
                    units: 128,
                    activation: Activation::Relu,
                },
                LayerConfig::Dense {
                    units: num_classes,
                    activation: Activation::Softmax,
                },
            ],
            Self::Simple { activation, output } => vec![
                conv(50, activation),
                conv(50, activation),
                LayerConfig::Flatten,
                LayerConfig::Dense {
                    units: num_classes,
                    activation: match output {
                        OutputKind::Softmax => Activation::Softmax,
                        OutputKind::Logits => Activation::Linear,
                    },
                },
            ],
        }
    }

    /// Loss matching the output layer and label encoding.
    pub fn loss(&self) -> Loss {
        match self {
            Self::Intro | Self::Dropout { .. } => Loss::CategoricalCrossentropy { from_logits: false },
            Self::Simple { output, .. } => Loss::SparseCategoricalCrossentropy {
                from_logits: *output == OutputKind::Logits,
            },
        }
    }

    /// Label encoding the loss expects.
    pub fn label_encoding(&self) -> LabelEncoding {
        match self.loss() {
            Loss::CategoricalCrossentropy { .. } => LabelEncoding::OneHot,
            Loss::SparseCategoricalCrossentropy { .. } => LabelEncoding::Sparse,
        }
    }

    pub fn config(&self, num_classes: usize) -> ArchitectureConfig {
        ArchitectureConfig {
            name: self.model_name().to_string(),
            layers: self.layers(num_classes),
            optimizer: OptimizerConfig::adam(),
            loss: self.loss(),
        }
    }
}

/// Full architecture configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub name: String,
    pub layers: Vec<LayerConfig>,
    pub optimizer: OptimizerConfig,
    pub loss: Loss,
}

impl ArchitectureConfig {
    pub fn with_optimizer(mut self, optimizer: OptimizerConfig) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Instantiate a fresh, compiled model. Weights are drawn from the
    /// `"init"` component seed of `seed`.
    pub fn build(&self, input_shape: &[usize], seed: u64) -> Result<Sequential, MlError> {
        let mut rng = StdRng::seed_from_u64(SeedManager::new(seed).get_seed("init"));
        let mut model = Sequential::new(self.name.clone(), input_shape.to_vec());
        for config in &self.layers {
            let current = model.output_shape()?;
            let layer = build_layer(config, &current, &mut rng)?;
            model.add(layer)?;
        }
        model.compile(self.optimizer, self.loss);
        tracing::debug!(
            model = %self.name,
            layers = self.layers.len(),
            params = model.param_count(),
            "built model"
        );
        Ok(model)
    }
}

/// Build, compile and return `architecture` for CIFAR-10 sized inputs.
pub fn build_model(
    architecture: &Architecture,
    optimizer: OptimizerConfig,
    num_classes: usize,
    seed: u64,
) -> Result<Sequential, MlError> {
    architecture
        .config(num_classes)
        .with_optimizer(optimizer)
        .build(&INPUT_SHAPE, seed)
}

fn build_layer(config: &LayerConfig, input: &[usize], rng: &mut StdRng) -> Result<Layer, MlError> {
    Ok(match *config {
        LayerConfig::Conv2d {
            filters,
            kernel_size,
            activation,
        } => {
            let &[_, _, channels] = input else {
                return Err(MlError::shape(format!(
                    "Conv2D needs a (height, width, channels) input, got {input:?}"
                )));
            };
            Layer::Conv2d(Conv2d::new(
                channels,
                filters,
                (kernel_size, kernel_size),
                activation,
                rng,
            ))
        }
        LayerConfig::MaxPool2d { pool_size } => {
            Layer::MaxPool2d(MaxPool2d::new((pool_size, pool_size)))
        }
        LayerConfig::Flatten => Layer::Flatten(Flatten::new()),
        LayerConfig::Dense { units, activation } => {
            let &[features] = input else {
                return Err(MlError::shape(format!(
                    "Dense needs a flat input, got {input:?}"
                )));
            };
            Layer::Dense(Dense::new(features, units, activation, rng))
        }
        LayerConfig::Dropout { rate } => Layer::Dropout(Dropout::new(rate)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intro_architecture_shapes() {
        let model = build_model(&Architecture::Intro, OptimizerConfig::adam(), 10, 0).unwrap();
        assert_eq!(model.name, "cifar_model_intro");
        assert_eq!(model.output_shape().unwrap(), vec![10]);
        // conv 30x30x16 -> pool 15 -> conv 13x13x32 -> pool 6 -> 1152
        let expected = (3 * 3 * 3 * 16 + 16) + (3 * 3 * 16 * 32 + 32) + (1152 * 64 + 64) + (64 * 10 + 10);
        assert_eq!(model.param_count(), expected);
        assert!(model.compiled().is_some());
    }

    #[test]
    fn test_dropout_architecture_rejects_bad_rate() {
        for rate in [0.0, 1.0, 1.5] {
            let err = build_model(&Architecture::Dropout { rate }, OptimizerConfig::adam(), 10, 0)
                .unwrap_err();
            assert!(matches!(err, MlError::Config(_)));
        }
        let model =
            build_model(&Architecture::Dropout { rate: 0.3 }, OptimizerConfig::adam(), 10, 0).unwrap();
        assert_eq!(model.layers()[5].kind(), "Dropout");
    }

    #[test]
    fn test_simple_output_selects_loss() {
        let logits = Architecture::Simple {
            activation: Activation::Tanh,
            output: OutputKind::Logits,
        };
        assert_eq!(
            logits.loss(),
            Loss::SparseCategoricalCrossentropy { from_logits: true }
        );
        assert_eq!(logits.label_encoding(), LabelEncoding::Sparse);
        assert_eq!(Architecture::Intro.label_encoding(), LabelEncoding::OneHot);
    }

    #[test]
    fn test_same_seed_builds_identical_weights() {
        let a = build_model(&Architecture::Intro, OptimizerConfig::adam(), 10, 5).unwrap();
        let b = build_model(&Architecture::Intro, OptimizerConfig::adam(), 10, 5).unwrap();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn test_weights_come_from_init_component_seed() {
        let model = build_model(&Architecture::Intro, OptimizerConfig::adam(), 10, 5).unwrap();
        let mut rng = StdRng::seed_from_u64(SeedManager::new(5).get_seed("init"));
        let expected = Conv2d::new(3, 16, (3, 3), Activation::Relu, &mut rng);
        let Layer::Conv2d(first) = &model.layers()[0] else {
            panic!("intro model starts with a convolution");
        };
        assert_eq!(first.kernel.value, expected.kernel.value);

        let mut raw = StdRng::seed_from_u64(5);
        let unmanaged = Conv2d::new(3, 16, (3, 3), Activation::Relu, &mut raw);
        assert_ne!(first.kernel.value, unmanaged.kernel.value);
    }

    #[test]
    fn test_architecture_config_serde() {
        let config = Architecture::Dropout { rate: 0.45 }.config(10);
        let json = serde_json::to_string(&config).unwrap();
        let back: ArchitectureConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
