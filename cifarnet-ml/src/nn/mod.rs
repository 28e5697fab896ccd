//! Compact CPU numeric engine: tensors, layers with manual backward passes,
//! cross-entropy losses, optimizers and the sequential model container.

pub mod activation;
pub mod layers;
pub mod loss;
pub mod model;
pub mod optim;
pub mod tensor;

pub use activation::Activation;
pub use layers::{Conv2d, Dense, Dropout, Flatten, Layer, MaxPool2d, Param};
pub use loss::{Loss, Targets};
pub use model::{CompileConfig, Sequential};
pub use optim::{Optimizer, OptimizerConfig};
pub use tensor::Tensor;
