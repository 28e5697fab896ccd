//! Model architectures and evaluation.

pub mod evaluation;
pub mod neural;

pub use evaluation::{
    ClassificationMetrics, ConfusionMatrix, CrossValidation, CrossValidationResult,
    EvaluationReport, evaluate,
};
pub use neural::{Architecture, ArchitectureConfig, LayerConfig, OutputKind, build_model};
