//! # cifarnet-ml
//!
//! Image classification on CIFAR-10 with small convolutional networks:
//! dataset loading and preprocessing, model building, training,
//! hyperparameter sweeps, evaluation and model persistence.
//!
//! Data flows one way: [`data`] loads and prepares images,
//! [`algorithms::neural`] builds a compiled [`nn::Sequential`] model,
//! [`training::Trainer`] fits it, and [`algorithms::evaluation`] or the
//! sweeps in [`training::sweep`] score it.

// Foundation
pub mod config;
pub mod error;
pub mod persistence;

// Numeric engine
pub mod nn;

// Pipeline
pub mod algorithms;
pub mod data;
pub mod training;

// Re-exports
pub use config::{CifarnetConfig, load_config};
pub use error::MlError;
