//! Algorithm evaluation metrics.

use crate::data::Samples;
use crate::error::MlError;
use crate::nn::Sequential;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Cross-validation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidation {
    pub n_folds: usize,
    pub stratified: bool,
    pub shuffle: bool,
    pub random_state: Option<u64>,
}

impl Default for CrossValidation {
    fn default() -> Self {
        Self {
            n_folds: 3,
            stratified: true,
            shuffle: true,
            random_state: Some(42),
        }
    }
}

impl CrossValidation {
    /// Seed used to shuffle indices before folding, if shuffling is on.
    pub fn shuffle_seed(&self) -> Option<u64> {
        self.shuffle.then(|| self.random_state.unwrap_or(0))
    }
}

/// Cross-validation result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossValidationResult {
    pub fold_scores: Vec<f64>,
    pub mean_score: f64,
    pub std_score: f64,
    pub metric_name: String,
}

impl CrossValidationResult {
    pub fn from_scores(scores: Vec<f64>, metric_name: &str) -> Self {
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            fold_scores: scores,
            mean_score: mean,
            std_score: variance.sqrt(),
            metric_name: metric_name.to_string(),
        }
    }
}

/// Square count table: rows are true labels, columns are predictions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    num_classes: usize,
    counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            counts: vec![vec![0; num_classes]; num_classes],
        }
    }

    pub fn from_predictions(
        truth: &[usize],
        predicted: &[usize],
        num_classes: usize,
    ) -> Result<Self, MlError> {
        if truth.len() != predicted.len() {
            return Err(MlError::Evaluation(format!(
                "{} true labels but {} predictions",
                truth.len(),
                predicted.len()
            )));
        }
        let mut matrix = Self::new(num_classes);
        for (&t, &p) in truth.iter().zip(predicted) {
            if t >= num_classes || p >= num_classes {
                return Err(MlError::Evaluation(format!(
                    "label pair ({t}, {p}) outside {num_classes} classes"
                )));
            }
            matrix.counts[t][p] += 1;
        }
        Ok(matrix)
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn counts(&self) -> &[Vec<usize>] {
        &self.counts
    }

    pub fn get(&self, truth: usize, predicted: usize) -> usize {
        self.counts[truth][predicted]
    }

    /// Number of samples per true class.
    pub fn row_sums(&self) -> Vec<usize> {
        self.counts.iter().map(|row| row.iter().sum()).collect()
    }

    /// Number of predictions per class.
    pub fn column_sums(&self) -> Vec<usize> {
        (0..self.num_classes)
            .map(|j| self.counts.iter().map(|row| row[j]).sum())
            .collect()
    }

    pub fn trace(&self) -> usize {
        (0..self.num_classes).map(|i| self.counts[i][i]).sum()
    }

    pub fn total(&self) -> usize {
        self.counts.iter().flatten().sum()
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => self.trace() as f64 / total as f64,
        }
    }

    /// Text heat table with class names as row and column headers.
    pub fn render(&self, class_names: &[String]) -> String {
        let label = |i: usize| -> String {
            class_names
                .get(i)
                .map(|n| n.chars().take(5).collect::<String>())
                .unwrap_or_else(|| i.to_string())
        };
        let mut out = String::new();
        let _ = write!(out, "{:>12}", "true\\pred");
        for j in 0..self.num_classes {
            let _ = write!(out, "{:>6}", label(j));
        }
        out.push('\n');
        for (i, row) in self.counts.iter().enumerate() {
            let name = class_names.get(i).cloned().unwrap_or_else(|| i.to_string());
            let _ = write!(out, "{name:>12}");
            for count in row {
                let _ = write!(out, "{count:>6}");
            }
            out.push('\n');
        }
        out
    }
}

/// Precision, recall and F1 per class plus macro averages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub support: Vec<usize>,
    pub macro_precision: f64,
    pub macro_recall: f64,
    pub macro_f1: f64,
}

impl ClassificationMetrics {
    pub fn from_confusion(matrix: &ConfusionMatrix) -> Self {
        let rows = matrix.row_sums();
        let cols = matrix.column_sums();
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };

        let mut precision = Vec::with_capacity(matrix.num_classes());
        let mut recall = Vec::with_capacity(matrix.num_classes());
        let mut f1 = Vec::with_capacity(matrix.num_classes());
        for k in 0..matrix.num_classes() {
            let tp = matrix.get(k, k);
            let p = ratio(tp, cols[k]);
            let r = ratio(tp, rows[k]);
            precision.push(p);
            recall.push(r);
            f1.push(if p + r > 0.0 { 2.0 * p * r / (p + r) } else { 0.0 });
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len().max(1) as f64;
        Self {
            macro_precision: mean(&precision),
            macro_recall: mean(&recall),
            macro_f1: mean(&f1),
            precision,
            recall,
            f1,
            support: rows,
        }
    }
}

/// Result of scoring a model on a labeled set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub predictions: Vec<usize>,
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub metrics: ClassificationMetrics,
}

/// Predict every sample, compare the arg-max class with the true class and
/// tabulate the outcome. The model is only read.
pub fn evaluate(
    model: &Sequential,
    samples: &Samples,
    batch_size: usize,
) -> Result<EvaluationReport, MlError> {
    if samples.is_empty() {
        return Err(MlError::Evaluation("no samples to evaluate".into()));
    }
    let outputs = model.predict_batched(&samples.images, batch_size)?;
    let num_classes = outputs.sample_len();
    let predictions = outputs.argmax_rows();
    let truth = samples.targets.class_indices();
    let confusion = ConfusionMatrix::from_predictions(&truth, &predictions, num_classes)?;
    let accuracy = confusion.accuracy();
    tracing::info!(
        model = %model.name,
        samples = samples.len(),
        accuracy,
        "evaluated model"
    );
    Ok(EvaluationReport {
        predictions,
        accuracy,
        metrics: ClassificationMetrics::from_confusion(&confusion),
        confusion,
    })
}
