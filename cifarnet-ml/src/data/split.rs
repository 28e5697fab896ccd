//! Seeded train/validation splitting and k-fold index generation.

use crate::data::Samples;
use crate::error::MlError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

pub const DEFAULT_VALIDATION_FRACTION: f64 = 0.2;
pub const DEFAULT_SPLIT_SEED: u64 = 42;

/// Disjoint training and validation partitions of one source.
#[derive(Debug, Clone, PartialEq)]
pub struct Split {
    pub train: Samples,
    pub validation: Samples,
    /// Source indices of the training samples, in partition order.
    pub train_indices: Vec<usize>,
    pub validation_indices: Vec<usize>,
}

/// Shuffle `0..n` with `seed` and hold out the first `ceil(fraction * n)`
/// positions for validation. Returns `(train, validation)` indices.
pub fn split_indices(n: usize, fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>), MlError> {
    if !(fraction > 0.0 && fraction < 1.0) {
        return Err(MlError::invalid_input(format!(
            "validation fraction must lie in (0, 1), got {fraction}"
        )));
    }
    let n_validation = (fraction * n as f64).ceil() as usize;
    if n_validation == 0 || n_validation >= n {
        return Err(MlError::invalid_input(format!(
            "fraction {fraction} of {n} samples leaves an empty partition"
        )));
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(&mut StdRng::seed_from_u64(seed));
    let train = order.split_off(n_validation);
    Ok((train, order))
}

/// Shuffle `samples` with `seed` and hold out `ceil(fraction * n)` of them
/// for validation.
pub fn train_validation_split(samples: &Samples, fraction: f64, seed: u64) -> Result<Split, MlError> {
    let (train_indices, validation_indices) = split_indices(samples.len(), fraction, seed)?;
    let split = Split {
        train: samples.select(&train_indices)?,
        validation: samples.select(&validation_indices)?,
        train_indices,
        validation_indices,
    };
    tracing::debug!(
        train = split.train.len(),
        validation = split.validation.len(),
        seed,
        "split samples"
    );
    Ok(split)
}

/// One cross-validation fold: indices to fit on and indices to score on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Partition `0..n` into `k` folds. With `seed`, indices are shuffled first.
/// With `labels`, each class is spread evenly across folds.
pub fn k_fold_indices(
    n: usize,
    k: usize,
    seed: Option<u64>,
    labels: Option<&[usize]>,
) -> Result<Vec<Fold>, MlError> {
    if k < 2 || k > n {
        return Err(MlError::invalid_input(format!(
            "cannot make {k} folds from {n} samples"
        )));
    }
    let mut order: Vec<usize> = (0..n).collect();
    if let Some(seed) = seed {
        order.shuffle(&mut StdRng::seed_from_u64(seed));
    }

    let mut assignment = vec![0usize; n];
    match labels {
        Some(labels) => {
            if labels.len() != n {
                return Err(MlError::shape(format!(
                    "{} labels for {n} samples",
                    labels.len()
                )));
            }
            let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
            for &i in &order {
                by_class.entry(labels[i]).or_default().push(i);
            }
            let mut next = 0;
            for members in by_class.values() {
                for &i in members {
                    assignment[i] = next % k;
                    next += 1;
                }
            }
        }
        None => {
            let base = n / k;
            let extra = n % k;
            let mut pos = 0;
            for fold in 0..k {
                let size = base + usize::from(fold < extra);
                for &i in &order[pos..pos + size] {
                    assignment[i] = fold;
                }
                pos += size;
            }
        }
    }

    Ok((0..k)
        .map(|fold| {
            let (test, train): (Vec<usize>, Vec<usize>) =
                (0..n).partition(|&i| assignment[i] == fold);
            Fold { train, test }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::{Targets, Tensor};

    fn samples(n: usize) -> Samples {
        let images = Tensor::new(vec![n, 1], (0..n).map(|i| i as f32).collect()).unwrap();
        Samples::new(images, Targets::Sparse((0..n).map(|i| i % 10).collect())).unwrap()
    }

    #[test]
    fn test_split_sizes_use_ceiling() {
        let split = train_validation_split(&samples(11), 0.2, 42).unwrap();
        assert_eq!(split.validation.len(), 3);
        assert_eq!(split.train.len(), 8);
    }

    #[test]
    fn test_split_is_deterministic_and_disjoint() {
        let a = train_validation_split(&samples(50), 0.2, 7).unwrap();
        let b = train_validation_split(&samples(50), 0.2, 7).unwrap();
        assert_eq!(a.validation_indices, b.validation_indices);
        assert!(a.train_indices.iter().all(|i| !a.validation_indices.contains(i)));
        // the image value equals its source index
        assert_eq!(a.train.images.data()[0] as usize, a.train_indices[0]);
    }

    #[test]
    fn test_index_split_matches_sample_split() {
        let split = train_validation_split(&samples(30), 0.2, 42).unwrap();
        let (train, validation) = split_indices(30, 0.2, 42).unwrap();
        assert_eq!(train, split.train_indices);
        assert_eq!(validation, split.validation_indices);
    }

    #[test]
    fn test_split_rejects_bad_fraction() {
        for fraction in [0.0, 1.0, -0.5, 1.5] {
            assert!(matches!(
                train_validation_split(&samples(10), fraction, 1),
                Err(MlError::InvalidInput(_))
            ));
        }
        assert!(train_validation_split(&samples(1), 0.5, 1).is_err());
    }

    #[test]
    fn test_k_fold_covers_every_index_once() {
        let folds = k_fold_indices(10, 3, Some(3), None).unwrap();
        assert_eq!(folds.len(), 3);
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.train.len() + fold.test.len(), 10);
        }
    }

    #[test]
    fn test_stratified_folds_balance_classes() {
        let labels: Vec<usize> = (0..12).map(|i| i % 2).collect();
        let folds = k_fold_indices(12, 3, Some(0), Some(&labels)).unwrap();
        for fold in folds {
            let ones = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(ones, 2);
            assert_eq!(fold.test.len(), 4);
        }
    }

    #[test]
    fn test_k_fold_rejects_bad_k() {
        assert!(k_fold_indices(5, 1, None, None).is_err());
        assert!(k_fold_indices(2, 3, None, None).is_err());
    }
}
