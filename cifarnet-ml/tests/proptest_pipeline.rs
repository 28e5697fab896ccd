//! Property-based tests for preprocessing, splitting and evaluation.

use proptest::prelude::*;

use cifarnet_ml::algorithms::ConfusionMatrix;
use cifarnet_ml::data::{
    RawImages, Samples, decode_one_hot, k_fold_indices, normalize, one_hot, train_validation_split,
};
use cifarnet_ml::nn::{Targets, Tensor};

fn indexed_samples(n: usize) -> Samples {
    let images = Tensor::new(vec![n, 1], (0..n).map(|i| i as f32).collect()).unwrap();
    Samples::new(images, Targets::Sparse((0..n).map(|i| i % 10).collect())).unwrap()
}

// --- Preprocessing properties ---

proptest! {
    #[test]
    fn normalized_values_lie_in_unit_interval(pixels in prop::collection::vec(any::<u8>(), 1..300)) {
        let n = pixels.len();
        let raw = RawImages::new(n, (1, 1, 1), pixels.clone()).unwrap();
        let t = normalize(&raw);
        for (&v, &p) in t.data().iter().zip(&pixels) {
            prop_assert!((0.0..=1.0).contains(&v));
            prop_assert_eq!(v, p as f32 / 255.0);
        }
    }

    #[test]
    fn one_hot_round_trips(labels in prop::collection::vec(0u8..10, 0..200)) {
        let encoded = one_hot(&labels, 10).unwrap();
        prop_assert_eq!(encoded.shape(), &[labels.len(), 10][..]);
        for i in 0..labels.len() {
            let row = encoded.sample(i);
            prop_assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
            prop_assert_eq!(row.iter().sum::<f32>(), 1.0);
        }
        let decoded = decode_one_hot(&encoded);
        let expected: Vec<usize> = labels.iter().map(|&l| l as usize).collect();
        prop_assert_eq!(decoded, expected);
    }
}

// --- Split properties ---

proptest! {
    #[test]
    fn split_is_disjoint_and_complete(n in 2usize..300, fraction in 0.01f64..0.99, seed in any::<u64>()) {
        let samples = indexed_samples(n);
        let n_validation = (fraction * n as f64).ceil() as usize;
        prop_assume!(n_validation < n);

        let split = train_validation_split(&samples, fraction, seed).unwrap();
        prop_assert_eq!(split.validation.len(), n_validation);
        prop_assert_eq!(split.train.len() + split.validation.len(), n);

        let mut all: Vec<usize> = split
            .train
            .images
            .data()
            .iter()
            .chain(split.validation.images.data())
            .map(|&v| v as usize)
            .collect();
        all.sort_unstable();
        prop_assert_eq!(all, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn split_is_deterministic(n in 2usize..200, seed in any::<u64>()) {
        let samples = indexed_samples(n);
        prop_assume!(((0.2 * n as f64).ceil() as usize) < n);
        let a = train_validation_split(&samples, 0.2, seed).unwrap();
        let b = train_validation_split(&samples, 0.2, seed).unwrap();
        prop_assert_eq!(a.train_indices, b.train_indices);
        prop_assert_eq!(a.validation_indices, b.validation_indices);
    }

    #[test]
    fn k_folds_partition_indices(n in 3usize..200, k in 2usize..6, seed in any::<u64>(), stratify in any::<bool>()) {
        prop_assume!(k <= n);
        let labels: Vec<usize> = (0..n).map(|i| (i * 7) % 10).collect();
        let folds = k_fold_indices(n, k, Some(seed), stratify.then_some(labels.as_slice())).unwrap();
        prop_assert_eq!(folds.len(), k);
        let mut tested: Vec<usize> = folds.iter().flat_map(|f| f.test.iter().copied()).collect();
        tested.sort_unstable();
        prop_assert_eq!(tested, (0..n).collect::<Vec<_>>());
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        let (min, max) = (sizes.iter().min().unwrap(), sizes.iter().max().unwrap());
        prop_assert!(max - min <= 1);
    }
}

// --- Confusion matrix properties ---

proptest! {
    #[test]
    fn confusion_rows_sum_to_class_counts(
        pairs in prop::collection::vec((0usize..10, 0usize..10), 1..300)
    ) {
        let truth: Vec<usize> = pairs.iter().map(|p| p.0).collect();
        let predicted: Vec<usize> = pairs.iter().map(|p| p.1).collect();
        let m = ConfusionMatrix::from_predictions(&truth, &predicted, 10).unwrap();

        for (class, &sum) in m.row_sums().iter().enumerate() {
            prop_assert_eq!(sum, truth.iter().filter(|&&t| t == class).count());
        }
        let matches = pairs.iter().filter(|p| p.0 == p.1).count();
        let accuracy = matches as f64 / pairs.len() as f64;
        prop_assert_eq!(m.total(), pairs.len());
        prop_assert!((m.trace() as f64 / m.total() as f64 - accuracy).abs() < 1e-12);
        prop_assert!((m.accuracy() - accuracy).abs() < 1e-12);
    }
}
