//! End-to-end tests: synthetic images through build, fit, predict, evaluate,
//! persistence and sweeps.

use cifarnet_ml::algorithms::{
    Architecture, CrossValidation, OutputKind, build_model, evaluate,
};
use cifarnet_ml::data::{
    LabelEncoding, LabeledImages, NUM_CLASSES, RawImages, prepare_samples, train_validation_split,
};
use cifarnet_ml::nn::{Activation, OptimizerConfig, Sequential};
use cifarnet_ml::training::{
    DropoutRate, Objective, Trainer, TrialSettings, activation_sweep, cross_validate,
    dropout_sweep, optimizer_sweep,
};
use pretty_assertions::assert_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

fn synthetic_images(n: usize, seed: u64) -> LabeledImages {
    let mut rng = StdRng::seed_from_u64(seed);
    let pixels = (0..n * 32 * 32 * 3).map(|_| rng.r#gen::<u8>()).collect();
    let labels = (0..n).map(|i| (i % NUM_CLASSES) as u8).collect();
    LabeledImages::new(RawImages::new(n, (32, 32, 3), pixels).unwrap(), labels).unwrap()
}

fn settings(epochs: usize) -> TrialSettings {
    TrialSettings {
        epochs,
        batch_size: 8,
        validation_fraction: 0.2,
        seed: 42,
        num_classes: NUM_CLASSES,
    }
}

#[test]
fn intro_model_outputs_probabilities_after_one_epoch() {
    let data = synthetic_images(20, 1);
    let samples = prepare_samples(&data, LabelEncoding::OneHot, NUM_CLASSES).unwrap();
    let split = train_validation_split(&samples, 0.2, 42).unwrap();

    let mut model = build_model(&Architecture::Intro, OptimizerConfig::adam(), NUM_CLASSES, 0).unwrap();
    let history = Trainer::new(1, 8, 0)
        .fit(&mut model, &split.train, Some(&split.validation))
        .unwrap();
    assert_eq!(history.epochs_completed, 1);
    assert!(history.loss[0].is_finite());

    let one = split.validation.images.select(&[0]).unwrap();
    let out = model.predict(&one).unwrap();
    assert_eq!(out.shape(), &[1, 10]);
    let sum: f32 = out.data().iter().sum();
    assert!((sum - 1.0).abs() < 1e-4, "sum = {sum}");
    assert!(out.data().iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn simple_logits_model_outputs_unconstrained_scores() {
    let data = synthetic_images(6, 2);
    let architecture = Architecture::Simple {
        activation: Activation::Relu,
        output: OutputKind::Logits,
    };
    let samples = prepare_samples(&data, architecture.label_encoding(), NUM_CLASSES).unwrap();
    let mut model = build_model(&architecture, OptimizerConfig::adam(), NUM_CLASSES, 0).unwrap();
    Trainer::new(1, 6, 0).fit(&mut model, &samples, None).unwrap();

    let out = model.predict(&samples.images.select(&[0]).unwrap()).unwrap();
    assert_eq!(out.shape(), &[1, 10]);
    let sum: f32 = out.data().iter().sum();
    assert!((sum - 1.0).abs() > 1e-3 || out.data().iter().any(|&v| v < 0.0));
}

#[test]
fn evaluation_does_not_change_the_model() {
    let data = synthetic_images(10, 3);
    let samples = prepare_samples(&data, LabelEncoding::OneHot, NUM_CLASSES).unwrap();
    let model = build_model(&Architecture::Intro, OptimizerConfig::adam(), NUM_CLASSES, 7).unwrap();
    let before = serde_json::to_string(&model).unwrap();

    let report = evaluate(&model, &samples, 4).unwrap();
    assert_eq!(report.predictions.len(), 10);
    assert_eq!(report.confusion.row_sums(), vec![1; 10]);
    assert_eq!(report.confusion.trace() as f64 / 10.0, report.accuracy);
    assert_eq!(serde_json::to_string(&model).unwrap(), before);
}

#[test]
fn saved_model_predicts_identically() {
    let data = synthetic_images(12, 4);
    let samples = prepare_samples(&data, LabelEncoding::OneHot, NUM_CLASSES).unwrap();
    let mut model =
        build_model(&Architecture::Dropout { rate: 0.3 }, OptimizerConfig::adam(), NUM_CLASSES, 5)
            .unwrap();
    Trainer::new(1, 4, 5).fit(&mut model, &samples, None).unwrap();

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("fit_outputs").join("model.json");
    model.save(&path).unwrap();
    let loaded = Sequential::load(&path).unwrap();

    assert_eq!(loaded.name, model.name);
    assert_eq!(loaded.compiled(), model.compiled());
    assert_eq!(
        loaded.predict(&samples.images).unwrap(),
        model.predict(&samples.images).unwrap()
    );
}

#[test]
fn tampered_model_file_is_rejected() {
    let model = build_model(&Architecture::Intro, OptimizerConfig::sgd(), NUM_CLASSES, 1).unwrap();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.json");
    model.save(&path).unwrap();

    let mut envelope: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    envelope["model"]["name"] = serde_json::Value::from("renamed");
    std::fs::write(&path, envelope.to_string()).unwrap();

    let err = Sequential::load(&path).unwrap_err();
    assert!(matches!(err, cifarnet_ml::MlError::Model(_)));
}

#[test]
fn dropout_sweep_results_align_with_candidates() {
    let data = synthetic_images(15, 6);
    let rates = [0.3, 0.6, 0.3];
    let report = dropout_sweep(&data, &rates, &settings(1)).unwrap();

    assert_eq!(report.trials.len(), rates.len());
    for (i, trial) in report.trials.iter().enumerate() {
        assert_eq!(trial.trial_number, i);
        assert_eq!(trial.candidate, DropoutRate(rates[i]));
        assert_eq!(trial.score, trial.detail.val_loss);
        assert_eq!(trial.detail.history.epochs_completed, 1);
    }
    // Identical candidates give identical results: no state carries over.
    let (first, third) = (&report.trials[0].detail, &report.trials[2].detail);
    assert_eq!(first.history.loss, third.history.loss);
    assert_eq!(first.history.val_loss, third.history.val_loss);
    assert_eq!(first.val_accuracy, third.val_accuracy);
    assert!(report.best_trial.is_some());

    let dir = TempDir::new().unwrap();
    let path = report.save(dir.path()).unwrap();
    assert!(path.ends_with("sweep_dropout.json"));
}

#[test]
fn cross_validation_scores_every_fold() {
    let data = synthetic_images(12, 7);
    let samples = prepare_samples(&data, LabelEncoding::OneHot, NUM_CLASSES).unwrap();
    let cv = CrossValidation {
        n_folds: 3,
        stratified: false,
        ..CrossValidation::default()
    };
    let result = cross_validate(
        &Architecture::Intro,
        OptimizerConfig::rmsprop(),
        &samples,
        &settings(1),
        &cv,
    )
    .unwrap();
    assert_eq!(result.fold_scores.len(), 3);
    assert!(result.fold_scores.iter().all(|s| (0.0..=1.0).contains(s)));
    assert_eq!(result.metric_name, "accuracy");
}

#[test]
fn activation_sweep_keeps_order_and_full_histories() {
    let data = synthetic_images(10, 8);
    let activations = [Activation::Tanh, Activation::Relu, Activation::Sigmoid];
    let report = activation_sweep(&data, &activations, &settings(1)).unwrap();

    assert_eq!(report.experiment_name, "activation");
    assert_eq!(report.objective, Objective::Minimize);
    let candidates: Vec<Activation> = report.trials.iter().map(|t| t.candidate).collect();
    assert_eq!(candidates, activations.to_vec());
    for trial in &report.trials {
        assert_eq!(trial.score, trial.detail.val_loss);
        assert_eq!(trial.detail.history.val_accuracy.len(), 1);
    }
    let best = report.best().unwrap();
    assert!(report.scores().iter().all(|&s| best.score <= s));
}

#[test]
fn optimizer_sweep_picks_highest_mean_accuracy() {
    let data = synthetic_images(8, 9);
    let optimizers = [
        OptimizerConfig::sgd(),
        OptimizerConfig::rmsprop(),
        OptimizerConfig::adam(),
    ];
    let cv = CrossValidation {
        n_folds: 2,
        ..CrossValidation::default()
    };
    let report = optimizer_sweep(&data, &optimizers, &settings(1), &cv).unwrap();

    assert_eq!(report.objective, Objective::Maximize);
    let names: Vec<&str> = report.trials.iter().map(|t| t.candidate.name()).collect();
    assert_eq!(names, vec!["sgd", "rmsprop", "adam"]);
    for trial in &report.trials {
        assert_eq!(trial.detail.fold_scores.len(), 2);
        assert_eq!(trial.score, trial.detail.mean_score);
    }
    let best = report.best().unwrap();
    assert!(report.scores().iter().all(|&s| s <= best.score));
    // ties resolve to the earliest candidate
    let first_max = report
        .trials
        .iter()
        .find(|t| t.score == best.score)
        .map(|t| t.trial_number);
    assert_eq!(report.best_trial, first_max);
}
