//! CLI subcommand handlers.

use crate::{ArchitectureKind, Commands, ConfigAction, OutputArg, SweepKind};
use anyhow::{Context, bail};
use cifarnet_ml::algorithms::{Architecture, OutputKind, build_model, evaluate};
use cifarnet_ml::config::WORKSPACE_CONFIG_FILE;
use cifarnet_ml::data::{
    CifarDataset, LabelEncoding, PixelStats, Samples, load_custom_image, normalize,
    prepare_samples, split_indices, train_validation_split,
};
use cifarnet_ml::nn::activation::softmax;
use cifarnet_ml::nn::{Activation, Loss, OptimizerConfig, Sequential};
use cifarnet_ml::persistence::{self, JsonStyle};
use cifarnet_ml::training::{activation_sweep, dropout_sweep, optimizer_sweep};
use cifarnet_ml::CifarnetConfig;
use std::path::{Path, PathBuf};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    mut config: CifarnetConfig,
    workspace: &Path,
) -> anyhow::Result<()> {
    match command {
        Commands::Inspect => handle_inspect(&config),
        Commands::Train {
            architecture,
            dropout_rate,
            activation,
            output,
            optimizer,
            epochs,
            batch_size,
            no_save,
        } => {
            config.training.architecture = resolve_architecture(
                architecture,
                dropout_rate,
                activation.as_deref(),
                output,
                config.training.architecture,
            )?;
            if let Some(name) = optimizer {
                config.training.optimizer = name.parse::<OptimizerConfig>()?;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                config.training.batch_size = batch_size;
            }
            if no_save {
                config.output.save_model = false;
            }
            handle_train(&config).map(|_| ())
        }
        Commands::Evaluate { model } => handle_evaluate(&config, model),
        Commands::Predict { image, model } => handle_predict(&config, image, model),
        Commands::Sweep { kind, epochs } => handle_sweep(&config, kind, epochs).map(|_| ()),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

fn resolve_architecture(
    kind: Option<ArchitectureKind>,
    dropout_rate: Option<f32>,
    activation: Option<&str>,
    output: Option<OutputArg>,
    current: Architecture,
) -> anyhow::Result<Architecture> {
    let kind = match kind {
        Some(kind) => kind,
        None => match current {
            Architecture::Intro => ArchitectureKind::Intro,
            Architecture::Dropout { .. } => ArchitectureKind::Dropout,
            Architecture::Simple { .. } => ArchitectureKind::Simple,
        },
    };
    Ok(match kind {
        ArchitectureKind::Intro => Architecture::Intro,
        ArchitectureKind::Dropout => {
            let fallback = match current {
                Architecture::Dropout { rate } => rate,
                _ => 0.3,
            };
            Architecture::Dropout {
                rate: dropout_rate.unwrap_or(fallback),
            }
        }
        ArchitectureKind::Simple => {
            let (current_activation, current_output) = match current {
                Architecture::Simple { activation, output } => (activation, output),
                _ => (Activation::Relu, OutputKind::Logits),
            };
            let activation = match activation {
                Some(name) => name.parse::<Activation>()?,
                None => current_activation,
            };
            let output = match output {
                Some(OutputArg::Softmax) => OutputKind::Softmax,
                Some(OutputArg::Logits) => OutputKind::Logits,
                None => current_output,
            };
            Architecture::Simple { activation, output }
        }
    })
}

fn load_dataset(config: &CifarnetConfig) -> anyhow::Result<CifarDataset> {
    config.data.loader().load().with_context(|| {
        format!(
            "Failed to load CIFAR-10 from {}",
            config.data.data_dir.display()
        )
    })
}

fn handle_inspect(config: &CifarnetConfig) -> anyhow::Result<()> {
    let dataset = load_dataset(config)?;
    println!("Training set");
    print!("{}", dataset.train.summary(&dataset.class_names));
    println!("Test set");
    print!("{}", dataset.test.summary(&dataset.class_names));

    let (train_indices, validation_indices) = split_indices(
        dataset.train.len(),
        config.data.validation_fraction,
        config.data.split_seed,
    )
    .context("Failed to split the training set")?;
    println!(
        "\nAfter a {:.0}/{:.0} split (seed {})",
        (1.0 - config.data.validation_fraction) * 100.0,
        config.data.validation_fraction * 100.0,
        config.data.split_seed
    );
    println!("Training partition");
    print!("{}", dataset.train.select(&train_indices)?.summary(&dataset.class_names));
    println!("Validation partition");
    print!(
        "{}",
        dataset.train.select(&validation_indices)?.summary(&dataset.class_names)
    );

    if let Some(&label) = dataset.train.labels.first() {
        let first = dataset.train.images.select(&[0])?;
        println!(
            "\nFirst training image ({}):",
            dataset.class_names[label as usize]
        );
        println!("  raw:        {}", PixelStats::of_raw(&first));
        println!("  normalized: {}", PixelStats::of_tensor(&normalize(&first)));
    }
    Ok(())
}

/// Label encoding expected by a saved model's loss.
fn encoding_for(model: &Sequential) -> LabelEncoding {
    match model.compiled().map(|c| c.loss) {
        Some(Loss::SparseCategoricalCrossentropy { .. }) => LabelEncoding::Sparse,
        _ => LabelEncoding::OneHot,
    }
}

fn report_evaluation(
    model: &Sequential,
    test: &Samples,
    class_names: &[String],
    batch_size: usize,
) -> anyhow::Result<cifarnet_ml::algorithms::EvaluationReport> {
    let (test_loss, test_accuracy) = model.evaluate_loss(&test.images, &test.targets, batch_size)?;
    let report = evaluate(model, test, batch_size)?;
    println!("\nTest loss: {test_loss:.4}  test accuracy: {test_accuracy:.4}");
    println!("\nConfusion matrix (rows: true, columns: predicted)");
    print!("{}", report.confusion.render(class_names));
    println!(
        "\nMacro precision {:.4}  recall {:.4}  F1 {:.4}",
        report.metrics.macro_precision, report.metrics.macro_recall, report.metrics.macro_f1
    );
    Ok(report)
}

/// Train the configured architecture and return where the model was saved.
fn handle_train(config: &CifarnetConfig) -> anyhow::Result<Option<PathBuf>> {
    let dataset = load_dataset(config)?;
    let num_classes = dataset.class_names.len();
    let architecture = config.training.architecture;
    let encoding = architecture.label_encoding();

    let samples = prepare_samples(&dataset.train, encoding, num_classes)?;
    let split = train_validation_split(
        &samples,
        config.data.validation_fraction,
        config.data.split_seed,
    )
    .context("Failed to split the training set")?;
    let test = prepare_samples(&dataset.test, encoding, num_classes)?;
    println!(
        "train {:?}  validation {:?}  test {:?}",
        split.train.images.shape(),
        split.validation.images.shape(),
        test.images.shape()
    );

    let mut model = build_model(
        &architecture,
        config.training.optimizer,
        num_classes,
        config.training.seed,
    )
    .with_context(|| format!("Failed to build {architecture}"))?;
    print!("{}", model.summary());

    let history = config
        .training
        .trainer()
        .fit(&mut model, &split.train, Some(&split.validation))
        .context("Training failed")?;
    println!(
        "\nTrained {} epochs; best epoch {:?} (loss {:?})",
        history.epochs_completed, history.best_epoch, history.best_loss
    );

    let report = report_evaluation(&model, &test, &dataset.class_names, config.training.batch_size)?;

    if !config.output.save_model {
        return Ok(None);
    }
    let dir = &config.output.dir;
    let model_path = persistence::artifact_path(dir, &model.name);
    model
        .save(&model_path)
        .with_context(|| format!("Failed to save model to {}", model_path.display()))?;
    persistence::write_artifact(
        &persistence::artifact_path(dir, &format!("history_{}", model.name)),
        &history,
        JsonStyle::Pretty,
    )?;
    persistence::write_artifact(
        &persistence::artifact_path(dir, &format!("evaluation_{}", model.name)),
        &report,
        JsonStyle::Pretty,
    )?;
    tracing::info!(model = %model_path.display(), dir = %dir.display(), "saved training artifacts");
    println!("Saved model to {}", model_path.display());
    Ok(Some(model_path))
}

fn model_path(config: &CifarnetConfig, explicit: Option<PathBuf>) -> PathBuf {
    explicit.unwrap_or_else(|| {
        persistence::artifact_path(&config.output.dir, config.training.architecture.model_name())
    })
}

fn load_model(path: &Path) -> anyhow::Result<Sequential> {
    Sequential::load(path).with_context(|| format!("Failed to load model from {}", path.display()))
}

fn handle_evaluate(config: &CifarnetConfig, model: Option<PathBuf>) -> anyhow::Result<()> {
    let model = load_model(&model_path(config, model))?;
    let dataset = load_dataset(config)?;
    let test = prepare_samples(&dataset.test, encoding_for(&model), dataset.class_names.len())?;
    report_evaluation(&model, &test, &dataset.class_names, config.training.batch_size)?;
    Ok(())
}

fn handle_predict(
    config: &CifarnetConfig,
    image: Option<PathBuf>,
    model: Option<PathBuf>,
) -> anyhow::Result<()> {
    let ranked = predict_image(config, image, model)?;
    if let Some((top, _)) = ranked.first() {
        println!("\nPrediction: {top}");
    }
    for (class, p) in &ranked {
        println!("  {class:<12} {p:.4}");
    }
    Ok(())
}

/// Class names for labelling predictions: `batches.meta.txt` in the data
/// dir when present, the built-in list otherwise.
fn class_names(config: &CifarnetConfig) -> anyhow::Result<Vec<String>> {
    config.data.loader().class_names().with_context(|| {
        format!(
            "Failed to read class names from {}",
            config.data.data_dir.display()
        )
    })
}

/// Classify one image; classes ranked by descending probability.
fn predict_image(
    config: &CifarnetConfig,
    image: Option<PathBuf>,
    model: Option<PathBuf>,
) -> anyhow::Result<Vec<(String, f32)>> {
    let Some(image) = image.or_else(|| config.data.custom_image.clone()) else {
        bail!("No image given: pass a path or set data.custom_image");
    };
    let model = load_model(&model_path(config, model))?;
    let &[height, width, _] = model.input_shape() else {
        bail!("Model '{}' does not take images", model.name);
    };
    let names = class_names(config)?;

    let raw = load_custom_image(&image, (height, width))
        .with_context(|| format!("Failed to read {}", image.display()))?;
    let input = normalize(&raw);
    println!("Image {} resized to {:?}", image.display(), raw.shape());
    println!("  raw:        {}", PixelStats::of_raw(&raw));
    println!("  normalized: {}", PixelStats::of_tensor(&input));

    let output = model.predict(&input)?;
    let width = output.sample_len();
    if width != names.len() {
        tracing::warn!(
            outputs = width,
            names = names.len(),
            "model output width differs from the number of class names"
        );
    }
    let probabilities = match model.compiled() {
        Some(c) if c.loss.from_logits() => softmax(output.data(), width),
        _ => output.data().to_vec(),
    };

    let mut ranked: Vec<(String, f32)> = probabilities
        .into_iter()
        .enumerate()
        .map(|(i, p)| (names.get(i).cloned().unwrap_or_else(|| format!("class_{i}")), p))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    if let Some((top, p)) = ranked.first() {
        tracing::info!(image = %image.display(), class = %top, probability = *p, "predicted");
    }
    Ok(ranked)
}

/// Run one sweep and return where its report was written.
fn handle_sweep(
    config: &CifarnetConfig,
    kind: SweepKind,
    epochs: Option<usize>,
) -> anyhow::Result<PathBuf> {
    let dataset = load_dataset(config)?;
    let sweep = &config.sweep;
    let out_dir = &config.output.dir;

    let path = match kind {
        SweepKind::Dropout => {
            let settings =
                sweep.trial_settings(epochs.unwrap_or(sweep.dropout_epochs), &config.data);
            let report = dropout_sweep(&dataset.train, &sweep.dropout_rates, &settings)
                .context("Dropout sweep failed")?;
            print!("{}", report.render("val_loss"));
            for trial in &report.trials {
                println!(
                    "  rate {:<6} val_accuracy {:.4}",
                    trial.candidate.to_string(),
                    trial.detail.val_accuracy
                );
            }
            report.save(out_dir)?
        }
        SweepKind::Activation => {
            let settings =
                sweep.trial_settings(epochs.unwrap_or(sweep.activation_epochs), &config.data);
            let report = activation_sweep(&dataset.train, &sweep.activations, &settings)
                .context("Activation sweep failed")?;
            print!("{}", report.render("val_loss"));
            println!("\nValidation accuracy per epoch");
            for trial in &report.trials {
                let curve: Vec<String> = trial
                    .detail
                    .history
                    .val_accuracy
                    .iter()
                    .map(|a| format!("{a:.3}"))
                    .collect();
                println!("  {:<12} {}", trial.candidate.to_string(), curve.join(" "));
            }
            report.save(out_dir)?
        }
        SweepKind::Optimizer => {
            let settings =
                sweep.trial_settings(epochs.unwrap_or(sweep.optimizer_epochs), &config.data);
            let report = optimizer_sweep(
                &dataset.train,
                &sweep.optimizers,
                &settings,
                &sweep.cross_validation(),
            )
            .context("Optimizer sweep failed")?;
            print!("{}", report.render("cv_accuracy"));
            if let Some(best) = report.best() {
                println!(
                    "Best: {:.4} using {{'optimizer': '{}'}} (std {:.4})",
                    best.score, best.candidate, best.detail.std_score
                );
            }
            report.save(out_dir)?
        }
    };
    tracing::info!(report = %path.display(), "saved sweep report");
    println!("Saved sweep report to {}", path.display());
    Ok(path)
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&CifarnetConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = cifarnet_ml::load_config(Some(workspace), None)
                .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}
