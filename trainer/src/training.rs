//! Model training and persistence.
//!
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use burn::{
    backend::ndarray::NdArrayDevice,
    config::Config,
    data::dataloader::DataLoaderBuilder,
    module::Module,
    optim::AdamConfig,
    record::{DefaultFileRecorder, FullPrecisionSettings},
    tensor::backend::{AutodiffBackend, Backend},
    train::{
        metric::{AccuracyMetric, LossMetric},
        ClassificationOutput, LearnerBuilder, LearningStrategy, TrainOutput, TrainStep, ValidStep,
    },
};

use crate::{
    augment::Augmenter,
    data::{EpochDataset, ImageBatch, ImageBatcher, ManifestDataset},
    manifest::Manifest,
    model::{ModelConfig, RealFakeNet},
    CpuBackend, TrainBackend,
};

/// File stem of the persisted model record, the recorder appends `.mpk`.
pub const MODEL_FILE_STEM: &str = "model";
/// Model configuration written next to the record.
pub const MODEL_CONFIG_FILE: &str = "model_config.json";
/// Full training configuration.
pub const TRAINING_CONFIG_FILE: &str = "config.json";
/// Class name to index mapping of the training data.
pub const CLASS_INDICES_FILE: &str = "class_indices.json";

/// Training configuration.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub model: ModelConfig,
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    /// Training samples drawn per epoch.
    #[config(default = 8000)]
    pub samples_per_epoch: usize,
    /// Validation samples evaluated per epoch.
    #[config(default = 2000)]
    pub validation_samples: usize,
    #[config(default = 1.0e-3)]
    pub learning_rate: f64,
    /// Seed for shuffling and augmentation.
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 0)]
    pub num_workers: usize,
}

impl<B: AutodiffBackend> TrainStep<ImageBatch<B>, ClassificationOutput<B>> for RealFakeNet<B> {
    fn step(&self, batch: ImageBatch<B>) -> TrainOutput<ClassificationOutput<B>> {
        let item = self.forward_classification(batch.images, batch.targets);
        let grads = item.loss.backward();
        TrainOutput::new(self, grads, item)
    }
}

impl<B: Backend> ValidStep<ImageBatch<B>, ClassificationOutput<B>> for RealFakeNet<B> {
    fn step(&self, batch: ImageBatch<B>) -> ClassificationOutput<B> {
        self.forward_classification(batch.images, batch.targets)
    }
}

/// Fit a fresh model on the training manifest, validating on the test manifest.
///
/// Training and validation accuracy and loss are reported after every epoch.
/// The trained model, its configuration and the class indices are written to
/// `artifact_dir`.
pub fn train(
    artifact_dir: &Path,
    config: TrainingConfig,
    train_manifest: &Manifest,
    test_manifest: &Manifest,
) -> Result<RealFakeNet<CpuBackend>> {
    train_manifest
        .validate()
        .context("invalid training dataset")?;
    test_manifest.validate().context("invalid test dataset")?;

    let class_indices = train_manifest.class_indices();
    if class_indices != test_manifest.class_indices() {
        bail!(
            "training classes {:?} differ from test classes {:?}",
            train_manifest.classes(),
            test_manifest.classes()
        );
    }
    log::info!("Class indices: {:?}", &class_indices);
    for (name, count) in train_manifest.class_counts() {
        log::info!("  {}: {} training images", name, count);
    }

    fs::create_dir_all(artifact_dir)
        .with_context(|| format!("failed to create {}", artifact_dir.display()))?;
    config
        .save(artifact_dir.join(TRAINING_CONFIG_FILE))
        .context("failed to save training config")?;
    fs::write(
        artifact_dir.join(CLASS_INDICES_FILE),
        serde_json::to_string_pretty(&class_indices)?,
    )
    .context("failed to save class indices")?;

    let device = NdArrayDevice::Cpu;

    let dataloader_train = DataLoaderBuilder::<TrainBackend, _, _>::new(ImageBatcher::new(
        Augmenter::training(config.seed),
    ))
    .batch_size(config.batch_size)
    .shuffle(config.seed)
    .num_workers(config.num_workers)
    .build(EpochDataset::new(
        ManifestDataset::new(train_manifest),
        config.samples_per_epoch,
    ));

    let dataloader_valid =
        DataLoaderBuilder::<CpuBackend, _, _>::new(ImageBatcher::new(Augmenter::validation()))
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(EpochDataset::new(
                ManifestDataset::new(test_manifest),
                config.validation_samples,
            ));

    log::info!(
        "Training for {} epochs, {} samples per epoch, batch size {}, learning rate {}",
        config.num_epochs,
        config.samples_per_epoch,
        config.batch_size,
        config.learning_rate
    );

    let artifact_dir_str = artifact_dir.to_string_lossy().to_string();
    let learner = LearnerBuilder::new(&artifact_dir_str)
        .metric_train_numeric(AccuracyMetric::new())
        .metric_valid_numeric(AccuracyMetric::new())
        .metric_train_numeric(LossMetric::new())
        .metric_valid_numeric(LossMetric::new())
        .learning_strategy(LearningStrategy::SingleDevice(device.clone()))
        .num_epochs(config.num_epochs)
        .summary()
        .build(
            config.model.init::<TrainBackend>(&device),
            config.optimizer.init(),
            config.learning_rate,
        );

    let trained = learner.fit(dataloader_train, dataloader_valid);
    let model = trained.model;
    log::info!("Training done, {} parameters", model.num_params());

    let model_path = save_model(model.clone(), &config.model, artifact_dir)?;
    log::info!("Model saved to {}", model_path.display());

    Ok(model)
}

/// Persist a model record and its configuration, returns the record path.
pub fn save_model<B: Backend>(
    model: RealFakeNet<B>,
    config: &ModelConfig,
    artifact_dir: &Path,
) -> Result<PathBuf> {
    fs::create_dir_all(artifact_dir)
        .with_context(|| format!("failed to create {}", artifact_dir.display()))?;
    config
        .save(artifact_dir.join(MODEL_CONFIG_FILE))
        .context("failed to save model config")?;

    let stem = artifact_dir.join(MODEL_FILE_STEM);
    model
        .save_file(stem.clone(), &DefaultFileRecorder::<FullPrecisionSettings>::new())
        .map_err(|err| anyhow::anyhow!("failed to save model record: {:?}", err))?;

    Ok(stem.with_extension("mpk"))
}

/// Load a model record written by [`save_model`].
///
/// The configuration is read from the directory holding the record.
pub fn load_model<B: Backend>(model_path: &Path, device: &B::Device) -> Result<RealFakeNet<B>> {
    let dir = model_path.parent().unwrap_or_else(|| Path::new("."));
    let config_path = dir.join(MODEL_CONFIG_FILE);
    let config = ModelConfig::load(&config_path)
        .map_err(|err| anyhow::anyhow!("failed to load {}: {:?}", config_path.display(), err))?;

    config
        .init::<B>(device)
        .load_file(
            model_path.to_path_buf(),
            &DefaultFileRecorder::<FullPrecisionSettings>::new(),
            device,
        )
        .map_err(|err| anyhow::anyhow!("failed to load {}: {:?}", model_path.display(), err))
}

#[cfg(test)]
mod test {

    use super::*;
    use burn::tensor::{Int, Tensor};

    #[test]
    fn test_default_training_config() {
        let config = TrainingConfig::new(ModelConfig::new(), AdamConfig::new());

        assert_eq!(config.num_epochs, 10);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.samples_per_epoch, 8000);
        assert_eq!(config.validation_samples, 2000);
    }

    #[test]
    fn test_train_step_produces_finite_loss() {
        let device = Default::default();
        let model = ModelConfig::new().init::<TrainBackend>(&device);
        let batch = ImageBatch {
            images: Tensor::<TrainBackend, 4>::ones([2, 3, 64, 64], &device),
            targets: Tensor::<TrainBackend, 1, Int>::from_ints([0, 1], &device),
        };

        let output = TrainStep::step(&model, batch);
        let loss = output.item.loss.into_data().to_vec::<f32>().unwrap();
        assert!(loss[0].is_finite());
    }

    #[test]
    fn test_train_rejects_invalid_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let config = TrainingConfig::new(ModelConfig::new(), AdamConfig::new());
        let empty = Manifest::default();

        let err = train(dir.path(), config, &empty, &empty).unwrap_err();
        assert!(err.to_string().contains("invalid training dataset"));
    }

    #[test]
    fn test_save_and_load_model() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let config = ModelConfig::new();
        let model = config.init::<CpuBackend>(&device);

        let path = save_model(model.clone(), &config, dir.path()).unwrap();
        assert!(path.is_file());
        let loaded = load_model::<CpuBackend>(&path, &device).unwrap();

        let images = Tensor::<CpuBackend, 4>::ones([1, 3, 64, 64], &device);
        let expected = model.forward(images.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = loaded.forward(images).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }
}
