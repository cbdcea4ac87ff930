//! Trainer binary.
//!
use std::path::PathBuf;

use anyhow::Result;
use burn::optim::AdamConfig;
use clap::Parser;
use env_logger::TimestampPrecision;
use trainer::{
    manifest::Manifest,
    model::ModelConfig,
    training::{train, TrainingConfig},
};

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Directory with one subdirectory of training images per class
    #[clap(long)]
    train_dir: PathBuf,

    /// Directory with one subdirectory of test images per class
    #[clap(long)]
    test_dir: PathBuf,

    /// Directory the trained model and its configuration are written to
    #[clap(long, default_value = "artifacts")]
    artifact_dir: PathBuf,

    #[clap(long, default_value_t = 10)]
    epochs: usize,

    #[clap(long, default_value_t = 32)]
    batch_size: usize,

    /// Training samples per epoch
    #[clap(long, default_value_t = 8000)]
    samples_per_epoch: usize,

    /// Validation samples per epoch
    #[clap(long, default_value_t = 2000)]
    validation_samples: usize,

    #[clap(long, default_value_t = 1.0e-3)]
    learning_rate: f64,

    #[clap(long, default_value_t = 42)]
    seed: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let train_manifest = Manifest::from_directory(&args.train_dir)?;
    let test_manifest = Manifest::from_directory(&args.test_dir)?;
    log::info!(
        "Found {} training and {} test images",
        train_manifest.len(),
        test_manifest.len()
    );

    let config = TrainingConfig::new(ModelConfig::new(), AdamConfig::new())
        .with_num_epochs(args.epochs)
        .with_batch_size(args.batch_size)
        .with_samples_per_epoch(args.samples_per_epoch)
        .with_validation_samples(args.validation_samples)
        .with_learning_rate(args.learning_rate)
        .with_seed(args.seed);

    train(&args.artifact_dir, config, &train_manifest, &test_manifest)?;

    Ok(())
}
