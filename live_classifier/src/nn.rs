//! Classifiers scoring preprocessed frames.
//!
use std::path::Path;

use anyhow::{bail, Context, Result};
use burn::{backend::ndarray::NdArrayDevice, tensor::Tensor as BurnTensor};
use common::{CHANNELS, INPUT_SIZE};
use ndarray::Array4;
use tract_onnx::prelude::*;
use trainer::{model::RealFakeNet, training::load_model, CpuBackend};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Binary classifier producing the probability that a frame is real.
pub trait Classifier {
    /// Score a `1×64×64×3` tensor.
    fn predict(&self, input: &Array4<f32>) -> Result<f32>;
}

impl<T: Classifier + ?Sized> Classifier for Box<T> {
    fn predict(&self, input: &Array4<f32>) -> Result<f32> {
        (**self).predict(input)
    }
}

/// Reject scores that are not a probability.
pub fn validate_score(score: f32) -> Result<f32> {
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        bail!("classifier returned invalid score {score}");
    }
    Ok(score)
}

/// Load a classifier, `.onnx` files run with tract, `.mpk` records written by the trainer
/// run with burn.
pub fn load_classifier(path: &Path) -> Result<Box<dyn Classifier + Send>> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    match extension.as_deref() {
        Some("onnx") => Ok(Box::new(OnnxClassifier::new(path)?)),
        Some("mpk") => Ok(Box::new(BurnClassifier::new(path)?)),
        _ => bail!(
            "unsupported model file {}, expected .onnx or .mpk",
            path.display()
        ),
    }
}

/// ONNX export of the classifier taking NHWC input.
pub struct OnnxClassifier {
    model: NnModel,
}

impl OnnxClassifier {
    pub fn new(path: &Path) -> Result<Self> {
        let input_fact = InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, INPUT_SIZE, INPUT_SIZE, CHANNELS),
        );
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("failed to load {}", path.display()))?
            .with_input_fact(0, input_fact)?
            .into_optimized()?
            .into_runnable()?;

        log::info!("Loaded ONNX classifier {}", path.display());
        Ok(Self { model })
    }
}

impl Classifier for OnnxClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<f32> {
        let data: Vec<f32> = input.iter().copied().collect();
        let tensor = Tensor::from_shape(input.shape(), &data)?;

        let raw_nn_out = self.model.run(tvec!(tensor.into()))?;
        let output = raw_nn_out
            .first()
            .context("classifier returned no output")?
            .to_array_view::<f32>()?;

        output
            .iter()
            .next()
            .copied()
            .context("classifier returned an empty output")
    }
}

/// Model trained and persisted by the trainer.
pub struct BurnClassifier {
    model: RealFakeNet<CpuBackend>,
    device: NdArrayDevice,
}

impl BurnClassifier {
    pub fn new(path: &Path) -> Result<Self> {
        let device = NdArrayDevice::Cpu;
        let model = load_model::<CpuBackend>(path, &device)?;

        log::info!("Loaded trained classifier {}", path.display());
        Ok(Self::from_model(model, device))
    }

    pub fn from_model(model: RealFakeNet<CpuBackend>, device: NdArrayDevice) -> Self {
        Self { model, device }
    }
}

impl Classifier for BurnClassifier {
    fn predict(&self, input: &Array4<f32>) -> Result<f32> {
        let shape = input.shape();
        let dims = [shape[0], shape[1], shape[2], shape[3]];
        let data: Vec<f32> = input.iter().copied().collect();

        // NHWC -> NCHW
        let images = BurnTensor::<CpuBackend, 1>::from_floats(data.as_slice(), &self.device)
            .reshape(dims)
            .permute([0, 3, 1, 2]);

        let scores = self
            .model
            .forward(images)
            .into_data()
            .to_vec::<f32>()
            .map_err(|err| anyhow::anyhow!("failed to read classifier output: {:?}", err))?;

        scores
            .first()
            .copied()
            .context("classifier returned an empty output")
    }
}
