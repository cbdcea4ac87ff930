//! Convolutional network telling real faces from spoofed ones.
//!
//! # Architecture
//! - Conv 3x3, 32 filters (no padding, stride 1) + ReLU
//! - Max pooling 2x2
//! - Flatten
//! - FC: d -> 128 + ReLU
//! - FC: 128 -> 1 + sigmoid
use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        loss::BinaryCrossEntropyLossConfig,
        pool::{MaxPool2d, MaxPool2dConfig},
        Initializer, Linear, LinearConfig, Relu,
    },
    tensor::{activation::sigmoid, backend::Backend, Int, Tensor},
    train::ClassificationOutput,
};

/// Model configuration.
#[derive(Config, Debug)]
pub struct ModelConfig {
    /// Side length of the square input images.
    #[config(default = 64)]
    pub input_size: usize,
    #[config(default = 3)]
    pub channels: usize,
    /// Number of convolution filters.
    #[config(default = 32)]
    pub filters: usize,
    #[config(default = 3)]
    pub kernel_size: usize,
    #[config(default = 2)]
    pub pool_size: usize,
    #[config(default = 128)]
    pub hidden_units: usize,
    /// Dense weights are drawn from `[-init_range, init_range]`.
    #[config(default = 0.05)]
    pub init_range: f64,
}

impl ModelConfig {
    /// Side length of the feature maps after convolution and pooling.
    pub fn feature_map_size(&self) -> usize {
        let after_conv = self.input_size.saturating_sub(self.kernel_size - 1);
        after_conv / self.pool_size
    }

    /// Length of the flattened feature vector feeding the hidden layer.
    pub fn flattened_features(&self) -> usize {
        let size = self.feature_map_size();
        self.filters * size * size
    }

    /// Initialize a model with random weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> RealFakeNet<B> {
        let features = self.flattened_features();
        log::debug!(
            "Input {}x{}x{}, flattened features {}",
            self.input_size,
            self.input_size,
            self.channels,
            features
        );

        let uniform = Initializer::Uniform {
            min: -self.init_range,
            max: self.init_range,
        };

        RealFakeNet {
            conv: Conv2dConfig::new(
                [self.channels, self.filters],
                [self.kernel_size, self.kernel_size],
            )
            .init(device),
            pool: MaxPool2dConfig::new([self.pool_size, self.pool_size]).init(),
            hidden: LinearConfig::new(features, self.hidden_units)
                .with_initializer(uniform.clone())
                .init(device),
            output: LinearConfig::new(self.hidden_units, 1)
                .with_initializer(uniform)
                .init(device),
            activation: Relu::new(),
        }
    }
}

/// Binary image classifier.
#[derive(Module, Debug)]
pub struct RealFakeNet<B: Backend> {
    conv: Conv2d<B>,
    pool: MaxPool2d,
    hidden: Linear<B>,
    output: Linear<B>,
    activation: Relu,
}

impl<B: Backend> RealFakeNet<B> {
    /// Scores before the sigmoid.
    ///
    /// # Shapes
    /// - `images`: `[batch_size, channels, size, size]`
    /// - output: `[batch_size, 1]`
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, _, _, _] = images.dims();

        let x = self.conv.forward(images);
        let x = self.activation.forward(x);
        let x = self.pool.forward(x);

        let [_, c, h, w] = x.dims();
        let x = x.reshape([batch_size, c * h * w]);

        let x = self.hidden.forward(x);
        let x = self.activation.forward(x);

        self.output.forward(x)
    }

    /// Probability of the positive class, `[batch_size, 1]`.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        sigmoid(self.forward_logits(images))
    }

    /// Forward pass with binary cross-entropy loss.
    ///
    /// The output carries two columns, `[0, logit]`, so that argmax-based
    /// accuracy picks the positive class exactly when the probability exceeds 0.5.
    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let logits = self.forward_logits(images);
        let [batch_size, _] = logits.dims();

        let loss = BinaryCrossEntropyLossConfig::new()
            .with_logits(true)
            .init(&logits.device())
            .forward(logits.clone(), targets.clone().reshape([batch_size, 1]));

        let output = Tensor::cat(vec![logits.zeros_like(), logits], 1);

        ClassificationOutput::new(loss, output, targets)
    }
}
