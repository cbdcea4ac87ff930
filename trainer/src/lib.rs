//! Training of the binary real/fake face classifier.
//!
pub mod augment;
pub mod data;
pub mod manifest;
pub mod model;
pub mod training;

/// Backend used for training and for loading trained records on the CPU.
pub type CpuBackend = burn::backend::NdArray;

/// Autodiff-enabled variant of [`CpuBackend`].
pub type TrainBackend = burn::backend::Autodiff<CpuBackend>;
