//! Datasets and batching for training.
//!
use std::path::PathBuf;

use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    tensor::{backend::Backend, Int, Tensor},
};
use common::{CHANNELS, INPUT_SIZE};

use crate::{augment::Augmenter, manifest::Manifest};

/// Dataset item, holds only the image path.
#[derive(Clone, Debug)]
pub struct ImageItem {
    pub path: PathBuf,
    pub label: usize,
}

/// Dataset over the entries of a validated manifest.
pub struct ManifestDataset {
    items: Vec<ImageItem>,
}

impl ManifestDataset {
    pub fn new(manifest: &Manifest) -> Self {
        let items = manifest
            .entries()
            .iter()
            .map(|entry| ImageItem {
                path: entry.path.clone(),
                label: entry.label,
            })
            .collect();
        Self { items }
    }
}

impl Dataset<ImageItem> for ManifestDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Presents a fixed number of samples per epoch by cycling over the inner dataset.
pub struct EpochDataset<D> {
    inner: D,
    samples: usize,
}

impl<D> EpochDataset<D> {
    pub fn new(inner: D, samples: usize) -> Self {
        Self { inner, samples }
    }
}

impl<D, I> Dataset<I> for EpochDataset<D>
where
    D: Dataset<I>,
{
    fn get(&self, index: usize) -> Option<I> {
        let len = self.inner.len();
        if index >= self.samples || len == 0 {
            return None;
        }
        self.inner.get(index % len)
    }

    fn len(&self) -> usize {
        if self.inner.is_empty() {
            0
        } else {
            self.samples
        }
    }
}

/// Batch of images with their binary targets.
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// `[batch_size, 3, 64, 64]`
    pub images: Tensor<B, 4>,
    /// `[batch_size]`
    pub targets: Tensor<B, 1, Int>,
}

/// Loads, augments and stacks images.
#[derive(Clone, Debug)]
pub struct ImageBatcher {
    augmenter: Augmenter,
}

impl ImageBatcher {
    pub fn new(augmenter: Augmenter) -> Self {
        Self { augmenter }
    }

    fn load(&self, item: &ImageItem) -> Vec<f32> {
        match image::open(&item.path) {
            Ok(image) => self.augmenter.apply(&image.to_rgb8()),
            Err(err) => {
                log::error!("Failed to load image {}: {}", item.path.display(), err);
                vec![0.0; CHANNELS * INPUT_SIZE * INPUT_SIZE]
            }
        }
    }
}

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let mut pixels = Vec::with_capacity(batch_size * CHANNELS * INPUT_SIZE * INPUT_SIZE);
        let mut targets = Vec::with_capacity(batch_size);

        for item in items.iter() {
            pixels.extend(self.load(item));
            targets.push(item.label as i64);
        }

        let images = Tensor::<B, 1>::from_floats(pixels.as_slice(), device).reshape([
            batch_size,
            CHANNELS,
            INPUT_SIZE,
            INPUT_SIZE,
        ]);
        let targets = Tensor::<B, 1, Int>::from_ints(targets.as_slice(), device);

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod test {

    use super::*;
    use crate::{manifest::Manifest, CpuBackend};
    use image::{Rgb, RgbImage};

    struct Numbers(Vec<usize>);

    impl Dataset<usize> for Numbers {
        fn get(&self, index: usize) -> Option<usize> {
            self.0.get(index).copied()
        }

        fn len(&self) -> usize {
            self.0.len()
        }
    }

    #[test]
    fn test_epoch_dataset_cycles() {
        let dataset = EpochDataset::new(Numbers(vec![10, 20, 30]), 8);

        assert_eq!(dataset.len(), 8);
        assert_eq!(dataset.get(0), Some(10));
        assert_eq!(dataset.get(4), Some(20));
        assert_eq!(dataset.get(7), Some(20));
        assert_eq!(dataset.get(8), None);
    }

    #[test]
    fn test_epoch_dataset_over_empty_inner() {
        let dataset = EpochDataset::new(Numbers(vec![]), 8);

        assert_eq!(dataset.len(), 0);
        assert_eq!(dataset.get(0), None);
    }

    #[test]
    fn test_batcher_stacks_images() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real.png");
        let fake = dir.path().join("fake.png");
        RgbImage::from_pixel(80, 80, Rgb([255, 255, 255])).save(&real).unwrap();
        RgbImage::from_pixel(32, 48, Rgb([0, 0, 0])).save(&fake).unwrap();

        let manifest = Manifest::from_entries(vec![(real, "real"), (fake, "fake")]);
        let dataset = ManifestDataset::new(&manifest);
        let items: Vec<_> = (0..dataset.len()).filter_map(|i| dataset.get(i)).collect();

        let device = Default::default();
        let batcher = ImageBatcher::new(Augmenter::validation());
        let batch: ImageBatch<CpuBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 64, 64]);
        let targets = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);

        let pixels = batch.images.into_data().to_vec::<f32>().unwrap();
        let per_image = CHANNELS * INPUT_SIZE * INPUT_SIZE;
        assert!(pixels[..per_image].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(pixels[per_image..].iter().all(|v| *v == 0.0));
    }
}
