//! Image augmentation applied while loading training batches.
//!
use std::sync::{Arc, Mutex};

use common::{CHANNELS, INPUT_SIZE};
use image::{
    imageops::{self, FilterType},
    Rgb, RgbImage,
};
use imageproc::geometric_transformations::{warp_with, Interpolation, Projection};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// Parameters of the random transformations.
#[derive(Clone, Debug, PartialEq)]
pub struct AugmentConfig {
    /// Factor every pixel value is multiplied with.
    pub rescale: f32,
    /// Maximum shear angle in degrees, counter-clockwise.
    pub shear_range: f32,
    /// Zoom factors are drawn from `[1 - zoom_range, 1 + zoom_range]`.
    pub zoom_range: f32,
    pub horizontal_flip: bool,
}

impl AugmentConfig {
    pub fn training() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            shear_range: 0.2,
            zoom_range: 0.2,
            horizontal_flip: true,
        }
    }

    pub fn validation() -> Self {
        Self {
            rescale: 1.0 / 255.0,
            shear_range: 0.0,
            zoom_range: 0.0,
            horizontal_flip: false,
        }
    }

    fn is_geometric(&self) -> bool {
        self.shear_range > 0.0 || self.zoom_range > 0.0
    }
}

/// Resizes, randomly transforms and rescales images.
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentConfig,
    target_size: u32,
    rng: Arc<Mutex<StdRng>>,
}

impl Augmenter {
    pub fn new(config: AugmentConfig, target_size: u32, seed: u64) -> Self {
        Self {
            config,
            target_size,
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
        }
    }

    pub fn training(seed: u64) -> Self {
        Self::new(AugmentConfig::training(), INPUT_SIZE as u32, seed)
    }

    pub fn validation() -> Self {
        Self::new(AugmentConfig::validation(), INPUT_SIZE as u32, 0)
    }

    /// Produce the network input for one image as CHW floats.
    pub fn apply(&self, image: &RgbImage) -> Vec<f32> {
        let resized = imageops::resize(
            image,
            self.target_size,
            self.target_size,
            FilterType::Triangle,
        );
        let transformed = self.transform(resized);
        to_chw(&transformed, self.config.rescale)
    }

    fn transform(&self, image: RgbImage) -> RgbImage {
        let (shear, zoom_x, zoom_y, flip) = {
            let mut rng = self.rng.lock().unwrap_or_else(|err| err.into_inner());
            let shear = match self.config.shear_range {
                range if range > 0.0 => rng.gen_range(-range..=range).to_radians(),
                _ => 0.0,
            };
            let (zoom_x, zoom_y) = match self.config.zoom_range {
                range if range > 0.0 => (
                    rng.gen_range(1.0 - range..=1.0 + range),
                    rng.gen_range(1.0 - range..=1.0 + range),
                ),
                _ => (1.0, 1.0),
            };
            let flip = self.config.horizontal_flip && rng.gen_bool(0.5);
            (shear, zoom_x, zoom_y, flip)
        };

        let mut image = image;
        if self.config.is_geometric() {
            if let Some(projection) = affine_around_center(&image, shear, zoom_x, zoom_y) {
                image = warp_nearest_fill(&image, projection);
            }
        }
        if flip {
            imageops::flip_horizontal_in_place(&mut image);
        }

        image
    }
}

/// Shear and zoom around the image center.
fn affine_around_center(
    image: &RgbImage,
    shear: f32,
    zoom_x: f32,
    zoom_y: f32,
) -> Option<Projection> {
    let (width, height) = image.dimensions();
    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);

    #[rustfmt::skip]
    let shear = Projection::from_matrix([
        1.0, -shear.sin(), 0.0,
        0.0,  shear.cos(), 0.0,
        0.0,  0.0,         1.0,
    ])?;

    Some(
        Projection::translate(cx, cy)
            * shear
            * Projection::scale(zoom_x, zoom_y)
            * Projection::translate(-cx, -cy),
    )
}

/// Warp with out-of-frame pixels taking the value of the nearest edge pixel.
fn warp_nearest_fill(image: &RgbImage, projection: Projection) -> RgbImage {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return image.clone();
    }
    // Bilinear sampling needs the right and bottom neighbours inside the image
    let max_x = (width - 1) as f32 - 1e-3;
    let max_y = (height - 1) as f32 - 1e-3;
    let inverse = projection.invert();

    warp_with(
        image,
        move |x, y| {
            let (src_x, src_y) = inverse * (x, y);
            (src_x.clamp(0.0, max_x), src_y.clamp(0.0, max_y))
        },
        Interpolation::Bilinear,
        Rgb([0, 0, 0]),
    )
}

/// Flatten an RGB image into channel-major floats multiplied by `rescale`.
pub fn to_chw(image: &RgbImage, rescale: f32) -> Vec<f32> {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(CHANNELS * (width * height) as usize);

    for channel in 0..CHANNELS {
        for y in 0..height {
            for x in 0..width {
                data.push(image.get_pixel(x, y)[channel] as f32 * rescale);
            }
        }
    }

    data
}

#[cfg(test)]
mod test {

    use super::*;

    const LEN: usize = CHANNELS * INPUT_SIZE * INPUT_SIZE;

    #[test]
    fn test_validation_only_rescales() {
        let image = RgbImage::from_pixel(100, 80, Rgb([255, 51, 0]));
        let data = Augmenter::validation().apply(&image);

        assert_eq!(data.len(), LEN);
        let plane = INPUT_SIZE * INPUT_SIZE;
        assert!(data[..plane].iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(data[plane..2 * plane].iter().all(|v| (*v - 0.2).abs() < 1e-6));
        assert!(data[2 * plane..].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_training_output_is_rescaled() {
        let image = RgbImage::from_fn(120, 90, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 200])
        });
        let data = Augmenter::training(7).apply(&image);

        assert_eq!(data.len(), LEN);
        assert!(data.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_training_is_reproducible_per_seed() {
        let image = RgbImage::from_fn(64, 64, |x, y| Rgb([(x * 4) as u8, (y * 4) as u8, 0]));

        let first = Augmenter::training(3).apply(&image);
        let second = Augmenter::training(3).apply(&image);
        assert_eq!(first, second);
    }

    #[test]
    fn test_zoom_out_fills_from_edges() {
        let image = RgbImage::from_pixel(64, 64, Rgb([200, 100, 50]));
        let projection = affine_around_center(&image, 0.2_f32.to_radians(), 0.8, 0.8).unwrap();

        let warped = warp_nearest_fill(&image, projection);

        assert_eq!(warped.dimensions(), (64, 64));
        // No black borders, only rounding differences from the source color
        assert!(warped
            .pixels()
            .all(|p| p.0.iter().zip([200, 100, 50]).all(|(v, e)| v.abs_diff(e) <= 1)));
    }

    #[test]
    fn test_edge_fill_repeats_border_column() {
        let image = RgbImage::from_fn(64, 64, |x, _| {
            if x == 0 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        });
        let projection = affine_around_center(&image, 0.0, 0.5, 1.0).unwrap();

        let warped = warp_nearest_fill(&image, projection);

        // Left of the shrunk image only the red border column is sampled
        assert_eq!(warped[(0, 32)], Rgb([255, 0, 0]));
        assert_eq!(warped[(63, 32)][0], 0);
        assert!(warped[(63, 32)][2] >= 254);
    }

    #[test]
    fn test_to_chw_layout() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([1, 2, 3]));
        image.put_pixel(1, 0, Rgb([4, 5, 6]));

        assert_eq!(to_chw(&image, 1.0), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}
