//! Frame preprocessing for the classifier.
//!
use common::{CHANNELS, INPUT_SIZE};
use image::{imageops, RgbImage};
use ndarray::Array4;
use thiserror::Error;

/// A frame that cannot be turned into a classifier input.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PreprocError {
    #[error("invalid frame shape {width}x{height} ({len} bytes)")]
    InvalidFrameShape { width: u32, height: u32, len: usize },
}

/// Wrap raw RGB bytes into a frame, checking the buffer matches the dimensions.
pub fn frame_from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<RgbImage, PreprocError> {
    let len = data.len();
    match (width, height) {
        (0, _) | (_, 0) => None,
        _ => RgbImage::from_raw(width, height, data),
    }
    .filter(|frame| frame.len() == len)
    .ok_or(PreprocError::InvalidFrameShape { width, height, len })
}

/// Resize a frame to the classifier input size and add the batch dimension.
///
/// The result has shape `1×64×64×3`. Pixel values are divided by 255 unless the
/// frame is already normalized, see [`rescale_if_unnormalized`].
pub fn preprocess(frame: &RgbImage) -> Result<Array4<f32>, PreprocError> {
    let (width, height) = frame.dimensions();
    if width == 0 || height == 0 {
        return Err(PreprocError::InvalidFrameShape {
            width,
            height,
            len: frame.len(),
        });
    }

    let size = INPUT_SIZE as u32;
    let resized = imageops::resize(frame, size, size, imageops::FilterType::Triangle);

    let mut tensor = Array4::from_shape_fn((1, INPUT_SIZE, INPUT_SIZE, CHANNELS), |(_, y, x, c)| {
        resized[(x as _, y as _)][c] as f32
    });
    rescale_if_unnormalized(&mut tensor);

    Ok(tensor)
}

/// Divide by 255 only when the maximum value shows un-normalized input.
///
/// Returns whether the tensor was rescaled.
pub fn rescale_if_unnormalized(tensor: &mut Array4<f32>) -> bool {
    let max = tensor.iter().cloned().fold(f32::MIN, f32::max);
    if max > 1.0 {
        tensor.mapv_inplace(|v| v / 255.0);
        true
    } else {
        false
    }
}
