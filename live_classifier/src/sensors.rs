//! Sensors module.
//!
use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use image::{ImageFormat, RgbImage};
use rscam::Config;
use simple_error::simple_error;

/// Source of frames for the live loop.
pub trait Camera {
    /// Capture the next frame. `None` when the device yields no usable frame.
    fn capture(&mut self) -> Result<Option<RgbImage>>;

    /// Release the underlying device.
    fn release(&mut self);
}

impl<T: Camera + ?Sized> Camera for Box<T> {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        (**self).capture()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// Device path of the camera with the given index.
pub fn device_name(index: u32) -> String {
    format!("/dev/video{index}")
}

/// Parse a resolution given as `WIDTHxHEIGHT`.
pub fn parse_resolution(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {s:?}"))?;
    let width: u32 = width.trim().parse().map_err(|e| format!("width: {e}"))?;
    let height: u32 = height.trim().parse().map_err(|e| format!("height: {e}"))?;
    if width == 0 || height == 0 {
        return Err(format!("resolution must be non-zero, got {s:?}"));
    }
    Ok((width, height))
}

/// Replays the images of a directory in sorted order, starting over at the end.
pub struct FrameDirCamera {
    frames: Vec<PathBuf>,
    next: usize,
}

impl FrameDirCamera {
    pub fn new(dir: &Path) -> Result<Self> {
        let mut frames = Vec::new();
        let entries =
            fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && ImageFormat::from_path(&path).is_ok() {
                frames.push(path);
            }
        }
        if frames.is_empty() {
            bail!("no frames found in {}", dir.display());
        }
        frames.sort();

        log::info!("Replaying {} frames from {}", frames.len(), dir.display());
        Ok(Self { frames, next: 0 })
    }
}

impl Camera for FrameDirCamera {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        let path = &self.frames[self.next];
        self.next = (self.next + 1) % self.frames.len();

        match image::open(path) {
            Ok(image) => Ok(Some(image.to_rgb8())),
            Err(err) => {
                log::warn!("Failed to read frame {}: {}", path.display(), err);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        log::debug!("Frame directory released");
    }
}

const FORMAT: &str = "MJPG";

/// V4L2 capture device delivering MJPG frames.
pub struct V4lCamera {
    cam: rscam::Camera,
    device_name: String,
    streaming: bool,
}

impl V4lCamera {
    /// Open a video device, defaulting to its highest resolution and frame rate.
    pub fn open(
        device_name: &str,
        resolution: Option<(u32, u32)>,
        frame_rate: Option<(u32, u32)>,
    ) -> Result<Self> {
        let mut cam = rscam::Camera::new(device_name)?;
        log_supported_formats(&cam, FORMAT);
        let format = FORMAT.as_bytes();

        log::info!("Using camera {}", device_name);

        let resolution = resolution
            .map(Ok)
            .unwrap_or_else(|| get_max_resolution(&cam, format))?;

        let frame_rate = frame_rate
            .map(Ok)
            .unwrap_or_else(|| get_max_frame_rate(&cam, format, resolution))?;

        log::info!(
            "Capturing {}x{} at {}/{} s",
            resolution.0,
            resolution.1,
            frame_rate.0,
            frame_rate.1
        );
        cam.start(&Config {
            interval: frame_rate,
            resolution,
            format,
            ..Default::default()
        })?;

        Ok(Self {
            cam,
            device_name: device_name.to_owned(),
            streaming: true,
        })
    }
}

impl Camera for V4lCamera {
    fn capture(&mut self) -> Result<Option<RgbImage>> {
        let frame = match self.cam.capture() {
            Ok(frame) => frame,
            Err(err) => {
                log::error!("Error capturing frame: {}", err);
                return Ok(None);
            }
        };

        match image::load_from_memory_with_format(&frame[..], ImageFormat::Jpeg) {
            Ok(image) => Ok(Some(image.to_rgb8())),
            Err(err) => {
                log::warn!("Failed to decode frame ({} bytes): {}", frame.len(), err);
                Ok(None)
            }
        }
    }

    fn release(&mut self) {
        if !self.streaming {
            return;
        }
        self.streaming = false;
        match self.cam.stop() {
            Ok(()) => log::info!("Released camera {}", self.device_name),
            Err(err) => log::error!("Failed to stop camera {}: {}", self.device_name, err),
        }
    }
}

/// Get the maximum supported resolution for the given format.
fn get_max_resolution(cam: &rscam::Camera, format: &[u8]) -> Result<(u32, u32)> {
    let resolution_info = cam.resolutions(format)?;
    log::debug!("Found resolutions: {:?}", &resolution_info);
    match resolution_info {
        rscam::ResolutionInfo::Discretes(resolutions) => resolutions
            .iter()
            .max_by_key(|res| res.0 * res.1)
            .copied(),
        rscam::ResolutionInfo::Stepwise { max, .. } => Some(max),
    }
    .ok_or_else(|| simple_error!("No resolution found").into())
}

/// Get the maximum supported frame rate for the given format and resolution.
fn get_max_frame_rate(
    cam: &rscam::Camera,
    format: &[u8],
    resolution: (u32, u32),
) -> Result<(u32, u32)> {
    let interval_info = cam.intervals(format, resolution)?;
    log::debug!("Found frame rates: {:?}", &interval_info);
    match interval_info {
        // Intervals are seconds per frame, the shortest one is the highest rate
        rscam::IntervalInfo::Discretes(intervals) => intervals
            .iter()
            .filter(|(numerator, _)| *numerator > 0)
            .max_by_key(|(numerator, denominator)| denominator / numerator)
            .copied(),
        rscam::IntervalInfo::Stepwise { min, .. } => Some(min),
    }
    .ok_or_else(|| simple_error!("No frame rate found").into())
}

fn log_supported_formats(cam: &rscam::Camera, format: &str) {
    let formats: Vec<_> = cam.formats().filter_map(|fmt| fmt.ok()).collect();
    log::debug!(
        "Supported formats: {:?}, using format {:?}",
        formats,
        format
    );
}

#[cfg(test)]
mod test {

    use super::*;
    use image::Rgb;

    #[test]
    fn get_cam_info_if_available() -> Result<()> {
        let cam_name = device_name(0);
        match rscam::Camera::new(&cam_name) {
            Err(err) => println!("Could not initialize camera (maybe non available): {err}"),
            Ok(cam) => {
                let format = FORMAT.as_bytes();
                let resolution = get_max_resolution(&cam, format)?;
                let frame_rate = get_max_frame_rate(&cam, format, resolution)?;
                println!("Selected {resolution:?} at {frame_rate:?}");
            }
        }

        Ok(())
    }

    #[test]
    fn test_open_missing_device_fails() {
        let result = V4lCamera::open("/dev/video-does-not-exist", None, None);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_resolution() {
        assert_eq!(parse_resolution("1280x720"), Ok((1280, 720)));
        assert_eq!(parse_resolution("640X480"), Ok((640, 480)));
        assert!(parse_resolution("1280").is_err());
        assert!(parse_resolution("0x720").is_err());
        assert!(parse_resolution("axb").is_err());
    }

    #[test]
    fn test_device_name() {
        assert_eq!(device_name(0), "/dev/video0");
        assert_eq!(device_name(2), "/dev/video2");
    }

    #[test]
    fn test_frame_dir_replays_sorted_and_loops() {
        let dir = tempfile::tempdir().unwrap();
        RgbImage::from_pixel(4, 4, Rgb([2, 2, 2]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(4, 4, Rgb([1, 1, 1]))
            .save(dir.path().join("a.png"))
            .unwrap();
        fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut camera = FrameDirCamera::new(dir.path()).unwrap();

        let values: Vec<u8> = (0..3)
            .map(|_| camera.capture().unwrap().unwrap()[(0, 0)][0])
            .collect();
        assert_eq!(values, vec![1, 2, 1]);
    }

    #[test]
    fn test_frame_dir_skips_unreadable_frame() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.png"), b"not a png").unwrap();

        let mut camera = FrameDirCamera::new(dir.path()).unwrap();
        assert!(camera.capture().unwrap().is_none());
    }

    #[test]
    fn test_frame_dir_without_frames() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FrameDirCamera::new(dir.path()).is_err());
        assert!(FrameDirCamera::new(&dir.path().join("missing")).is_err());
    }
}
