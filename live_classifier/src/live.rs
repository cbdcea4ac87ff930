//! The live classification loop.
//!
//! [`LiveContext`] owns the camera, the classifier and the display for the
//! lifetime of one run. Every iteration captures a frame, classifies it, draws
//! the label onto the frame, shows it and polls the keyboard. The quit key is
//! the only way to stop the loop; errors end it early. The camera is released
//! exactly once on every exit path, including drops during unwinding.
use std::time::Duration;

use anyhow::Result;
use common::Label;
use image::RgbImage;
use tokio::sync::watch;

use crate::{
    annotate::{draw_label, LABEL_POSITION},
    display::Display,
    nn::{validate_score, Classifier},
    preproc::preprocess,
    sensors::Camera,
};

/// Parameters of the live loop.
#[derive(Clone, Debug)]
pub struct LiveConfig {
    pub quit_key: char,
    /// How long every iteration waits for a key press.
    pub key_timeout: Duration,
    pub label_position: (i32, i32),
    /// Label shown for frames that cannot be preprocessed.
    pub fallback_label: Label,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            quit_key: 'q',
            key_timeout: Duration::from_millis(1),
            label_position: LABEL_POSITION,
            fallback_label: Label::Unknown,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopped,
}

/// Summary of a finished run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopReport {
    pub iterations: usize,
    pub missing_frames: usize,
    pub real: usize,
    pub fake: usize,
    pub unknown: usize,
}

impl LoopReport {
    /// Frames that got a label, including the fallback label.
    pub fn classified(&self) -> usize {
        self.real + self.fake + self.unknown
    }

    fn count(&mut self, label: Label) {
        match label {
            Label::Real => self.real += 1,
            Label::Fake => self.fake += 1,
            Label::Unknown => self.unknown += 1,
        }
    }
}

/// Resources of one live run.
pub struct LiveContext<C: Camera, M: Classifier, D: Display> {
    camera: Option<C>,
    classifier: M,
    display: D,
    config: LiveConfig,
    state: LoopState,
    progress: Option<watch::Sender<LoopReport>>,
}

impl<C: Camera, M: Classifier, D: Display> LiveContext<C, M, D> {
    pub fn new(camera: C, classifier: M, display: D, config: LiveConfig) -> Self {
        Self {
            camera: Some(camera),
            classifier,
            display,
            config,
            state: LoopState::Running,
            progress: None,
        }
    }

    /// Publish the running report after every iteration.
    pub fn with_progress(mut self, progress: watch::Sender<LoopReport>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Classify one frame.
    ///
    /// Frames that cannot be preprocessed get the fallback label, classifier
    /// faults are returned as errors.
    pub fn detect(&self, frame: &RgbImage) -> Result<Label> {
        let input = match preprocess(frame) {
            Ok(input) => input,
            Err(err) => {
                log::warn!("Skipping classification: {}", err);
                return Ok(self.config.fallback_label);
            }
        };

        let score = validate_score(self.classifier.predict(&input)?)?;
        let label = Label::from_score(score);
        log::debug!("Score {:.3} -> {}", score, label);

        Ok(label)
    }

    /// Run until the quit key is pressed, then release the camera and close the display.
    pub fn run(mut self) -> Result<LoopReport> {
        let mut report = LoopReport::default();
        let result = self.run_loop(&mut report);
        self.release();

        match result {
            Ok(()) => {
                log::info!("Stopped after {} iterations", report.iterations);
                Ok(report)
            }
            Err(err) => {
                log::error!("Live loop failed after {} iterations", report.iterations);
                Err(err)
            }
        }
    }

    fn run_loop(&mut self, report: &mut LoopReport) -> Result<()> {
        while self.state == LoopState::Running {
            report.iterations += 1;
            self.step(report)?;
            if let Some(progress) = &self.progress {
                progress.send_replace(report.clone());
            }
        }
        Ok(())
    }

    fn step(&mut self, report: &mut LoopReport) -> Result<()> {
        let frame = match self.camera.as_mut() {
            Some(camera) => camera.capture()?,
            None => None,
        };

        match frame {
            Some(mut frame) => {
                let label = self.detect(&frame)?;
                report.count(label);

                draw_label(&mut frame, label, self.config.label_position);
                self.display.show(&frame)?;
            }
            None => {
                log::warn!("No frame captured");
                report.missing_frames += 1;
            }
        }

        if self.display.poll_key(self.config.key_timeout) == Some(self.config.quit_key) {
            log::info!("Quit key pressed");
            self.state = LoopState::Stopped;
        }

        Ok(())
    }

    fn release(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            camera.release();
            self.display.close();
        }
    }
}

impl<C: Camera, M: Classifier, D: Display> Drop for LiveContext<C, M, D> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod test {

    use std::{
        cell::{Cell, RefCell},
        collections::VecDeque,
        rc::Rc,
    };

    use super::*;
    use anyhow::bail;
    use image::Rgb;
    use ndarray::Array4;

    #[derive(Clone, Default)]
    struct Counters {
        captures: Rc<Cell<usize>>,
        releases: Rc<Cell<usize>>,
        shown: Rc<RefCell<Vec<RgbImage>>>,
        closes: Rc<Cell<usize>>,
    }

    struct FakeCamera {
        frames: VecDeque<Option<RgbImage>>,
        counters: Counters,
    }

    impl Camera for FakeCamera {
        fn capture(&mut self) -> Result<Option<RgbImage>> {
            self.counters.captures.set(self.counters.captures.get() + 1);
            Ok(self
                .frames
                .pop_front()
                .unwrap_or_else(|| Some(RgbImage::new(640, 480))))
        }

        fn release(&mut self) {
            self.counters.releases.set(self.counters.releases.get() + 1);
        }
    }

    struct FixedScore(f32);

    impl Classifier for FixedScore {
        fn predict(&self, input: &Array4<f32>) -> Result<f32> {
            assert_eq!(input.shape(), &[1, 64, 64, 3]);
            Ok(self.0)
        }
    }

    struct FakeDisplay {
        keys: VecDeque<char>,
        counters: Counters,
    }

    impl Display for FakeDisplay {
        fn show(&mut self, frame: &RgbImage) -> Result<()> {
            self.counters.shown.borrow_mut().push(frame.clone());
            Ok(())
        }

        fn poll_key(&mut self, _timeout: Duration) -> Option<char> {
            self.keys.pop_front()
        }

        fn close(&mut self) {
            self.counters.closes.set(self.counters.closes.get() + 1);
        }
    }

    fn context<M: Classifier>(
        frames: Vec<Option<RgbImage>>,
        classifier: M,
        keys: &str,
    ) -> (LiveContext<FakeCamera, M, FakeDisplay>, Counters) {
        let counters = Counters::default();
        let camera = FakeCamera {
            frames: frames.into(),
            counters: counters.clone(),
        };
        let display = FakeDisplay {
            keys: keys.chars().collect(),
            counters: counters.clone(),
        };
        let context = LiveContext::new(camera, classifier, display, LiveConfig::default());
        (context, counters)
    }

    #[test]
    fn test_default_config() {
        let config = LiveConfig::default();

        assert_eq!(config.quit_key, 'q');
        assert_eq!(config.key_timeout, Duration::from_millis(1));
        assert_eq!(config.label_position, (450, 30));
        assert_eq!(config.fallback_label, Label::Unknown);
    }

    #[test]
    fn test_detect_thresholds_score() {
        let frame = RgbImage::new(100, 100);

        let (low, _) = context(vec![], FixedScore(0.2), "");
        assert_eq!(low.detect(&frame).unwrap(), Label::Fake);

        let (boundary, _) = context(vec![], FixedScore(0.5), "");
        assert_eq!(boundary.detect(&frame).unwrap(), Label::Real);
        assert_eq!(boundary.detect(&frame).unwrap(), Label::Real);
    }

    #[test]
    fn test_detect_falls_back_on_invalid_frame() {
        let (context, _) = context(vec![], FixedScore(0.9), "");
        assert_eq!(
            context.detect(&RgbImage::new(0, 0)).unwrap(),
            Label::Unknown
        );
    }

    #[test]
    fn test_detect_rejects_invalid_score() {
        let (context, _) = context(vec![], FixedScore(2.0), "");
        assert!(context.detect(&RgbImage::new(10, 10)).is_err());
    }

    #[test]
    fn test_quit_key_stops_loop() {
        let (context, counters) = context(vec![], FixedScore(0.8), "ab q");
        assert_eq!(context.state(), LoopState::Running);

        let report = context.run().unwrap();

        assert_eq!(report.iterations, 4);
        assert_eq!(report.real, 4);
        assert_eq!(counters.captures.get(), 4);
        assert_eq!(counters.shown.borrow().len(), 4);
        assert_eq!(counters.releases.get(), 1);
        assert_eq!(counters.closes.get(), 1);
    }

    #[test]
    fn test_quit_on_first_iteration() {
        let (context, counters) = context(vec![], FixedScore(0.1), "q");

        let report = context.run().unwrap();

        assert_eq!(report.iterations, 1);
        assert_eq!(report.fake, 1);
        assert_eq!(counters.releases.get(), 1);
    }

    #[test]
    fn test_missing_frame_skips_to_key_polling() {
        let frames = vec![Some(RgbImage::new(640, 480)), None, Some(RgbImage::new(0, 0))];
        let (context, counters) = context(frames, FixedScore(0.3), "--q");

        let report = context.run().unwrap();

        assert_eq!(
            report,
            LoopReport {
                iterations: 3,
                missing_frames: 1,
                real: 0,
                fake: 1,
                unknown: 1,
            }
        );
        assert_eq!(counters.shown.borrow().len(), 2);
        assert_eq!(counters.releases.get(), 1);
    }

    #[test]
    fn test_progress_follows_report() {
        let frames = vec![None, Some(RgbImage::new(640, 480))];
        let (context, _) = context(frames, FixedScore(0.2), "-q");
        let (tx, rx) = watch::channel(LoopReport::default());

        let report = context.with_progress(tx).run().unwrap();

        assert_eq!(*rx.borrow(), report);
        assert_eq!(report.classified(), 1);
        // The sender goes away with the context
        assert!(rx.has_changed().is_err());
    }

    #[test]
    fn test_label_drawn_on_original_frame() {
        let frame = RgbImage::from_pixel(640, 480, Rgb([0, 0, 0]));
        let (context, counters) = context(vec![Some(frame.clone())], FixedScore(0.9), "q");

        context.run().unwrap();

        let shown = counters.shown.borrow();
        assert_eq!(shown[0].dimensions(), (640, 480));
        assert_ne!(shown[0], frame);
    }

    struct FailingAfter {
        calls: Cell<usize>,
        limit: usize,
    }

    impl Classifier for FailingAfter {
        fn predict(&self, _input: &Array4<f32>) -> Result<f32> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() > self.limit {
                bail!("inference fault");
            }
            Ok(0.7)
        }
    }

    #[test]
    fn test_error_releases_camera_once() {
        let classifier = FailingAfter {
            calls: Cell::new(0),
            limit: 2,
        };
        let (context, counters) = context(vec![], classifier, "");

        let err = context.run().unwrap_err();

        assert!(err.to_string().contains("inference fault"));
        assert_eq!(counters.captures.get(), 3);
        assert_eq!(counters.shown.borrow().len(), 2);
        assert_eq!(counters.releases.get(), 1);
        assert_eq!(counters.closes.get(), 1);
    }

    #[test]
    fn test_drop_releases_camera_once() {
        let (context, counters) = context(vec![], FixedScore(0.5), "");
        drop(context);

        assert_eq!(counters.releases.get(), 1);
        assert_eq!(counters.closes.get(), 1);
    }
}
