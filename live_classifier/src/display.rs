//! Viewer showing the annotated frames and collecting key presses.
//!
//! The viewer window is a browser page served over HTTP, see [`crate::endpoints`].
//! Frames are JPEG encoded and broadcast to every open page. Key presses arrive
//! from the page and from the terminal.
use std::{
    io::BufRead,
    sync::{mpsc, Arc},
    thread,
    time::Duration,
};

use anyhow::{bail, Result};
use bytes::Bytes;
use image::{codecs::jpeg::JpegEncoder, ColorType, RgbImage};
use tokio::sync::broadcast;

use crate::as_jpeg_stream_item;

const FRAMES_CHANNEL_CAPACITY: usize = 4;
const JPEG_QUALITY: u8 = 90;

/// Window presenting frames to the user.
pub trait Display {
    fn show(&mut self, frame: &RgbImage) -> Result<()>;

    /// Wait up to `timeout` for a key press.
    fn poll_key(&mut self, timeout: Duration) -> Option<char>;

    fn close(&mut self);
}

impl<T: Display + ?Sized> Display for Box<T> {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        (**self).show(frame)
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<char> {
        (**self).poll_key(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// State shared between the viewer endpoints and the display.
pub struct ViewerState {
    pub window_name: String,
    frames_tx: broadcast::Sender<Bytes>,
    keys_tx: mpsc::Sender<char>,
}

impl ViewerState {
    /// Subscribe to the encoded frame stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Bytes> {
        self.frames_tx.subscribe()
    }

    /// Forward a key press to the live loop. Returns false once the display is gone.
    pub fn press_key(&self, key: char) -> bool {
        log::debug!("Key {:?} pressed", key);
        self.keys_tx.send(key).is_ok()
    }
}

/// Display streaming MJPEG to browser pages.
pub struct StreamDisplay {
    state: Arc<ViewerState>,
    keys_rx: mpsc::Receiver<char>,
    closed: bool,
}

impl StreamDisplay {
    pub fn new(window_name: &str) -> Self {
        let (frames_tx, _) = broadcast::channel(FRAMES_CHANNEL_CAPACITY);
        let (keys_tx, keys_rx) = mpsc::channel();
        let state = Arc::new(ViewerState {
            window_name: window_name.to_owned(),
            frames_tx,
            keys_tx,
        });

        Self {
            state,
            keys_rx,
            closed: false,
        }
    }

    pub fn viewer_state(&self) -> Arc<ViewerState> {
        self.state.clone()
    }
}

impl Display for StreamDisplay {
    fn show(&mut self, frame: &RgbImage) -> Result<()> {
        if self.closed {
            bail!("window {} is closed", self.state.window_name);
        }

        let mut buf = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut buf, JPEG_QUALITY);
        encoder.encode(frame.as_raw(), frame.width(), frame.height(), ColorType::Rgb8)?;
        log::debug!("Showing frame ({} bytes)", buf.len());

        // Nobody watching is fine
        self.state.frames_tx.send(as_jpeg_stream_item(&buf)).ok();
        Ok(())
    }

    fn poll_key(&mut self, timeout: Duration) -> Option<char> {
        self.keys_rx.recv_timeout(timeout).ok()
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            log::info!("Closed window {}", self.state.window_name);
        }
    }
}

/// Forward the first character of every line typed into the terminal as a key press.
pub fn spawn_stdin_keys(state: Arc<ViewerState>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(key) = line.trim().chars().next() {
                if !state.press_key(key) {
                    break;
                }
            }
        }
    })
}
