//! Label overlay on captured frames.
//!
use common::Label;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_text_mut;
use lazy_static::lazy_static;
use rusttype::Scale;

/// Top-left corner of the label text.
pub const LABEL_POSITION: (i32, i32) = (450, 30);

const LABEL_COLOR: Rgb<u8> = Rgb([255, 255, 0]);
const LABEL_SCALE: f32 = 32.0;

/// Draw the label onto the frame, text outside the frame is clipped.
pub fn draw_label(frame: &mut RgbImage, label: Label, position: (i32, i32)) {
    draw_text_mut(
        frame,
        LABEL_COLOR,
        position.0,
        position.1,
        Scale::uniform(LABEL_SCALE),
        &DEJAVU_MONO,
        label.as_str(),
    );
}

lazy_static! {
    static ref DEJAVU_MONO: rusttype::Font<'static> = {
        let font_data: &[u8] = include_bytes!("../resources/DejaVuSansMono.ttf");
        let font: rusttype::Font<'static> =
            rusttype::Font::try_from_bytes(font_data).expect("failed to load font");
        font
    };
}
