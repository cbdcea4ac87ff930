//! Live real/fake classification of camera frames.
//!
use bytes::Bytes;

pub mod annotate;
pub mod display;
pub mod endpoints;
pub mod live;
pub mod meter;
pub mod nn;
pub mod preproc;
pub mod sensors;
pub mod utils;

/// Wrap an encoded JPEG into one part of a `multipart/x-mixed-replace` stream.
pub fn as_jpeg_stream_item(data: &[u8]) -> Bytes {
    Bytes::copy_from_slice(
        &[
            "--frame\r\nContent-Type: image/jpeg\r\n\r\n".as_bytes(),
            data,
            "\r\n\r\n".as_bytes(),
        ]
        .concat(),
    )
}
