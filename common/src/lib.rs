//! Common code shared between `trainer` and `live_classifier`.
pub mod label;

pub use label::{Label, THRESHOLD};

/// Side length of the square images the classifier is trained and queried on.
pub const INPUT_SIZE: usize = 64;

/// Number of color channels of classifier inputs.
pub const CHANNELS: usize = 3;
