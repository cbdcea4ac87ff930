//! Labels produced from classifier scores.
//!
use std::fmt;

/// Scores strictly below this value are labeled `Fake`.
pub const THRESHOLD: f32 = 0.5;

/// Label shown on a classified frame.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Label {
    Real,
    Fake,
    /// Fallback when a frame could not be classified.
    Unknown,
}

impl Label {
    /// Threshold a classifier score into `Real` or `Fake`.
    pub fn from_score(score: f32) -> Self {
        if score < THRESHOLD {
            Label::Fake
        } else {
            Label::Real
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Real => "Real",
            Label::Fake => "Fake",
            Label::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
