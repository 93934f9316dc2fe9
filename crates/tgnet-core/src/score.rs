use serde::{Deserialize, Serialize};

use crate::CoreError;

/// A finite value in `[0.0, 1.0]`, used for connection strength and confidence.
///
/// Construction is the only validation point: anything that reaches storage
/// through a `Score` is already in range.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    pub const ZERO: Score = Score(0.0);
    pub const ONE: Score = Score(1.0);

    /// Validate `value` as a score.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ScoreOutOfRange`] for NaN, infinite, or
    /// out-of-range values.
    pub fn new(value: f64) -> Result<Self, CoreError> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::ScoreOutOfRange(value))
        }
    }

    /// Clamp a computed value into range. Returns `None` for NaN, which
    /// signals "no meaningful value" rather than a fabricated zero.
    #[must_use]
    pub fn clamped(value: f64) -> Option<Self> {
        if value.is_nan() {
            None
        } else {
            Some(Self(value.clamp(0.0, 1.0)))
        }
    }

    #[must_use]
    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Score {
    type Error = CoreError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> Self {
        score.0
    }
}

impl std::fmt::Display for Score {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}
