//! Orientation classification from container dimensions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EvalError;

/// Default aspect threshold: height strictly greater than width.
pub const DEFAULT_ASPECT_THRESHOLD: f64 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Orientation {
    Vertical,
    Horizontal,
    Square,
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Orientation::Vertical => "VERTICAL",
            Orientation::Horizontal => "HORIZONTAL",
            Orientation::Square => "SQUARE",
        };
        f.write_str(name)
    }
}

/// `Vertical` when `height > width * threshold`, `Horizontal` when wider than tall,
/// `Square` otherwise (including tall videos under the threshold).
pub fn classify(width: u32, height: u32, threshold: f64) -> Result<Orientation, EvalError> {
    if width == 0 || height == 0 {
        return Err(EvalError::InvalidMetadata(format!(
            "invalid dimensions {}x{}",
            width, height
        )));
    }
    if !threshold.is_finite() || threshold <= 0.0 {
        return Err(EvalError::InvalidMetadata(format!(
            "invalid aspect threshold {}",
            threshold
        )));
    }
    let (w, h) = (width as f64, height as f64);
    if h > w * threshold {
        Ok(Orientation::Vertical)
    } else if w > h {
        Ok(Orientation::Horizontal)
    } else {
        Ok(Orientation::Square)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_shapes() {
        assert_eq!(classify(1080, 1920, 1.0).unwrap(), Orientation::Vertical);
        assert_eq!(classify(1920, 1080, 1.0).unwrap(), Orientation::Horizontal);
        assert_eq!(classify(720, 720, 1.0).unwrap(), Orientation::Square);
    }

    #[test]
    fn threshold_raises_the_bar() {
        // 4:5 portrait is not vertical enough for a 1.5 threshold
        assert_eq!(classify(1080, 1350, 1.5).unwrap(), Orientation::Square);
        assert_eq!(classify(1080, 1920, 1.5).unwrap(), Orientation::Vertical);
    }

    #[test]
    fn zero_dimension_is_invalid_metadata() {
        assert!(matches!(
            classify(0, 1920, 1.0),
            Err(EvalError::InvalidMetadata(_))
        ));
        assert!(matches!(
            classify(1080, 0, 1.0),
            Err(EvalError::InvalidMetadata(_))
        ));
    }
}
