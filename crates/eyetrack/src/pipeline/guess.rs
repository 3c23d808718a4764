//! Caller-supplied prior for one frame.

use serde::{Deserialize, Serialize};

use crate::error::TrackError;

/// Optional hints for a single [`crate::Tracker::analyze`] call.
///
/// Every field may be absent. The pipeline reads the guess and never mutates
/// it; merging with stage results produces new values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Guess {
    /// Pupil center `[x, y]` in full-resolution pixels.
    pub pupil_position: Option<[f64; 2]>,
    /// Corneal reflection center `[x, y]` in full-resolution pixels.
    pub cr_position: Option<[f64; 2]>,
    /// Expected pupil radius in pixels.
    pub pupil_radius: Option<f64>,
    /// Expected corneal reflection radius in pixels.
    pub cr_radius: Option<f64>,
    /// Acquisition timestamp, copied verbatim into the result.
    pub timestamp: Option<f64>,
    /// Acquisition frame counter, copied verbatim into the result.
    pub frame_number: Option<u64>,
}

impl Guess {
    /// Guess carrying only acquisition metadata.
    pub fn at(timestamp: f64, frame_number: Option<u64>) -> Self {
        Self {
            timestamp: Some(timestamp),
            frame_number,
            ..Self::default()
        }
    }

    /// Reject non-finite positions and non-positive or non-finite radii.
    pub fn validate(&self) -> Result<(), TrackError> {
        check_position("pupil_position", self.pupil_position)?;
        check_position("cr_position", self.cr_position)?;
        check_radius("pupil_radius", self.pupil_radius)?;
        check_radius("cr_radius", self.cr_radius)?;
        if let Some(t) = self.timestamp {
            if !t.is_finite() {
                return Err(TrackError::InvalidGuess {
                    field: "timestamp",
                    reason: format!("{t} is not finite"),
                });
            }
        }
        Ok(())
    }
}

fn check_position(field: &'static str, p: Option<[f64; 2]>) -> Result<(), TrackError> {
    match p {
        Some([x, y]) if !(x.is_finite() && y.is_finite()) => Err(TrackError::InvalidGuess {
            field,
            reason: format!("[{x}, {y}] is not finite"),
        }),
        _ => Ok(()),
    }
}

fn check_radius(field: &'static str, r: Option<f64>) -> Result<(), TrackError> {
    match r {
        Some(r) if !r.is_finite() || r <= 0.0 => Err(TrackError::InvalidGuess {
            field,
            reason: format!("radius must be finite and positive, got {r}"),
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_guess_is_valid() {
        assert!(Guess::default().validate().is_ok());
        assert!(Guess::at(12.5, Some(3)).validate().is_ok());
    }

    #[test]
    fn bad_fields_are_named() {
        let g = Guess {
            pupil_radius: Some(0.0),
            ..Guess::default()
        };
        assert!(matches!(
            g.validate(),
            Err(TrackError::InvalidGuess { field: "pupil_radius", .. })
        ));
        let g = Guess {
            cr_position: Some([f64::NAN, 1.0]),
            ..Guess::default()
        };
        assert!(matches!(
            g.validate(),
            Err(TrackError::InvalidGuess { field: "cr_position", .. })
        ));
    }

    #[test]
    fn missing_json_fields_default() {
        let g: Guess = serde_json::from_str(r#"{"timestamp": 4.0}"#).unwrap();
        assert_eq!(g.timestamp, Some(4.0));
        assert!(g.pupil_position.is_none());
    }
}
