use serde::{Deserialize, Serialize};

use crate::starburst::{FeatureFit, RefineFailure};

/// Refinement diagnostics for one feature.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureDiagnostics {
    /// Cast/fit rounds performed.
    pub iterations: u32,
    /// Whether the center converged before the iteration cap.
    pub converged: bool,
    /// Edge points used by the final fit.
    pub rays_used: usize,
    /// Rays cast in the final round.
    pub rays_total: usize,
    /// RMS distance of the used edge points from the fitted boundary.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit_rms: Option<f64>,
    /// Gradient threshold the final ray cast used for edge detection.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edge_threshold: Option<f32>,
    /// Reason the feature was not refined.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl FeatureDiagnostics {
    pub(crate) fn from_outcome(outcome: &Result<FeatureFit, RefineFailure>) -> Self {
        match outcome {
            Ok(fit) => Self {
                iterations: fit.iterations,
                converged: fit.converged,
                rays_used: fit.rays_used,
                rays_total: fit.rays_total,
                fit_rms: Some(fit.rms_residual),
                edge_threshold: Some(fit.edge_threshold),
                failure: None,
            },
            Err(e) => Self {
                failure: Some(e.to_string()),
                ..Self::default()
            },
        }
    }
}

/// Per-feature diagnostics of one pipeline run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Pupil refinement.
    pub pupil: FeatureDiagnostics,
    /// Glint refinement.
    pub cr: FeatureDiagnostics,
}

/// Overall outcome of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackStatus {
    /// Pupil and glint both found.
    Complete,
    /// Only the pupil was found.
    PupilOnly,
    /// Only the glint was found.
    CrOnly,
    /// Neither feature was found.
    Lost,
}

/// Result of one [`crate::Tracker::analyze`] call.
///
/// Positions are full-resolution `[x, y]` pixels. A position is present
/// exactly when its radius is present. Records with missing features are
/// valid output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureRecord {
    /// Refined pupil center.
    pub pupil_position: Option<[f64; 2]>,
    /// Refined glint center.
    pub cr_position: Option<[f64; 2]>,
    /// Refined pupil radius.
    pub pupil_radius: Option<f64>,
    /// Refined glint radius.
    pub cr_radius: Option<f64>,
    /// Frame shape `[height, width]`.
    pub im_shape: [u32; 2],
    /// Caller timestamp, `0.0` when none was given.
    pub timestamp: f64,
    /// Caller frame counter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_number: Option<u64>,
    /// Coarse pupil position mapped to full resolution.
    pub pupil_position_stage1: Option<[f64; 2]>,
    /// Coarse glint position mapped to full resolution.
    pub cr_position_stage1: Option<[f64; 2]>,
    /// Coarse stage downsampling factor.
    pub downsample_factor: u32,
    /// Mean Sobel magnitude of the downsampled frame.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient_mean: Option<f32>,
    /// Refinement diagnostics.
    pub diagnostics: Diagnostics,
}

impl FeatureRecord {
    /// Both features present.
    pub fn is_complete(&self) -> bool {
        self.pupil_position.is_some() && self.cr_position.is_some()
    }

    /// At least one feature missing.
    pub fn is_degraded(&self) -> bool {
        !self.is_complete()
    }

    /// Summary of which features were found.
    pub fn status(&self) -> TrackStatus {
        match (self.pupil_position.is_some(), self.cr_position.is_some()) {
            (true, true) => TrackStatus::Complete,
            (true, false) => TrackStatus::PupilOnly,
            (false, true) => TrackStatus::CrOnly,
            (false, false) => TrackStatus::Lost,
        }
    }

    /// Pupil minus glint vector, the usual gaze signal.
    pub fn pupil_cr_offset(&self) -> Option<[f64; 2]> {
        let p = self.pupil_position?;
        let c = self.cr_position?;
        Some([p[0] - c[0], p[1] - c[1]])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> FeatureRecord {
        FeatureRecord {
            pupil_position: Some([10.0, 12.0]),
            cr_position: None,
            pupil_radius: Some(4.0),
            cr_radius: None,
            im_shape: [48, 64],
            timestamp: 3.5,
            frame_number: Some(9),
            pupil_position_stage1: Some([10.5, 11.5]),
            cr_position_stage1: None,
            downsample_factor: 1,
            gradient_mean: None,
            diagnostics: Diagnostics::default(),
        }
    }

    #[test]
    fn status_reflects_missing_features() {
        let mut r = record();
        assert_eq!(r.status(), TrackStatus::PupilOnly);
        assert!(r.is_degraded());
        assert!(r.pupil_cr_offset().is_none());
        r.cr_position = Some([8.0, 11.0]);
        r.cr_radius = Some(1.5);
        assert_eq!(r.status(), TrackStatus::Complete);
        assert_eq!(r.pupil_cr_offset(), Some([2.0, 1.0]));
    }

    #[test]
    fn failure_reason_becomes_diagnostic_string() {
        let d = FeatureDiagnostics::from_outcome(&Err(RefineFailure::TooFewEdges {
            found: 2,
            needed: 8,
        }));
        assert_eq!(d.failure.as_deref(), Some("only 2 edge points, need 8"));
        assert_eq!(d.iterations, 0);
        assert!(d.edge_threshold.is_none());
    }

    #[test]
    fn fit_diagnostics_carry_edge_threshold() {
        let fit = FeatureFit {
            center: [5.0, 5.0],
            radius: 3.0,
            ellipse: None,
            iterations: 2,
            converged: true,
            rays_used: 18,
            rays_total: 20,
            rms_residual: 0.1,
            edge_threshold: 0.125,
            boundary_points: Vec::new(),
        };
        let d = FeatureDiagnostics::from_outcome(&Ok(fit));
        assert_eq!(d.edge_threshold, Some(0.125));
        assert_eq!(d.fit_rms, Some(0.1));
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("\"edge_threshold\":0.125"), "{json}");
    }

    #[test]
    fn json_roundtrip_keeps_fields() {
        let r = record();
        let json = serde_json::to_string(&r).unwrap();
        assert!(!json.contains("gradient_mean"));
        let back: FeatureRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
