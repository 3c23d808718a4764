//! Tracker configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::coarse::CoarseConfig;
use crate::error::ConfigError;
use crate::starburst::StarburstConfig;

/// Parameters of the bundled CPU backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Gradient magnitudes at or below this fraction of the frame maximum do
    /// not vote in the radial-symmetry transform.
    pub gradient_floor: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            gradient_floor: 0.01,
        }
    }
}

/// Complete tracker configuration.
///
/// Every section is optional in JSON; missing fields take their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Coarse radial-symmetry stage.
    pub coarse: CoarseConfig,
    /// Starburst refinement stage.
    pub starburst: StarburstConfig,
    /// CPU backend.
    pub backend: BackendConfig,
    /// Seed missing radius (and position) priors from the last complete
    /// record. Off by default so repeated calls on one frame agree.
    pub warm_start: bool,
}

impl TrackerConfig {
    /// Load from a JSON file and validate.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> String {
        // Plain data with string keys; serialisation cannot fail.
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.coarse.validate().map_err(ConfigError::Invalid)?;
        self.starburst.validate().map_err(ConfigError::Invalid)?;
        let floor = self.backend.gradient_floor;
        if !(0.0..1.0).contains(&floor) {
            return Err(ConfigError::Invalid(format!(
                "backend.gradient_floor must lie in [0, 1), got {floor}"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarse::PupilPolarity;
    use crate::fit::FitMethod;

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TrackerConfig = serde_json::from_str(
            r#"{"coarse": {"polarity": "dark", "target_kpixels": 4.0},
                "starburst": {"fit_method": "ellipse"},
                "warm_start": true}"#,
        )
        .unwrap();
        assert_eq!(cfg.coarse.polarity, PupilPolarity::Dark);
        assert_eq!(cfg.coarse.target_kpixels, 4.0);
        assert_eq!(cfg.coarse.radius_steps, 6);
        assert_eq!(cfg.starburst.fit_method, FitMethod::Ellipse);
        assert_eq!(cfg.starburst.cr.n_rays, 20);
        assert!(cfg.warm_start);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn starburst_options_parse_from_json() {
        let cfg: TrackerConfig = serde_json::from_str(
            r#"{"starburst": {"fit_method": "mean", "ray_sampling": "nearest",
                              "ransac": {"inlier_threshold": 0.5}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.starburst.fit_method, FitMethod::Mean);
        assert_eq!(cfg.starburst.ray_sampling, crate::starburst::RaySampling::Nearest);
        assert_eq!(cfg.starburst.ransac.inlier_threshold, 0.5);
        assert_eq!(cfg.starburst.ransac.iterations, 20);
        assert!(cfg.validate().is_ok());

        let mut bad = cfg;
        bad.starburst.ransac.inlier_threshold = 0.0;
        assert!(matches!(bad.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn json_dump_roundtrips() {
        let cfg = TrackerConfig::default();
        let back: TrackerConfig = serde_json::from_str(&cfg.to_json()).unwrap();
        assert_eq!(back.starburst.pupil, cfg.starburst.pupil);
        assert_eq!(back.coarse.alpha, cfg.coarse.alpha);
        assert!(!back.warm_start);
    }

    #[test]
    fn file_errors_carry_path() {
        let dir = std::env::temp_dir().join(format!("eyetrack-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let bad = dir.join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            TrackerConfig::from_json_file(&bad),
            Err(ConfigError::Parse { .. })
        ));
        let invalid = dir.join("invalid.json");
        std::fs::write(&invalid, r#"{"starburst": {"max_iterations": 0}}"#).unwrap();
        assert!(matches!(
            TrackerConfig::from_json_file(&invalid),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            TrackerConfig::from_json_file(&dir.join("missing.json")),
            Err(ConfigError::Io { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
