//! Two-stage tracking pipeline.
//!
//! Each call runs coarse localisation on a downsampled copy of the frame,
//! maps the peaks back to full resolution, merges them with the caller's
//! guess and hands the result to the starburst refiner as seed. The merged
//! [`FeatureRecord`] is published into the tracker's [`ResultCache`].
//! No other state survives a call.

mod guess;
mod result;
mod state;

pub use guess::Guess;
pub use result::{Diagnostics, FeatureDiagnostics, FeatureRecord, TrackStatus};
pub use state::ResultCache;

use std::sync::Arc;

use crate::backend::{CpuBackend, ImageBackend};
use crate::coarse::{CoarseLocator, CoarseResult};
use crate::config::TrackerConfig;
use crate::error::{ConfigError, TrackError};
use crate::frame::{self, Frame};
use crate::starburst::{RefineHints, RefinedResult, SubpixelRefiner};

/// Pupil / corneal-reflection tracker.
///
/// `Tracker` is `Send + Sync`: share it behind an `Arc` between the
/// acquisition thread calling [`Tracker::analyze`] and consumers polling
/// [`Tracker::get_result`].
///
/// # Examples
///
/// ```
/// use eyetrack::{EyeScene, Guess, Tracker};
///
/// let frame = EyeScene::disk(64, 64, [32.0, 32.0], 8.0, 1.0, 0.0).render(None);
/// let tracker = Tracker::new();
/// tracker.analyze(&frame, Some(&Guess::at(1000.0, None))).unwrap();
/// let record = tracker.get_result().unwrap();
/// assert_eq!(record.timestamp, 1000.0);
/// ```
pub struct Tracker {
    config: TrackerConfig,
    coarse: CoarseLocator,
    refiner: SubpixelRefiner,
    cache: ResultCache,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Tracker {
    /// Tracker with default configuration and the CPU backend.
    pub fn new() -> Self {
        Self::with_config(TrackerConfig::default())
    }

    /// Tracker with `config` and the CPU backend it describes.
    ///
    /// `config` is used as given; see [`Self::try_with_config`] for a
    /// validating constructor.
    pub fn with_config(config: TrackerConfig) -> Self {
        let backend = Arc::new(CpuBackend::with_gradient_floor(
            config.backend.gradient_floor,
        ));
        Self::with_backend(config, backend)
    }

    /// [`Self::with_config`] after [`TrackerConfig::validate`].
    pub fn try_with_config(config: TrackerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::with_config(config))
    }

    /// Tracker running on a caller-provided backend.
    pub fn with_backend(config: TrackerConfig, backend: Arc<dyn ImageBackend>) -> Self {
        Self {
            coarse: CoarseLocator::new(config.coarse.clone(), Arc::clone(&backend)),
            refiner: SubpixelRefiner::new(config.starburst.clone(), backend),
            config,
            cache: ResultCache::new(),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Result staging shared with consumers.
    pub fn state(&self) -> &ResultCache {
        &self.cache
    }

    /// Process one frame and publish the record.
    ///
    /// Tracking misses yield a degraded record, not an error. On error
    /// nothing is published.
    pub fn analyze(&self, frame: &Frame, guess: Option<&Guess>) -> Result<(), TrackError> {
        self.track(frame, guess).map(|_| ())
    }

    /// Most recently published record.
    pub fn get_result(&self) -> Option<Arc<FeatureRecord>> {
        self.cache.latest()
    }

    /// [`Self::analyze`] and return the record it published.
    pub fn track(
        &self,
        frame: &Frame,
        guess: Option<&Guess>,
    ) -> Result<Arc<FeatureRecord>, TrackError> {
        let record = Arc::new(self.compute(frame, guess)?);
        self.cache.publish(Arc::clone(&record));
        Ok(record)
    }

    /// Run both stages without touching the cache.
    pub fn compute(&self, frame: &Frame, guess: Option<&Guess>) -> Result<FeatureRecord, TrackError> {
        let empty = Guess::default();
        let guess = guess.unwrap_or(&empty);
        guess.validate()?;
        frame::validate(frame)?;

        let _span = tracing::debug_span!("analyze", frame_number = guess.frame_number).entered();
        let coarse = self.coarse.locate(frame, Some(guess))?;
        let seed = self.merge_seed(&coarse, guess);
        let hints = RefineHints {
            gradient: None,
            pupil_reach: self.pupil_reach(&coarse),
        };
        let refined = self.refiner.refine_with(frame, &seed, &hints)?;
        let record = assemble(frame, guess, &coarse, &refined);

        tracing::debug!(
            status = ?record.status(),
            pupil = ?record.pupil_position,
            cr = ?record.cr_position,
            "frame analysed"
        );
        Ok(record)
    }

    /// Full-resolution pupil search radius covering every radius the coarse
    /// stage looked for.
    fn pupil_reach(&self, coarse: &CoarseResult) -> Option<f64> {
        let largest = *coarse.radii.last()?;
        let ds = coarse.downsample_factor as f64;
        Some(largest as f64 * ds * self.config.starburst.pupil_reach_factor)
    }

    /// Seed for the refiner: coarse peaks first, caller positions where the
    /// coarse stage found nothing, caller radii as priors. With warm start the
    /// last complete record fills whatever is still missing.
    fn merge_seed(&self, coarse: &CoarseResult, guess: &Guess) -> Guess {
        let (pupil_stage1, cr_stage1) = coarse.to_full_resolution();
        let warm = if self.config.warm_start {
            self.cache.last_good()
        } else {
            None
        };
        let warm = warm.as_deref();
        Guess {
            pupil_position: pupil_stage1
                .or(guess.pupil_position)
                .or_else(|| warm.and_then(|r| r.pupil_position)),
            cr_position: cr_stage1
                .or(guess.cr_position)
                .or_else(|| warm.and_then(|r| r.cr_position)),
            pupil_radius: guess
                .pupil_radius
                .or_else(|| warm.and_then(|r| r.pupil_radius)),
            cr_radius: guess.cr_radius.or_else(|| warm.and_then(|r| r.cr_radius)),
            timestamp: guess.timestamp,
            frame_number: guess.frame_number,
        }
    }
}

fn assemble(frame: &Frame, guess: &Guess, coarse: &CoarseResult, refined: &RefinedResult) -> FeatureRecord {
    let (pupil_stage1, cr_stage1) = coarse.to_full_resolution();
    let pupil = refined.pupil.as_ref().ok();
    let cr = refined.cr.as_ref().ok();
    FeatureRecord {
        pupil_position: pupil.map(|f| f.center),
        cr_position: cr.map(|f| f.center),
        pupil_radius: pupil.map(|f| f.radius),
        cr_radius: cr.map(|f| f.radius),
        im_shape: frame::shape(frame),
        timestamp: guess.timestamp.unwrap_or(0.0),
        frame_number: guess.frame_number,
        pupil_position_stage1: pupil_stage1,
        cr_position_stage1: cr_stage1,
        downsample_factor: coarse.downsample_factor,
        gradient_mean: coarse.gradient_mean,
        diagnostics: Diagnostics {
            pupil: FeatureDiagnostics::from_outcome(&refined.pupil),
            cr: FeatureDiagnostics::from_outcome(&refined.cr),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coarse::PupilPolarity;
    use crate::source::EyeScene;

    #[test]
    fn tracker_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Tracker>();
        assert_send_sync::<ResultCache>();
    }

    #[test]
    fn caller_position_fills_missing_coarse_peak() {
        let tracker = Tracker::new();
        let frame = EyeScene::disk(60, 60, [30.0, 30.0], 8.0, 1.0, 0.0).render(None);
        let coarse = tracker.coarse.locate(&frame, None).unwrap();
        assert!(coarse.cr_position.is_none());
        let guess = Guess {
            cr_position: Some([5.0, 6.0]),
            pupil_position: Some([1.0, 1.0]),
            pupil_radius: Some(7.5),
            timestamp: Some(2.0),
            ..Guess::default()
        };
        let seed = tracker.merge_seed(&coarse, &guess);
        assert_eq!(seed.cr_position, Some([5.0, 6.0]));
        assert_ne!(seed.pupil_position, Some([1.0, 1.0]));
        assert_eq!(seed.pupil_radius, Some(7.5));
        assert_eq!(seed.timestamp, Some(2.0));
    }

    #[test]
    fn warm_start_reads_last_good() {
        let config = TrackerConfig {
            warm_start: true,
            coarse: crate::coarse::CoarseConfig {
                polarity: PupilPolarity::Dark,
                ..Default::default()
            },
            ..Default::default()
        };
        let tracker = Tracker::with_config(config);
        let scene = EyeScene {
            noise_sigma: 0.0,
            ..EyeScene::default()
        };
        let first = tracker.track(&scene.render(None), None).unwrap();
        assert!(first.is_complete(), "{first:?}");

        let blank = Frame::from_pixel(320, 240, image::Luma([0.5]));
        let coarse = tracker.coarse.locate(&blank, None).unwrap();
        let seed = tracker.merge_seed(&coarse, &Guess::default());
        assert_eq!(seed.pupil_radius, first.pupil_radius);
        assert_eq!(seed.pupil_position, first.pupil_position);
    }

    #[test]
    fn pupil_reach_spans_coarse_radii() {
        let tracker = Tracker::new();
        let frame = Frame::from_pixel(640, 480, image::Luma([0.5]));
        let coarse = tracker.coarse.locate(&frame, None).unwrap();
        assert_eq!(coarse.downsample_factor, 5);
        assert_eq!(coarse.radii.last(), Some(&12));
        assert_eq!(tracker.pupil_reach(&coarse), Some(75.0));
    }

    #[test]
    fn try_with_config_rejects_invalid_config() {
        let mut config = TrackerConfig::default();
        config.starburst.max_iterations = 0;
        assert!(matches!(
            Tracker::try_with_config(config),
            Err(ConfigError::Invalid(_))
        ));
        assert!(Tracker::try_with_config(TrackerConfig::default()).is_ok());
    }

    #[test]
    fn errors_leave_cache_untouched() {
        let tracker = Tracker::new();
        let bad = Guess {
            cr_radius: Some(f64::NAN),
            ..Guess::default()
        };
        let frame = Frame::new(16, 16);
        assert!(tracker.analyze(&frame, Some(&bad)).is_err());
        assert!(tracker.analyze(&Frame::new(0, 3), None).is_err());
        assert!(tracker.get_result().is_none());
        assert_eq!(tracker.state().generation(), 0);
    }
}
