//! eyetrack: real-time pupil and corneal-reflection tracking.
//!
//! Each frame goes through two stages:
//!
//! 1. **Coarse** – fast radial-symmetry transform on a downsampled copy; the
//!    strongest dark (or bright) symmetric blob is the pupil, the strongest
//!    bright blob besides it is the corneal reflection (CR).
//! 2. **Starburst** – rays cast from each seed sample the gradient magnitude;
//!    edge points along the rays are fitted with a circle (or ellipse) and the
//!    seed is moved to the fitted center until it settles.
//!
//! The result of each call is a [`FeatureRecord`], published into a
//! lock-protected [`ResultCache`] so other threads can poll
//! [`Tracker::get_result`] while frames keep arriving.
//!
//! # Public API
//! - [`Tracker`] and [`TrackerConfig`] as entry points
//! - [`Guess`] for per-frame hints and metadata
//! - [`ImageBackend`] for swapping the pixel kernels
//! - [`source`], [`archive`] and [`worker`] for continuous acquisition

pub mod archive;
pub mod backend;
pub mod coarse;
mod config;
mod error;
pub mod fit;
pub mod frame;
mod pipeline;
pub mod source;
pub mod starburst;
pub mod worker;

pub use backend::{CpuBackend, ImageBackend};
pub use coarse::{CoarseConfig, PupilPolarity, SearchRoi};
pub use config::{BackendConfig, TrackerConfig};
pub use error::{ArchiveError, BackendError, ConfigError, SourceError, TrackError};
pub use fit::FitMethod;
pub use frame::Frame;
pub use pipeline::{
    Diagnostics, FeatureDiagnostics, FeatureRecord, Guess, ResultCache, TrackStatus, Tracker,
};
pub use source::{EyeScene, FrameSource};
pub use starburst::{RayConfig, RaySampling, StarburstConfig};
pub use worker::{TrackerWorker, WorkerHandle, WorkerSummary};
