//! Error types.
//!
//! Tracking misses (no pupil, no glint) are *not* errors: they surface as
//! `None` fields in [`crate::FeatureRecord`]. The types here cover contract
//! violations only: malformed frames, malformed guesses, backend faults and
//! I/O around the core.

use std::path::PathBuf;

/// Fault raised by an [`crate::ImageBackend`] on malformed input.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// The image has zero width or height.
    #[error("empty image ({width}x{height})")]
    EmptyImage {
        /// Image width in pixels.
        width: u32,
        /// Image height in pixels.
        height: u32,
    },
    /// The image contains NaN or infinite samples.
    #[error("image contains a non-finite sample at ({x}, {y})")]
    NonFiniteSample {
        /// Column of the first offending sample.
        x: u32,
        /// Row of the first offending sample.
        y: u32,
    },
    /// A convolution kernel is empty or has even length.
    #[error("invalid {axis} kernel: length {len} (must be odd and non-zero)")]
    InvalidKernel {
        /// Which kernel was rejected (`"row"` or `"column"`).
        axis: &'static str,
        /// Offending kernel length.
        len: usize,
    },
    /// Radial-symmetry transform was called without usable radii.
    #[error("radial symmetry transform needs at least one positive radius")]
    InvalidRadii,
    /// Radial-symmetry exponent must be finite and non-negative.
    #[error("invalid radial strictness alpha = {0}")]
    InvalidAlpha(f32),
}

/// Error returned by [`crate::Tracker::analyze`] and the stage entry points.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    /// A numeric backend call failed.
    #[error("backend fault: {0}")]
    Backend(#[from] BackendError),
    /// A caller-supplied guess field has an unusable value.
    #[error("invalid guess field `{field}`: {reason}")]
    InvalidGuess {
        /// Name of the offending field.
        field: &'static str,
        /// Human-readable explanation.
        reason: String,
    },
}

/// Error produced by a [`crate::source::FrameSource`].
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// Reading a replay file or directory failed.
    #[error("i/o error on {path}: {source}")]
    Io {
        /// Path being read.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A replay file could not be decoded as an image.
    #[error("failed to decode {path}: {source}")]
    Decode {
        /// Path being decoded.
        path: PathBuf,
        /// Underlying decoder error.
        #[source]
        source: image::ImageError,
    },
    /// The external camera driver reported a failure.
    #[error("camera error: {0}")]
    Camera(String),
}

/// Error produced by a [`crate::archive::FrameSink`].
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Creating the archive directory failed.
    #[error("cannot create archive directory {path}: {source}")]
    CreateDir {
        /// Directory path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Encoding or writing a frame failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Output file.
        path: PathBuf,
        /// Underlying encoder error.
        #[source]
        source: image::ImageError,
    },
}

/// Error loading or saving a [`crate::TrackerConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read or written.
    #[error("config i/o error on {path}: {source}")]
    Io {
        /// Config path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// File is not valid config JSON.
    #[error("invalid config JSON in {path}: {source}")]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Underlying parse error.
        #[source]
        source: serde_json::Error,
    },
    /// Parsed values violate a constraint.
    #[error("invalid config: {0}")]
    Invalid(String),
}
