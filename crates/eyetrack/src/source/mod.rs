//! Frame producers.
//!
//! [`FrameSource`] is chosen once at construction and yields
//! [`SourcedFrame`]s until it runs dry. Live devices sit behind
//! [`CameraDevice`]; directory replay and the synthetic renderer are built in.

mod synthetic;

pub use synthetic::EyeScene;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use rand::prelude::*;
use rand_distr::{Distribution, Normal};

use crate::error::SourceError;
use crate::frame::Frame;

/// Extensions picked up by [`FileReplay::open`].
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff"];

/// One acquired frame with its acquisition metadata.
#[derive(Debug, Clone)]
pub struct SourcedFrame {
    /// Grayscale samples.
    pub frame: Frame,
    /// Acquisition time in seconds.
    pub timestamp: f64,
    /// Zero-based index within the source.
    pub frame_number: u64,
}

/// A camera driver. Returns `Ok(None)` when the device has stopped streaming.
pub trait CameraDevice: Send {
    /// Block until the next frame; returns the frame and its timestamp.
    fn acquire(&mut self) -> Result<Option<(Frame, f64)>, SourceError>;

    /// Human-readable device name for logs.
    fn name(&self) -> &str {
        "camera"
    }
}

/// Seconds since the Unix epoch.
pub fn wall_clock() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Stand-in device that serves one still image with fresh uniform noise on
/// every acquisition, timestamped with the wall clock.
#[derive(Debug, Clone)]
pub struct StillCamera {
    image: Frame,
    noise_amplitude: f32,
    rng: StdRng,
}

impl StillCamera {
    /// Serve `image` with noise uniform in `[0, noise_amplitude)`.
    pub fn new(image: Frame, noise_amplitude: f32, seed: u64) -> Self {
        Self {
            image,
            noise_amplitude,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl CameraDevice for StillCamera {
    fn acquire(&mut self) -> Result<Option<(Frame, f64)>, SourceError> {
        let mut frame = self.image.clone();
        if self.noise_amplitude > 0.0 {
            for p in frame.pixels_mut() {
                p[0] += self.noise_amplitude * self.rng.gen::<f32>();
            }
        }
        Ok(Some((frame, wall_clock())))
    }

    fn name(&self) -> &str {
        "still"
    }
}

/// Frames from a [`CameraDevice`], numbered in acquisition order.
pub struct LiveCamera {
    device: Box<dyn CameraDevice>,
    next_number: u64,
}

impl LiveCamera {
    pub fn new(device: Box<dyn CameraDevice>) -> Self {
        Self {
            device,
            next_number: 0,
        }
    }

    fn next_frame(&mut self) -> Result<Option<SourcedFrame>, SourceError> {
        let Some((frame, timestamp)) = self.device.acquire()? else {
            return Ok(None);
        };
        let frame_number = self.next_number;
        self.next_number += 1;
        Ok(Some(SourcedFrame {
            frame,
            timestamp,
            frame_number,
        }))
    }
}

impl std::fmt::Debug for LiveCamera {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveCamera")
            .field("device", &self.device.name())
            .field("next_number", &self.next_number)
            .finish()
    }
}

/// Replays image files in name order at a nominal frame rate.
#[derive(Debug, Clone)]
pub struct FileReplay {
    paths: Vec<PathBuf>,
    fps: f64,
    looping: bool,
    cursor: usize,
    served: u64,
}

impl FileReplay {
    /// All image files directly inside `dir`, sorted by file name.
    pub fn open(dir: &Path, fps: f64) -> Result<Self, SourceError> {
        let io_err = |source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && has_image_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        tracing::info!(dir = %dir.display(), frames = paths.len(), "opened replay directory");
        Ok(Self::from_paths(paths, fps))
    }

    /// Replay an explicit file list in the given order.
    pub fn from_paths(paths: Vec<PathBuf>, fps: f64) -> Self {
        Self {
            paths,
            fps,
            looping: false,
            cursor: 0,
            served: 0,
        }
    }

    /// Restart from the first file after the last one.
    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn next_frame(&mut self) -> Result<Option<SourcedFrame>, SourceError> {
        if self.cursor >= self.paths.len() {
            if !self.looping || self.paths.is_empty() {
                return Ok(None);
            }
            self.cursor = 0;
        }
        let path = &self.paths[self.cursor];
        self.cursor += 1;
        let frame = load_frame(path)?;
        let frame_number = self.served;
        self.served += 1;
        Ok(Some(SourcedFrame {
            frame,
            timestamp: nominal_timestamp(frame_number, self.fps),
            frame_number,
        }))
    }
}

/// Decode an image file to a grayscale [`Frame`] with samples in `[0, 1]`.
pub fn load_frame(path: &Path) -> Result<Frame, SourceError> {
    let img = image::open(path).map_err(|source| match source {
        image::ImageError::IoError(source) => SourceError::Io {
            path: path.to_path_buf(),
            source,
        },
        source => SourceError::Decode {
            path: path.to_path_buf(),
            source,
        },
    })?;
    Ok(img.to_luma32f())
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn nominal_timestamp(frame_number: u64, fps: f64) -> f64 {
    if fps > 0.0 {
        frame_number as f64 / fps
    } else {
        0.0
    }
}

/// Renders an [`EyeScene`] per frame, moving the eye by a bounded random walk.
///
/// The glint follows the pupil at a fixed fraction of its displacement, the
/// way a corneal reflection lags the pupil under eye rotation.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    scene: EyeScene,
    home: [f64; 2],
    cr_offset: Option<[f64; 2]>,
    step_sigma: f64,
    max_excursion: f64,
    cr_gain: f64,
    fps: f64,
    limit: Option<u64>,
    rng: StdRng,
    next_number: u64,
    current: Option<EyeScene>,
}

impl SyntheticSource {
    /// Static eye: every frame renders `scene` with fresh noise.
    pub fn new(scene: EyeScene, seed: u64) -> Self {
        let home = scene.pupil_center;
        let cr_offset = scene
            .cr_center
            .map(|c| [c[0] - home[0], c[1] - home[1]]);
        Self {
            scene,
            home,
            cr_offset,
            step_sigma: 0.0,
            max_excursion: 0.0,
            cr_gain: 0.5,
            fps: 60.0,
            limit: None,
            rng: StdRng::seed_from_u64(seed),
            next_number: 0,
            current: None,
        }
    }

    /// Standard deviation of the Gaussian random-walk step (px per frame per
    /// axis) and the maximal distance of the pupil from its starting point.
    pub fn with_motion(mut self, step_sigma: f64, max_excursion: f64) -> Self {
        self.step_sigma = step_sigma.max(0.0);
        self.max_excursion = max_excursion.max(0.0);
        self
    }

    /// Stop after `limit` frames.
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Nominal frame rate used for timestamps.
    pub fn with_fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Scene rendered for the most recent frame.
    pub fn ground_truth(&self) -> Option<&EyeScene> {
        self.current.as_ref()
    }

    fn step(&mut self) -> EyeScene {
        let mut scene = self.scene.clone();
        if let Some(prev) = &self.current {
            scene.pupil_center = prev.pupil_center;
        }
        let walk = Normal::new(0.0, self.step_sigma).ok();
        if let Some(walk) = walk.filter(|_| self.step_sigma > 0.0 && self.next_number > 0) {
            let mut c = scene.pupil_center;
            c[0] += walk.sample(&mut self.rng);
            c[1] += walk.sample(&mut self.rng);
            let dx = c[0] - self.home[0];
            let dy = c[1] - self.home[1];
            let d = dx.hypot(dy);
            if d > self.max_excursion && d > 0.0 {
                let s = self.max_excursion / d;
                c = [self.home[0] + dx * s, self.home[1] + dy * s];
            }
            scene.pupil_center = c;
        }
        if let Some(off) = self.cr_offset {
            let dx = scene.pupil_center[0] - self.home[0];
            let dy = scene.pupil_center[1] - self.home[1];
            scene.cr_center = Some([
                self.home[0] + off[0] + self.cr_gain * dx,
                self.home[1] + off[1] + self.cr_gain * dy,
            ]);
        }
        scene
    }

    fn next_frame(&mut self) -> Option<SourcedFrame> {
        if self.limit.is_some_and(|l| self.next_number >= l) {
            return None;
        }
        let scene = self.step();
        let frame = scene.render(Some(&mut self.rng));
        let frame_number = self.next_number;
        self.next_number += 1;
        self.current = Some(scene);
        Some(SourcedFrame {
            frame,
            timestamp: nominal_timestamp(frame_number, self.fps),
            frame_number,
        })
    }
}

/// Where frames come from.
#[derive(Debug)]
pub enum FrameSource {
    /// A streaming device.
    LiveCamera(LiveCamera),
    /// Image files on disk.
    FileReplay(FileReplay),
    /// Rendered eye images with known ground truth.
    Synthetic(SyntheticSource),
}

impl FrameSource {
    /// Next frame, or `None` once the source is exhausted.
    pub fn next_frame(&mut self) -> Result<Option<SourcedFrame>, SourceError> {
        match self {
            Self::LiveCamera(cam) => cam.next_frame(),
            Self::FileReplay(replay) => replay.next_frame(),
            Self::Synthetic(synth) => Ok(synth.next_frame()),
        }
    }

    /// Short variant name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LiveCamera(_) => "live_camera",
            Self::FileReplay(_) => "file_replay",
            Self::Synthetic(_) => "synthetic",
        }
    }
}

impl From<LiveCamera> for FrameSource {
    fn from(v: LiveCamera) -> Self {
        Self::LiveCamera(v)
    }
}

impl From<FileReplay> for FrameSource {
    fn from(v: FileReplay) -> Self {
        Self::FileReplay(v)
    }
}

impl From<SyntheticSource> for FrameSource {
    fn from(v: SyntheticSource) -> Self {
        Self::Synthetic(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("eyetrack-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn synthetic_source_respects_limit_and_numbers_frames() {
        let scene = EyeScene {
            width: 80,
            height: 60,
            pupil_center: [40.0, 30.0],
            pupil_radius: 10.0,
            iris_radius: Some(20.0),
            cr_center: Some([44.0, 27.0]),
            cr_radius: 2.0,
            ..EyeScene::default()
        };
        let mut source = FrameSource::from(
            SyntheticSource::new(scene, 3)
                .with_motion(1.5, 4.0)
                .with_limit(5)
                .with_fps(100.0),
        );
        let mut numbers = Vec::new();
        while let Some(f) = source.next_frame().unwrap() {
            assert_eq!(f.frame.dimensions(), (80, 60));
            assert_relative_eq!(f.timestamp, f.frame_number as f64 / 100.0);
            numbers.push(f.frame_number);
        }
        assert_eq!(numbers, vec![0, 1, 2, 3, 4]);
        assert!(source.next_frame().unwrap().is_none());

        let FrameSource::Synthetic(synth) = &source else {
            unreachable!()
        };
        let truth = synth.ground_truth().unwrap();
        let dx = truth.pupil_center[0] - 40.0;
        let dy = truth.pupil_center[1] - 30.0;
        assert!(dx.hypot(dy) <= 4.0 + 1e-9);
        let cr = truth.cr_center.unwrap();
        assert_relative_eq!(cr[0], 44.0 + 0.5 * dx, epsilon = 1e-9);
        assert_relative_eq!(cr[1], 27.0 + 0.5 * dy, epsilon = 1e-9);
    }

    #[test]
    fn file_replay_reads_sorted_images() {
        let dir = temp_dir("replay");
        for (name, value) in [("b.png", 200u8), ("a.png", 50u8)] {
            image::GrayImage::from_pixel(6, 4, image::Luma([value]))
                .save(dir.join(name))
                .unwrap();
        }
        std::fs::write(dir.join("notes.txt"), "skip me").unwrap();

        let replay = FileReplay::open(&dir, 10.0).unwrap();
        assert_eq!(replay.len(), 2);
        let mut source = FrameSource::from(replay);
        let first = source.next_frame().unwrap().unwrap();
        assert_relative_eq!(first.frame.get_pixel(0, 0)[0], 50.0 / 255.0, epsilon = 1e-6);
        assert_eq!(first.frame_number, 0);
        let second = source.next_frame().unwrap().unwrap();
        assert_relative_eq!(second.timestamp, 0.1);
        assert!(source.next_frame().unwrap().is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn looping_replay_keeps_counting() {
        let dir = temp_dir("loop");
        image::GrayImage::new(3, 3).save(dir.join("only.png")).unwrap();
        let mut replay = FileReplay::open(&dir, 0.0).unwrap().looping(true);
        for expected in 0..3 {
            let f = replay.next_frame().unwrap().unwrap();
            assert_eq!(f.frame_number, expected);
            assert_eq!(f.timestamp, 0.0);
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn replay_errors_name_the_file() {
        let dir = temp_dir("broken");
        let bad = dir.join("bad.png");
        std::fs::write(&bad, b"not a png").unwrap();
        let mut source = FrameSource::from(FileReplay::from_paths(vec![bad.clone()], 30.0));
        match source.next_frame() {
            Err(SourceError::Decode { path, .. }) => assert_eq!(path, bad),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            FileReplay::open(&dir.join("missing"), 30.0),
            Err(SourceError::Io { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn live_camera_numbers_device_frames() {
        let still = StillCamera::new(Frame::new(4, 4), 0.1, 1);
        let mut source = FrameSource::from(LiveCamera::new(Box::new(still)));
        assert_eq!(source.kind(), "live_camera");
        for expected in 0..3 {
            let f = source.next_frame().unwrap().unwrap();
            assert_eq!(f.frame_number, expected);
            assert!(f.timestamp > 0.0);
            assert!(f.frame.pixels().all(|p| (0.0..0.1).contains(&p[0])));
        }
    }
}
