//! eyetrack CLI: track pupil and corneal reflection in images and sessions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use eyetrack::archive::{FrameSink, PngArchive};
use eyetrack::source::{load_frame, FileReplay, SyntheticSource};
use eyetrack::{
    EyeScene, FitMethod, FrameSource, Guess, PupilPolarity, RaySampling, Tracker, TrackerConfig,
    TrackerWorker,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "eyetrack")]
#[command(about = "Locate the pupil and corneal reflection in eye-camera frames")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a single image.
    Track(CliTrackArgs),

    /// Track every image in a directory, in file-name order.
    Replay(CliReplayArgs),

    /// Run the acquisition worker on rendered eye images.
    Synth(CliSynthArgs),

    /// Print the default configuration as JSON.
    DefaultConfig {
        /// Write to this file instead of stdout.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolarityArg {
    Dark,
    Bright,
    Auto,
}

impl From<PolarityArg> for PupilPolarity {
    fn from(v: PolarityArg) -> Self {
        match v {
            PolarityArg::Dark => PupilPolarity::Dark,
            PolarityArg::Bright => PupilPolarity::Bright,
            PolarityArg::Auto => PupilPolarity::Auto,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FitMethodArg {
    Circle,
    CircleRansac,
    Ellipse,
    Mean,
}

impl From<FitMethodArg> for FitMethod {
    fn from(v: FitMethodArg) -> Self {
        match v {
            FitMethodArg::Circle => FitMethod::Circle,
            FitMethodArg::CircleRansac => FitMethod::CircleRansac,
            FitMethodArg::Ellipse => FitMethod::Ellipse,
            FitMethodArg::Mean => FitMethod::Mean,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RaySamplingArg {
    Interpolate,
    Nearest,
}

impl From<RaySamplingArg> for RaySampling {
    fn from(v: RaySamplingArg) -> Self {
        match v {
            RaySamplingArg::Interpolate => RaySampling::Interpolate,
            RaySamplingArg::Nearest => RaySampling::Nearest,
        }
    }
}

/// Config file plus per-flag overrides.
#[derive(Debug, Clone, Args)]
struct TuneArgs {
    /// JSON configuration file (missing fields take defaults).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Pupil polarity for the coarse stage.
    #[arg(long, value_enum)]
    polarity: Option<PolarityArg>,

    /// Fixed coarse downsampling factor (default: adaptive).
    #[arg(long)]
    downsample: Option<u32>,

    /// Target size of the downsampled frame in kilopixels.
    #[arg(long)]
    target_kpixels: Option<f64>,

    /// Boundary model for the starburst fit.
    #[arg(long, value_enum)]
    fit_method: Option<FitMethodArg>,

    /// Gradient sampling along starburst rays.
    #[arg(long, value_enum)]
    ray_sampling: Option<RaySamplingArg>,

    /// Number of rays cast around the pupil.
    #[arg(long)]
    pupil_rays: Option<usize>,

    /// Number of rays cast around the glint.
    #[arg(long)]
    cr_rays: Option<usize>,

    /// Starburst iteration cap.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Seed radius priors from the previous complete result.
    #[arg(long)]
    warm_start: bool,
}

impl TuneArgs {
    fn to_tracker(&self) -> CliResult<Tracker> {
        Ok(Tracker::try_with_config(self.to_config()?)?)
    }

    fn to_config(&self) -> CliResult<TrackerConfig> {
        let mut cfg = match &self.config {
            Some(path) => TrackerConfig::from_json_file(path)?,
            None => TrackerConfig::default(),
        };
        if let Some(p) = self.polarity {
            cfg.coarse.polarity = p.into();
        }
        if let Some(ds) = self.downsample {
            cfg.coarse.downsample = Some(ds);
        }
        if let Some(k) = self.target_kpixels {
            cfg.coarse.target_kpixels = k;
        }
        if let Some(m) = self.fit_method {
            cfg.starburst.fit_method = m.into();
        }
        if let Some(m) = self.ray_sampling {
            cfg.starburst.ray_sampling = m.into();
        }
        if let Some(n) = self.pupil_rays {
            cfg.starburst.pupil.n_rays = n;
        }
        if let Some(n) = self.cr_rays {
            cfg.starburst.cr.n_rays = n;
        }
        if let Some(n) = self.max_iterations {
            cfg.starburst.max_iterations = n;
        }
        if self.warm_start {
            cfg.warm_start = true;
        }
        Ok(cfg)
    }
}

#[derive(Debug, Clone, Args)]
struct CliTrackArgs {
    /// Path to the input image.
    #[arg(long)]
    image: PathBuf,

    /// Path to write the feature record (JSON). Printed to stdout if omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Pupil radius prior in pixels.
    #[arg(long)]
    pupil_radius: Option<f64>,

    /// Glint radius prior in pixels.
    #[arg(long)]
    cr_radius: Option<f64>,

    /// Timestamp stored in the record.
    #[arg(long, default_value = "0.0")]
    timestamp: f64,

    #[command(flatten)]
    tune: TuneArgs,
}

#[derive(Debug, Clone, Args)]
struct CliReplayArgs {
    /// Directory of eye images.
    #[arg(long)]
    dir: PathBuf,

    /// Nominal frame rate used for timestamps.
    #[arg(long, default_value = "60.0")]
    fps: f64,

    /// Path to write one JSON record per line.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    tune: TuneArgs,
}

#[derive(Debug, Clone, Args)]
struct CliSynthArgs {
    /// Number of frames to render.
    #[arg(long, default_value = "300")]
    frames: u64,

    /// JSON scene description (missing fields take defaults).
    #[arg(long)]
    scene: Option<PathBuf>,

    /// Random-walk step of the eye in pixels per frame.
    #[arg(long, default_value = "0.5")]
    motion: f64,

    /// Maximal eye excursion from the start position in pixels.
    #[arg(long, default_value = "15.0")]
    max_excursion: f64,

    /// Noise and motion seed.
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Save every rendered frame as 16-bit PNG into this directory.
    #[arg(long)]
    archive: Option<PathBuf>,

    /// Path to write the last feature record (JSON).
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    tune: TuneArgs,
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track(args) => run_track(&args),
        Commands::Replay(args) => run_replay(&args),
        Commands::Synth(args) => run_synth(&args),
        Commands::DefaultConfig { out } => run_default_config(out.as_deref()),
    }
}

// ── track ──────────────────────────────────────────────────────────────

fn run_track(args: &CliTrackArgs) -> CliResult<()> {
    tracing::info!("Loading image: {}", args.image.display());
    let frame = load_frame(&args.image)?;
    let (w, h) = frame.dimensions();
    tracing::info!("Image size: {}x{}", w, h);

    let tracker = args.tune.to_tracker()?;
    let guess = Guess {
        pupil_radius: args.pupil_radius,
        cr_radius: args.cr_radius,
        ..Guess::at(args.timestamp, None)
    };
    let record = tracker.track(&frame, Some(&guess))?;
    tracing::info!(
        "Status: {:?}, pupil {:?} r={:?}, glint {:?} r={:?}",
        record.status(),
        record.pupil_position,
        record.pupil_radius,
        record.cr_position,
        record.cr_radius
    );

    let json = serde_json::to_string_pretty(&*record)?;
    match &args.out {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("Result written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}

// ── replay ─────────────────────────────────────────────────────────────

fn run_replay(args: &CliReplayArgs) -> CliResult<()> {
    let tracker = args.tune.to_tracker()?;
    let mut source = FrameSource::from(FileReplay::open(&args.dir, args.fps)?);
    let mut out = std::io::BufWriter::new(std::fs::File::create(&args.out)?);

    let mut n_frames = 0u64;
    let mut n_complete = 0u64;
    while let Some(sourced) = source.next_frame()? {
        let guess = Guess::at(sourced.timestamp, Some(sourced.frame_number));
        let record = tracker.track(&sourced.frame, Some(&guess))?;
        n_frames += 1;
        if record.is_complete() {
            n_complete += 1;
        }
        writeln!(out, "{}", serde_json::to_string(&*record)?)?;
    }
    out.flush()?;

    tracing::info!(
        "Tracked {} frames ({} complete); records written to {}",
        n_frames,
        n_complete,
        args.out.display()
    );
    Ok(())
}

// ── synth ──────────────────────────────────────────────────────────────

fn run_synth(args: &CliSynthArgs) -> CliResult<()> {
    let scene = match &args.scene {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => EyeScene::default(),
    };
    let source = SyntheticSource::new(scene, args.seed)
        .with_motion(args.motion, args.max_excursion)
        .with_limit(args.frames);
    let sink: Option<Box<dyn FrameSink>> = match &args.archive {
        Some(dir) => Some(Box::new(PngArchive::create(dir)?)),
        None => None,
    };

    let tracker = Arc::new(args.tune.to_tracker()?);
    let summary = TrackerWorker::spawn(Arc::clone(&tracker), source.into(), sink).join()?;
    tracing::info!(
        "Processed {} frames in {:.2}s ({:.1} fps): {} complete, {} degraded",
        summary.frames,
        summary.elapsed.as_secs_f64(),
        summary.mean_fps(),
        summary.complete,
        summary.degraded
    );

    if let (Some(path), Some(record)) = (&args.out, tracker.get_result()) {
        std::fs::write(path, serde_json::to_string_pretty(&*record)?)?;
        tracing::info!("Last result written to {}", path.display());
    }
    Ok(())
}

// ── default-config ─────────────────────────────────────────────────────

fn run_default_config(out: Option<&Path>) -> CliResult<()> {
    let json = TrackerConfig::default().to_json();
    match out {
        Some(path) => {
            std::fs::write(path, json)?;
            tracing::info!("Default config written to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
