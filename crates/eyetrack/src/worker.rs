//! Acquisition thread: source, optional archive, tracker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::archive::FrameSink;
use crate::error::TrackError;
use crate::pipeline::{Guess, Tracker};
use crate::source::FrameSource;

/// Frames between two frame-rate log lines.
const RATE_CHECK_INTERVAL: u64 = 100;

/// Consecutive source failures after which the worker gives up.
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 10;

/// Counters reported when the worker exits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerSummary {
    /// Frames obtained from the source.
    pub frames: u64,
    /// Published records with both features.
    pub complete: u64,
    /// Published records with a missing feature.
    pub degraded: u64,
    /// Source reads that failed.
    pub source_errors: u64,
    /// Archive writes that failed.
    pub archive_errors: u64,
    /// Wall time spent in the loop.
    pub elapsed: Duration,
}

impl WorkerSummary {
    /// Mean processed frames per second over the whole run.
    pub fn mean_fps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }
}

/// Handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<Result<WorkerSummary, TrackError>>,
}

impl WorkerHandle {
    /// Ask the loop to exit after the current frame.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the loop to exit. A panic on the worker thread is resumed
    /// on the caller.
    pub fn join(self) -> Result<WorkerSummary, TrackError> {
        self.thread
            .join()
            .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
    }

    /// [`Self::stop`] then [`Self::join`].
    pub fn stop_and_join(self) -> Result<WorkerSummary, TrackError> {
        self.stop();
        self.join()
    }
}

/// Drives a [`FrameSource`] through a shared [`Tracker`] on its own thread.
///
/// Each frame is archived (if a sink is attached) and then analysed with its
/// timestamp and frame number as the guess. Results land in the tracker's
/// cache. The loop ends when the source is exhausted, when stopped, after
/// repeated source failures, or on a backend fault (returned as the error).
pub struct TrackerWorker {
    tracker: Arc<Tracker>,
    source: FrameSource,
    sink: Option<Box<dyn FrameSink>>,
    stop: Arc<AtomicBool>,
}

impl TrackerWorker {
    /// Start the loop.
    pub fn spawn(
        tracker: Arc<Tracker>,
        source: FrameSource,
        sink: Option<Box<dyn FrameSink>>,
    ) -> WorkerHandle {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = Self {
            tracker,
            source,
            sink,
            stop: Arc::clone(&stop),
        };
        let thread = std::thread::spawn(move || worker.run());
        WorkerHandle { stop, thread }
    }

    fn run(mut self) -> Result<WorkerSummary, TrackError> {
        tracing::info!(source = self.source.kind(), archive = self.sink.is_some(), "worker started");
        let started = Instant::now();
        let mut tic = started;
        let mut summary = WorkerSummary::default();
        let mut consecutive_failures = 0u32;

        while !self.stop.load(Ordering::Relaxed) {
            let sourced = match self.source.next_frame() {
                Ok(Some(f)) => {
                    consecutive_failures = 0;
                    f
                }
                Ok(None) => {
                    tracing::info!("source exhausted");
                    break;
                }
                Err(e) => {
                    summary.source_errors += 1;
                    consecutive_failures += 1;
                    tracing::warn!(error = %e, "frame acquisition failed");
                    if consecutive_failures >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        tracing::warn!(consecutive_failures, "giving up on source");
                        break;
                    }
                    continue;
                }
            };

            if let Some(sink) = self.sink.as_mut() {
                if let Err(e) =
                    sink.persist(&sourced.frame, sourced.timestamp, sourced.frame_number)
                {
                    summary.archive_errors += 1;
                    tracing::warn!(error = %e, frame_number = sourced.frame_number, "archive failed");
                }
            }

            let guess = Guess::at(sourced.timestamp, Some(sourced.frame_number));
            let record = self.tracker.track(&sourced.frame, Some(&guess))?;
            summary.frames += 1;
            if record.is_complete() {
                summary.complete += 1;
            } else {
                summary.degraded += 1;
            }

            if summary.frames % RATE_CHECK_INTERVAL == 0 {
                let secs = tic.elapsed().as_secs_f64();
                let fps = if secs > 0.0 {
                    RATE_CHECK_INTERVAL as f64 / secs
                } else {
                    f64::INFINITY
                };
                tracing::info!(fps, frame_number = sourced.frame_number, "frame rate");
                tic = Instant::now();
            }
        }

        summary.elapsed = started.elapsed();
        tracing::info!(
            frames = summary.frames,
            complete = summary.complete,
            degraded = summary.degraded,
            fps = summary.mean_fps(),
            "worker stopped"
        );
        Ok(summary)
    }
}
