//! Replay of recorded telemetry sessions.
//!
//! A recording is a JSON-lines file with one [`Sample`] per line. The replay
//! source reads it on a background thread and emits the samples over a
//! bounded channel, optionally pacing them by the gaps between their
//! timestamps so that time-based behavior downstream sees realistic timing.

use crate::source::types::Sample;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;

/// Longest pause the replay will insert between two samples.
const MAX_REPLAY_GAP: Duration = Duration::from_secs(5);

/// Configuration for a replay source.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path of the JSON-lines recording
    pub path: PathBuf,
    /// Playback speed multiplier. `0.0` replays as fast as possible.
    pub speed: f64,
}

impl ReplayConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            speed: 0.0,
        }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = speed;
        self
    }
}

/// Errors that can occur while replaying a recording.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("Replay source is already running")]
    AlreadyRunning,
    #[error("Failed to open recording {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Counts reported once a replay finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    /// Samples emitted on the channel
    pub emitted: u64,
    /// Lines that could not be parsed as samples
    pub skipped: u64,
}

/// Emits samples from a recorded session file.
pub struct ReplaySource {
    config: ReplayConfig,
    sender: Option<Sender<Sample>>,
    receiver: Receiver<Sample>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<ReplaySummary>>,
}

impl ReplaySource {
    /// Create a new replay source.
    pub fn new(config: ReplayConfig) -> Self {
        let (sender, receiver) = bounded(10_000);
        Self {
            config,
            sender: Some(sender),
            receiver,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Start replaying on a background thread.
    ///
    /// The channel disconnects once the whole recording has been emitted or
    /// [`stop`](Self::stop) is called. A source can only be started once.
    pub fn start(&mut self) -> Result<(), SourceError> {
        let sender = self.sender.take().ok_or(SourceError::AlreadyRunning)?;

        let file = File::open(&self.config.path).map_err(|source| SourceError::Open {
            path: self.config.path.clone(),
            source,
        })?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let speed = self.config.speed;

        let handle = thread::spawn(move || {
            let summary = replay_lines(BufReader::new(file), &sender, &running, speed);
            running.store(false, Ordering::SeqCst);
            tracing::debug!(
                emitted = summary.emitted,
                skipped = summary.skipped,
                "Replay finished"
            );
            summary
        });
        self.handle = Some(handle);
        Ok(())
    }

    /// Stop emitting samples.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the replay thread is still emitting.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Get the receiver for samples.
    pub fn receiver(&self) -> &Receiver<Sample> {
        &self.receiver
    }

    /// Try to receive a sample without blocking.
    pub fn try_recv(&self) -> Option<Sample> {
        self.receiver.try_recv().ok()
    }

    /// Wait for the replay thread and return its summary.
    pub fn join(&mut self) -> Option<ReplaySummary> {
        self.handle.take().and_then(|handle| handle.join().ok())
    }
}

fn replay_lines<R: BufRead>(
    reader: R,
    sender: &Sender<Sample>,
    running: &AtomicBool,
    speed: f64,
) -> ReplaySummary {
    let mut summary = ReplaySummary::default();
    let mut previous: Option<DateTime<Utc>> = None;

    for (index, line) in reader.lines().enumerate() {
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(line = index + 1, "Stopping replay on read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let sample: Sample = match serde_json::from_str(&line) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::warn!(line = index + 1, "Skipping malformed sample: {e}");
                summary.skipped += 1;
                continue;
            }
        };

        if speed > 0.0 {
            if let Some(prev) = previous {
                if let Ok(gap) = (sample.timestamp() - prev).to_std() {
                    thread::sleep(gap.div_f64(speed).min(MAX_REPLAY_GAP));
                }
            }
            previous = Some(sample.timestamp());
        }

        if sender.send(sample).is_err() {
            break;
        }
        summary.emitted += 1;
    }

    summary
}
