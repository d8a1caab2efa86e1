//! Audio player
//!
//! Plays one synthesized artifact at a time. A new job signals the stop flag
//! of the previous one and waits for the device before starting. Failures
//! never propagate; callers only see a [`PlaybackOutcome`]. The artifact is
//! deleted when its job is dropped, so an aborted job leaves nothing behind.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;

use super::playback::AudioOutput;
use super::tts::AudioArtifact;
use crate::Result;
use crate::session::{CancelFlag, SessionState};

/// One artifact queued for playback
#[derive(Debug)]
pub struct AudioJob {
    artifact: AudioArtifact,
    cancel: CancelFlag,
}

impl AudioJob {
    /// Create a job for a synthesized artifact
    #[must_use]
    pub fn new(artifact: AudioArtifact) -> Self {
        Self {
            artifact,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Path of the file to play
    #[must_use]
    pub fn artifact_path(&self) -> &Path {
        self.artifact.path()
    }

    /// The job's stop flag
    #[must_use]
    pub fn cancel_flag(&self) -> CancelFlag {
        Arc::clone(&self.cancel)
    }

    /// Whether a stop was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }
}

/// How a job ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// Played to the end
    Completed,
    /// Stopped early by a stop request
    Interrupted,
    /// Skipped because output is muted
    Muted,
    /// The device or decoder failed
    Failed,
}

/// Serializes artifact playback on the audio device
pub struct AudioPlayer {
    output: Arc<dyn AudioOutput>,
    device: Arc<Mutex<()>>,
    session: Arc<SessionState>,
    poll_interval: Duration,
}

impl AudioPlayer {
    /// Create a player; `poll_interval` bounds how quickly a stop takes effect
    #[must_use]
    pub fn new(
        output: Arc<dyn AudioOutput>,
        session: Arc<SessionState>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            output,
            device: Arc::new(Mutex::new(())),
            session,
            poll_interval,
        }
    }

    /// Play `job`, then delete its artifact
    ///
    /// The artifact is removed in every outcome, after the device has been
    /// released.
    pub async fn play(&self, job: AudioJob) -> PlaybackOutcome {
        if self.session.is_muted() {
            tracing::debug!(path = %job.artifact_path().display(), "muted, skipping playback");
            return PlaybackOutcome::Muted;
        }

        if self.session.preempt(job.cancel_flag()) {
            tracing::debug!("stopping previous playback");
        }

        let device = Arc::clone(&self.device).lock_owned().await;

        let outcome = if job.is_cancelled() || self.session.is_muted() {
            drop(device);
            if job.is_cancelled() {
                PlaybackOutcome::Interrupted
            } else {
                PlaybackOutcome::Muted
            }
        } else {
            let output = Arc::clone(&self.output);
            let path = job.artifact_path().to_path_buf();
            let cancel = job.cancel_flag();
            let poll_interval = self.poll_interval;

            let played = tokio::task::spawn_blocking(move || {
                let result = run_playback(&*output, &path, &cancel, poll_interval);
                drop(device);
                result
            })
            .await;

            match played {
                Ok(Ok(true)) => PlaybackOutcome::Interrupted,
                Ok(Ok(false)) => PlaybackOutcome::Completed,
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "playback failed");
                    PlaybackOutcome::Failed
                }
                Err(e) => {
                    tracing::warn!(error = %e, "playback task failed");
                    PlaybackOutcome::Failed
                }
            }
        };

        self.session.release_interrupt(&job.cancel);
        drop(job);

        tracing::debug!(outcome = ?outcome, "playback finished");
        outcome
    }
}

/// Blocking poll loop; returns true if stopped by the flag
fn run_playback(
    output: &dyn AudioOutput,
    path: &Path,
    cancel: &AtomicBool,
    poll_interval: Duration,
) -> Result<bool> {
    let mut handle = output.open(path)?;

    while handle.is_busy() {
        if cancel.load(Ordering::SeqCst) {
            handle.stop();
            return Ok(true);
        }
        std::thread::sleep(poll_interval);
    }

    handle.stop();
    Ok(false)
}
