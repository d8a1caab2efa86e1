//! Speech recognizer
//!
//! One bounded listening window: open the input source, calibrate, capture
//! until the utterance ends or the timeout passes, then transcribe.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::capture::{AudioSource, samples_to_wav};
use super::endpoint::{EndpointConfig, EndpointDetector, EndpointState};
use super::stt::Transcriber;
use crate::{Error, Result};

/// Interval between input buffer reads
const READ_INTERVAL: Duration = Duration::from_millis(20);

/// Grace period on top of the listening window before the input is
/// considered stalled
const STALL_GRACE: Duration = Duration::from_secs(2);

/// Produces text from one spoken utterance
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Listen for up to `timeout` for speech to start, then return its text
    ///
    /// # Errors
    ///
    /// Returns error on timeout, missing input device, or transcription failure
    async fn listen(&self, timeout: Duration) -> Result<String>;
}

/// Microphone-backed recognizer
pub struct SpeechRecognizer {
    source: Arc<dyn AudioSource>,
    transcriber: Arc<dyn Transcriber>,
}

impl SpeechRecognizer {
    /// Create a recognizer from an input source and a transcriber
    #[must_use]
    pub fn new(source: Arc<dyn AudioSource>, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            source,
            transcriber,
        }
    }
}

#[async_trait]
impl Recognizer for SpeechRecognizer {
    async fn listen(&self, timeout: Duration) -> Result<String> {
        let source = Arc::clone(&self.source);
        let config = EndpointConfig::with_timeout(timeout);

        let (samples, sample_rate) = tokio::task::spawn_blocking(move || capture(&*source, config))
            .await
            .map_err(|e| Error::Recognition(format!("capture task failed: {e}")))??;

        tracing::debug!(samples = samples.len(), sample_rate, "utterance captured");

        let wav = samples_to_wav(&samples, sample_rate)?;
        let transcript = self.transcriber.transcribe(&wav).await?;
        normalize_transcript(&transcript)
    }
}

/// Blocking capture of one utterance
fn capture(source: &dyn AudioSource, config: EndpointConfig) -> Result<(Vec<f32>, u32)> {
    let mut stream = source.open()?;
    let sample_rate = stream.sample_rate();
    let mut detector = EndpointDetector::new(config, sample_rate);
    let deadline = Instant::now() + config.max_duration() + STALL_GRACE;

    loop {
        match detector.process(&stream.take_buffer()) {
            EndpointState::Complete => return Ok((detector.take_utterance(), sample_rate)),
            EndpointState::TimedOut => {
                return Err(Error::Recognition("no speech before timeout".to_string()));
            }
            EndpointState::Calibrating | EndpointState::Waiting | EndpointState::Speaking => {}
        }

        if Instant::now() >= deadline {
            return Err(Error::Recognition("input stream stalled".to_string()));
        }

        std::thread::sleep(READ_INTERVAL);
    }
}

/// Trim and lower-case; an empty transcript is a failure
fn normalize_transcript(transcript: &str) -> Result<String> {
    let text = transcript.trim().to_lowercase();
    if text.is_empty() {
        return Err(Error::Recognition("empty transcript".to_string()));
    }
    Ok(text)
}
