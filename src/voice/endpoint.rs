//! Utterance endpoint detection
//!
//! Energy-based: calibrates against ambient noise, waits for speech to
//! start, then captures until a stretch of silence or the phrase limit.

use std::time::Duration;

/// Lowest threshold regardless of how quiet the room is
const ENERGY_FLOOR: f32 = 0.01;

/// Threshold multiplier over the measured ambient level
const AMBIENT_MULTIPLIER: f32 = 1.5;

/// Analysis frame length (30ms at 16kHz)
const FRAME_SAMPLES: usize = 480;

/// Timing parameters for one listening window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointConfig {
    /// Ambient noise measurement before listening
    pub calibration: Duration,
    /// How long to wait for speech to start
    pub start_timeout: Duration,
    /// Silence that ends an utterance
    pub trailing_silence: Duration,
    /// Longest utterance captured
    pub phrase_limit: Duration,
}

impl EndpointConfig {
    /// Default timings with the given start timeout
    #[must_use]
    pub const fn with_timeout(start_timeout: Duration) -> Self {
        Self {
            calibration: Duration::from_secs(1),
            start_timeout,
            trailing_silence: Duration::from_millis(800),
            phrase_limit: Duration::from_secs(15),
        }
    }

    /// Upper bound on the whole listening window
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        self.calibration + self.start_timeout + self.phrase_limit
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }
}

/// Detector progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointState {
    /// Measuring ambient noise
    Calibrating,
    /// Waiting for speech to start
    Waiting,
    /// Capturing an utterance
    Speaking,
    /// Utterance captured
    Complete,
    /// No speech before the start timeout
    TimedOut,
}

/// Finds the start and end of one spoken utterance
#[derive(Debug)]
pub struct EndpointDetector {
    state: EndpointState,
    calibration_samples: usize,
    timeout_samples: usize,
    silence_samples: usize,
    phrase_samples: usize,
    ambient_sum: f32,
    ambient_count: usize,
    threshold: f32,
    waited: usize,
    silence_counter: usize,
    speech_buffer: Vec<f32>,
}

impl EndpointDetector {
    /// Create a detector for samples at `sample_rate`
    #[must_use]
    pub fn new(config: EndpointConfig, sample_rate: u32) -> Self {
        let calibration_samples = samples_for(config.calibration, sample_rate);
        Self {
            state: if calibration_samples == 0 {
                EndpointState::Waiting
            } else {
                EndpointState::Calibrating
            },
            calibration_samples,
            timeout_samples: samples_for(config.start_timeout, sample_rate),
            silence_samples: samples_for(config.trailing_silence, sample_rate),
            phrase_samples: samples_for(config.phrase_limit, sample_rate),
            ambient_sum: 0.0,
            ambient_count: 0,
            threshold: ENERGY_FLOOR,
            waited: 0,
            silence_counter: 0,
            speech_buffer: Vec::new(),
        }
    }

    /// Feed captured samples and return the resulting state
    ///
    /// Input after `Complete` or `TimedOut` is ignored.
    pub fn process(&mut self, samples: &[f32]) -> EndpointState {
        for frame in samples.chunks(FRAME_SAMPLES) {
            if self.is_finished() {
                break;
            }
            self.process_frame(frame);
        }
        self.state
    }

    fn process_frame(&mut self, frame: &[f32]) {
        let energy = calculate_energy(frame);

        match self.state {
            EndpointState::Calibrating => {
                self.ambient_sum += energy * energy * frame_len(frame);
                self.ambient_count += frame.len();

                if self.ambient_count >= self.calibration_samples {
                    #[allow(clippy::cast_precision_loss)]
                    let ambient = (self.ambient_sum / self.ambient_count as f32).sqrt();
                    self.threshold = (ambient * AMBIENT_MULTIPLIER).max(ENERGY_FLOOR);
                    self.state = EndpointState::Waiting;
                    tracing::debug!(ambient, threshold = self.threshold, "calibrated");
                }
            }
            EndpointState::Waiting => {
                if energy > self.threshold {
                    self.state = EndpointState::Speaking;
                    self.speech_buffer.extend_from_slice(frame);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                    return;
                }

                self.waited += frame.len();
                if self.waited >= self.timeout_samples {
                    self.state = EndpointState::TimedOut;
                    tracing::debug!("no speech before timeout");
                }
            }
            EndpointState::Speaking => {
                self.speech_buffer.extend_from_slice(frame);

                if energy > self.threshold {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += frame.len();
                }

                if self.silence_counter >= self.silence_samples
                    || self.speech_buffer.len() >= self.phrase_samples
                {
                    self.state = EndpointState::Complete;
                    tracing::debug!(samples = self.speech_buffer.len(), "utterance complete");
                }
            }
            EndpointState::Complete | EndpointState::TimedOut => {}
        }
    }

    /// Whether the detector reached a terminal state
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.state, EndpointState::Complete | EndpointState::TimedOut)
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> EndpointState {
        self.state
    }

    /// Energy above which a frame counts as speech
    #[must_use]
    pub const fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Take the captured utterance, clearing it
    pub fn take_utterance(&mut self) -> Vec<f32> {
        std::mem::take(&mut self.speech_buffer)
    }
}

#[allow(clippy::cast_precision_loss)]
fn frame_len(frame: &[f32]) -> f32 {
    frame.len() as f32
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * f64::from(sample_rate)) as usize
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 16000;

    fn config() -> EndpointConfig {
        EndpointConfig {
            calibration: Duration::from_millis(300),
            start_timeout: Duration::from_secs(1),
            trailing_silence: Duration::from_millis(300),
            phrase_limit: Duration::from_secs(2),
        }
    }

    fn tone(seconds: f32, amplitude: f32) -> Vec<f32> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let n = (seconds * 16000.0) as usize;
        (0..n)
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect()
    }

    #[test]
    fn test_energy_calculation() {
        assert!(calculate_energy(&[0.0; 100]) < 0.001);
        assert!(calculate_energy(&[0.5; 100]) > 0.4);
        assert!(calculate_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn test_calibration_raises_threshold_over_noise() {
        let mut detector = EndpointDetector::new(config(), RATE);
        assert_eq!(detector.process(&tone(0.3, 0.1)), EndpointState::Waiting);
        assert!((detector.threshold() - 0.15).abs() < 0.01);
    }

    #[test]
    fn test_quiet_room_uses_floor() {
        let mut detector = EndpointDetector::new(config(), RATE);
        detector.process(&tone(0.3, 0.0));
        assert!((detector.threshold() - ENERGY_FLOOR).abs() < f32::EPSILON);
    }

    #[test]
    fn test_times_out_without_speech() {
        let mut detector = EndpointDetector::new(config(), RATE);
        detector.process(&tone(0.3, 0.0));
        assert_eq!(detector.process(&tone(0.5, 0.0)), EndpointState::Waiting);
        assert_eq!(detector.process(&tone(0.6, 0.0)), EndpointState::TimedOut);
        assert!(detector.take_utterance().is_empty());
    }

    #[test]
    fn test_utterance_ends_after_silence() {
        let mut detector = EndpointDetector::new(config(), RATE);
        detector.process(&tone(0.3, 0.0));
        assert_eq!(detector.process(&tone(0.5, 0.3)), EndpointState::Speaking);
        assert_eq!(detector.process(&tone(0.4, 0.0)), EndpointState::Complete);

        let utterance = detector.take_utterance();
        assert!(utterance.len() >= 8000);
        // Further input is ignored once complete
        assert_eq!(detector.process(&tone(0.5, 0.3)), EndpointState::Complete);
    }

    #[test]
    fn test_phrase_limit_caps_capture() {
        let mut detector = EndpointDetector::new(config(), RATE);
        detector.process(&tone(0.3, 0.0));
        assert_eq!(detector.process(&tone(3.0, 0.3)), EndpointState::Complete);
        assert!(detector.take_utterance().len() <= 32000 + FRAME_SAMPLES);
    }
}
