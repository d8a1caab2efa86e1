//! Audio playback to speakers

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Extra time allowed past the decoded duration before a stream is
/// treated as finished
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// The audio output device
///
/// `open` and every call on the returned handle happen on one blocking
/// thread.
pub trait AudioOutput: Send + Sync {
    /// Decode `path` and start playing it
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be decoded or the device cannot open
    fn open(&self, path: &Path) -> Result<Box<dyn PlaybackHandle>>;
}

/// A started playback
pub trait PlaybackHandle {
    /// Whether audio is still playing
    fn is_busy(&self) -> bool;

    /// Stop immediately and release the device
    fn stop(&mut self);
}

/// Decoded mono PCM
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playing time of the samples
    #[must_use]
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let samples = u64::try_from(self.samples.len()).unwrap_or(u64::MAX);
        Duration::from_millis(samples.saturating_mul(1000) / u64::from(self.sample_rate))
    }
}

/// Default output device through cpal
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalOutput;

impl AudioOutput for CpalOutput {
    fn open(&self, path: &Path) -> Result<Box<dyn PlaybackHandle>> {
        let data = std::fs::read(path)?;
        let audio = decode(&data)?;
        Ok(Box::new(CpalPlayback::start(audio)?))
    }
}

/// Playback on a live cpal stream
pub struct CpalPlayback {
    stream: Option<Stream>,
    finished: Arc<AtomicBool>,
    deadline: Instant,
}

impl CpalPlayback {
    /// Open the default output device at the audio's sample rate and play
    ///
    /// # Errors
    ///
    /// Returns error if no output device supports the sample rate
    pub fn start(audio: DecodedAudio) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        let rate = SampleRate(audio.sample_rate);
        let find = |channels: u16| {
            device.supported_output_configs().ok()?.find(|c| {
                c.channels() == channels
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= rate
                    && c.max_sample_rate() >= rate
            })
        };

        let supported = find(1)
            .or_else(|| find(2))
            .ok_or_else(|| {
                Error::Audio(format!("no output config for {} Hz", audio.sample_rate))
            })?;

        let config: StreamConfig = supported.with_sample_rate(rate).config();
        let channels = usize::from(config.channels.max(1));

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = audio.sample_rate,
            channels,
            "audio playback initialized"
        );

        let deadline = Instant::now() + audio.duration() + DRAIN_GRACE;
        let samples = audio.samples;
        let position = AtomicUsize::new(0);
        let finished = Arc::new(AtomicBool::new(samples.is_empty()));
        let done = Arc::clone(&finished);

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    for frame in data.chunks_mut(channels) {
                        let pos = position.load(Ordering::Relaxed);
                        let sample = if let Some(&s) = samples.get(pos) {
                            position.store(pos + 1, Ordering::Relaxed);
                            s
                        } else {
                            done.store(true, Ordering::SeqCst);
                            0.0
                        };
                        frame.fill(sample);
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
            finished,
            deadline,
        })
    }
}

impl PlaybackHandle for CpalPlayback {
    fn is_busy(&self) -> bool {
        self.stream.is_some()
            && !self.finished.load(Ordering::SeqCst)
            && Instant::now() < self.deadline
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            tracing::debug!("playback stopped");
        }
    }
}

/// Decode WAV (by RIFF header) or MP3 bytes
///
/// # Errors
///
/// Returns error if the data is not valid audio
pub fn decode(data: &[u8]) -> Result<DecodedAudio> {
    if data.starts_with(b"RIFF") {
        decode_wav(data)
    } else {
        decode_mp3(data)
    }
}

/// Decode MP3 bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if a frame cannot be decoded
pub fn decode_mp3(mp3_data: &[u8]) -> Result<DecodedAudio> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let channels = frame.channels.max(1);
                samples.extend(frame.data.chunks(channels).map(|chunk| {
                    #[allow(clippy::cast_precision_loss)]
                    let n = chunk.len() as f32;
                    chunk.iter().map(|&s| f32::from(s) / 32768.0).sum::<f32>() / n
                }));
            }
            Err(minimp3::Error::Eof) => break,
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Playback("no MP3 frames found".to_string()));
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

/// Decode WAV bytes to mono f32 samples
///
/// # Errors
///
/// Returns error if the data is not a readable WAV stream
pub fn decode_wav(wav_data: &[u8]) -> Result<DecodedAudio> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    #[allow(clippy::cast_precision_loss)]
                    s.map(|v| v as f32 / scale)
                })
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?
        }
    };

    let channels = usize::from(spec.channels.max(1));
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| {
                #[allow(clippy::cast_precision_loss)]
                let n = frame.len() as f32;
                frame.iter().sum::<f32>() / n
            })
            .collect()
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: spec.sample_rate,
    })
}
