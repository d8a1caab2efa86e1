//! Audio capture from microphone

use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, Stream, StreamConfig};

use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Something that can open a live input stream
///
/// The returned stream is used on the thread that opened it.
pub trait AudioSource: Send + Sync {
    /// Open the source and start capturing
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available
    fn open(&self) -> Result<Box<dyn InputStream>>;
}

/// An open capture stream delivering mono samples
pub trait InputStream {
    /// Samples captured since the last call
    fn take_buffer(&mut self) -> Vec<f32>;

    /// Sample rate of delivered samples
    fn sample_rate(&self) -> u32;
}

/// Default system microphone
#[derive(Debug, Clone, Copy, Default)]
pub struct MicrophoneSource;

impl AudioSource for MicrophoneSource {
    fn open(&self) -> Result<Box<dyn InputStream>> {
        Ok(Box::new(MicrophoneStream::start()?))
    }
}

/// Live capture from the default input device
pub struct MicrophoneStream {
    _stream: Stream,
    buffer: Arc<Mutex<Vec<f32>>>,
    sample_rate: u32,
}

impl MicrophoneStream {
    /// Open the default input device and start capturing
    ///
    /// Prefers a 16kHz mono config; otherwise uses the device default and
    /// downmixes to mono.
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn start() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let preferred = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.sample_format() == SampleFormat::F32
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .map(|c| c.with_sample_rate(SampleRate(SAMPLE_RATE)));

        let supported = match preferred {
            Some(config) => config,
            None => device
                .default_input_config()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };

        if supported.sample_format() != SampleFormat::F32 {
            return Err(Error::Audio(format!(
                "unsupported input sample format {:?}",
                supported.sample_format()
            )));
        }

        let config: StreamConfig = supported.config();
        let channels = usize::from(config.channels.max(1));
        let sample_rate = config.sample_rate.0;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate,
            channels,
            "audio capture initialized"
        );

        let buffer = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&buffer);

        let stream = device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let mut buf = sink.lock().unwrap_or_else(PoisonError::into_inner);
                    if channels == 1 {
                        buf.extend_from_slice(data);
                    } else {
                        buf.extend(downmix(data, channels));
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))?;

        stream.play().map_err(|e| Error::Audio(e.to_string()))?;
        tracing::debug!("audio capture started");

        Ok(Self {
            _stream: stream,
            buffer,
            sample_rate,
        })
    }
}

impl InputStream for MicrophoneStream {
    fn take_buffer(&mut self) -> Vec<f32> {
        let mut buf = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *buf)
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        tracing::debug!("audio capture stopped");
    }
}

/// Average interleaved frames down to one channel
#[allow(clippy::cast_precision_loss)]
fn downmix(data: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    data.chunks(channels)
        .map(move |frame| frame.iter().sum::<f32>() / frame.len() as f32)
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
