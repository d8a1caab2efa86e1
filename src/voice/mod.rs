//! Voice processing module
//!
//! Input side: capture, endpoint detection, transcription.
//! Output side: synthesis, decoding, one-at-a-time playback.

mod capture;
mod endpoint;
mod playback;
mod player;
mod recognizer;
mod stt;
mod tts;

pub use capture::{
    AudioSource, InputStream, MicrophoneSource, MicrophoneStream, SAMPLE_RATE, samples_to_wav,
};
pub use endpoint::{EndpointConfig, EndpointDetector, EndpointState, calculate_energy};
pub use playback::{
    AudioOutput, CpalOutput, CpalPlayback, DecodedAudio, PlaybackHandle, decode, decode_mp3,
    decode_wav,
};
pub use player::{AudioJob, AudioPlayer, PlaybackOutcome};
pub use recognizer::{Recognizer, SpeechRecognizer};
pub use stt::{SpeechToText, Transcriber};
pub use tts::{
    AudioArtifact, EdgeTts, HttpTts, HttpTtsProvider, SpeechSynthesizer, artifact_path, sanitize,
    synthesizer_from_config,
};
