//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::config::{ApiKeys, SttProviderKind, VoiceConfig};
use crate::{Error, Result};

/// Turns recorded speech into text
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio bytes
    ///
    /// # Errors
    ///
    /// Returns error if transcription fails
    async fn transcribe(&self, wav: &[u8]) -> Result<String>;
}

/// Response from OpenAI Whisper transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
}

impl DeepgramResponse {
    fn into_transcript(self) -> String {
        self.results
            .channels
            .into_iter()
            .next()
            .and_then(|c| c.alternatives.into_iter().next())
            .map(|a| a.transcript)
            .unwrap_or_default()
    }
}

/// Transcribes speech through a hosted STT API
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProviderKind,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        Self::new(SttProviderKind::Whisper, api_key, model)
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        Self::new(SttProviderKind::Deepgram, api_key, model)
    }

    /// Build the configured provider
    ///
    /// # Errors
    ///
    /// Returns error if the provider's API key is not set
    pub fn from_config(voice: &VoiceConfig, keys: &ApiKeys) -> Result<Self> {
        let key = match voice.stt_provider {
            SttProviderKind::Whisper => keys.openai.clone(),
            SttProviderKind::Deepgram => keys.deepgram.clone(),
        };
        Self::new(voice.stt_provider, key.unwrap_or_default(), voice.stt_model.clone())
    }

    fn new(provider: SttProviderKind, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            let name = match provider {
                SttProviderKind::Whisper => "OpenAI API key required for Whisper",
                SttProviderKind::Deepgram => "Deepgram API key required",
            };
            return Err(Error::Config(name.to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
        })
    }

    /// The configured provider
    #[must_use]
    pub const fn provider(&self) -> SttProviderKind {
        self.provider
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let response = check_status(response, "Whisper").await?;
        let result: WhisperResponse = response.json().await?;
        Ok(result.text)
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8]) -> Result<String> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let response = self
            .client
            .post("https://api.deepgram.com/v1/listen")
            .query(&[("model", self.model.as_str()), ("punctuate", "true")])
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await?;

        let response = check_status(response, "Deepgram").await?;
        let result: DeepgramResponse = response.json().await?;
        Ok(result.into_transcript())
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8]) -> Result<String> {
        let transcript = match self.provider {
            SttProviderKind::Whisper => self.transcribe_whisper(wav).await?,
            SttProviderKind::Deepgram => self.transcribe_deepgram(wav).await?,
        };

        tracing::info!(transcript = %transcript, "transcription complete");
        Ok(transcript)
    }
}

async fn check_status(response: reqwest::Response, api: &str) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::error!(status = %status, body = %body, api, "transcription API error");
    Err(Error::Stt(format!("{api} API error {status}: {body}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_key_rejected() {
        assert!(SpeechToText::new_whisper(String::new(), "whisper-1".into()).is_err());
        assert!(SpeechToText::new_deepgram("k".into(), "nova-2".into()).is_ok());
    }

    #[test]
    fn test_from_config_picks_provider_key() {
        let mut voice = crate::config::Config::default().voice;
        voice.stt_provider = SttProviderKind::Deepgram;
        let keys = ApiKeys {
            deepgram: Some("dg".into()),
            ..ApiKeys::default()
        };

        let stt = SpeechToText::from_config(&voice, &keys).unwrap();
        assert_eq!(stt.provider(), SttProviderKind::Deepgram);
        assert!(SpeechToText::from_config(&voice, &ApiKeys::default()).is_err());
    }

    #[test]
    fn test_deepgram_transcript_extraction() {
        let response: DeepgramResponse = serde_json::from_str(
            r#"{"results":{"channels":[{"alternatives":[{"transcript":"hello there"}]}]}}"#,
        )
        .unwrap();
        assert_eq!(response.into_transcript(), "hello there");

        let empty: DeepgramResponse =
            serde_json::from_str(r#"{"results":{"channels":[]}}"#).unwrap();
        assert_eq!(empty.into_transcript(), "");
    }
}
