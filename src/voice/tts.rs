//! Text-to-speech (TTS) processing
//!
//! Every synthesis writes a fresh `reply-<uuid>.mp3` artifact in the
//! configured directory. The file lives as long as its [`AudioArtifact`].

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ApiKeys, TtsProviderKind, VoiceConfig};
use crate::{Error, Result};

/// A synthesized speech file on disk
///
/// The file is deleted when the artifact is dropped, including when the task
/// holding it is aborted. [`AudioArtifact::into_path`] keeps it.
#[derive(Debug, PartialEq, Eq)]
pub struct AudioArtifact {
    path: PathBuf,
    keep: bool,
}

impl AudioArtifact {
    /// Take ownership of the file at `path`, which may not exist yet
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            keep: false,
        }
    }

    /// Location of the file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take the path; the file is no longer deleted
    #[must_use]
    pub fn into_path(mut self) -> PathBuf {
        self.keep = true;
        std::mem::take(&mut self.path)
    }
}

impl Drop for AudioArtifact {
    fn drop(&mut self) {
        if self.keep {
            return;
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::trace!(path = %self.path.display(), "artifact removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove artifact"
                );
            }
        }
    }
}

/// Converts text into a playable audio artifact
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` with `voice`
    ///
    /// # Errors
    ///
    /// Returns error if the engine fails or there is nothing to say
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioArtifact>;
}

/// Remove quote characters before text reaches an external engine
#[must_use]
pub fn sanitize(text: &str) -> String {
    text.chars().filter(|c| !matches!(c, '"' | '\'')).collect()
}

/// Unique artifact path inside `dir`
#[must_use]
pub fn artifact_path(dir: &Path) -> PathBuf {
    dir.join(format!("reply-{}.mp3", uuid::Uuid::new_v4()))
}

fn prepare_text(text: &str) -> Result<String> {
    let text = sanitize(text);
    if text.trim().is_empty() {
        return Err(Error::Tts("nothing to synthesize".to_string()));
    }
    Ok(text)
}

/// Microsoft Edge neural voices via the `edge-tts` command
#[derive(Debug, Clone)]
pub struct EdgeTts {
    program: PathBuf,
    artifact_dir: PathBuf,
}

impl EdgeTts {
    /// Use `program` as the `edge-tts` executable
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, artifact_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            artifact_dir: artifact_dir.into(),
        }
    }

    /// Locate `edge-tts`, preferring an explicit path over `PATH` lookup
    ///
    /// # Errors
    ///
    /// Returns error if the executable cannot be found
    pub fn locate(explicit: Option<&Path>, artifact_dir: impl Into<PathBuf>) -> Result<Self> {
        let program = match explicit {
            Some(path) => path.to_path_buf(),
            None => which::which("edge-tts").map_err(|e| {
                Error::Tts(format!(
                    "edge-tts not found on PATH ({e}); install with `pip install edge-tts`"
                ))
            })?,
        };

        tracing::debug!(program = %program.display(), "using edge-tts");
        Ok(Self::new(program, artifact_dir))
    }

    /// Path of the executable
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioArtifact> {
        let text = prepare_text(text)?;
        // Partial output is removed on failure or cancellation
        let artifact = AudioArtifact::new(artifact_path(&self.artifact_dir));

        // Arguments go straight to the child process, never through a shell
        let output = tokio::process::Command::new(&self.program)
            .arg("--voice")
            .arg(voice)
            .arg("--text")
            .arg(&text)
            .arg("--write-media")
            .arg(artifact.path())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| Error::Tts(format!("failed to run edge-tts: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Tts(format!(
                "edge-tts exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        tracing::debug!(voice, path = %artifact.path().display(), "speech synthesized");
        Ok(artifact)
    }
}

/// Hosted TTS backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HttpTtsProvider {
    OpenAi,
    ElevenLabs,
}

/// Synthesizes speech through a hosted API
///
/// The voice passed to `synthesize` is the provider's voice name
/// (`OpenAI`) or voice id (`ElevenLabs`).
pub struct HttpTts {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: HttpTtsProvider,
    artifact_dir: PathBuf,
}

impl HttpTts {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, model: String, artifact_dir: PathBuf) -> Result<Self> {
        Self::new(HttpTtsProvider::OpenAi, api_key, model, artifact_dir)
    }

    /// Create a new TTS instance using `ElevenLabs`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, model: String, artifact_dir: PathBuf) -> Result<Self> {
        Self::new(HttpTtsProvider::ElevenLabs, api_key, model, artifact_dir)
    }

    fn new(
        provider: HttpTtsProvider,
        api_key: String,
        model: String,
        artifact_dir: PathBuf,
    ) -> Result<Self> {
        if api_key.is_empty() {
            let name = match provider {
                HttpTtsProvider::OpenAi => "OpenAI",
                HttpTtsProvider::ElevenLabs => "ElevenLabs",
            };
            return Err(Error::Config(format!("{name} API key required for TTS")));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider,
            artifact_dir,
        })
    }

    /// The configured provider
    #[must_use]
    pub const fn provider(&self) -> HttpTtsProvider {
        self.provider
    }

    async fn synthesize_openai(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            response_format: &'a str,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice,
            response_format: "mp3",
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        read_audio(response, "OpenAI").await
    }

    async fn synthesize_elevenlabs(&self, text: &str, voice: &str) -> Result<Vec<u8>> {
        #[derive(serde::Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
        }

        let request = ElevenLabsRequest {
            text,
            model_id: &self.model,
        };

        let response = self
            .client
            .post(format!("https://api.elevenlabs.io/v1/text-to-speech/{voice}"))
            .header("xi-api-key", &self.api_key)
            .header("Accept", "audio/mpeg")
            .json(&request)
            .send()
            .await?;

        read_audio(response, "ElevenLabs").await
    }
}

#[async_trait]
impl SpeechSynthesizer for HttpTts {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioArtifact> {
        let text = prepare_text(text)?;

        let audio = match self.provider {
            HttpTtsProvider::OpenAi => self.synthesize_openai(&text, voice).await?,
            HttpTtsProvider::ElevenLabs => self.synthesize_elevenlabs(&text, voice).await?,
        };

        let artifact = AudioArtifact::new(artifact_path(&self.artifact_dir));
        tokio::fs::write(artifact.path(), &audio).await?;

        tracing::debug!(
            voice,
            bytes = audio.len(),
            path = %artifact.path().display(),
            "speech synthesized"
        );
        Ok(artifact)
    }
}

async fn read_audio(response: reqwest::Response, api: &str) -> Result<Vec<u8>> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(Error::Tts(format!("{api} TTS error {status}: {body}")));
    }

    Ok(response.bytes().await?.to_vec())
}

/// Build the configured synthesizer
///
/// # Errors
///
/// Returns error if the engine is not installed or its API key is missing
pub fn synthesizer_from_config(
    voice: &VoiceConfig,
    keys: &ApiKeys,
) -> Result<Arc<dyn SpeechSynthesizer>> {
    let dir = voice.artifact_dir.clone();

    Ok(match voice.tts_provider {
        TtsProviderKind::Edge => Arc::new(EdgeTts::locate(voice.edge_tts_path.as_deref(), dir)?),
        TtsProviderKind::OpenAi => Arc::new(HttpTts::new_openai(
            keys.openai.clone().unwrap_or_default(),
            voice.tts_model.clone(),
            dir,
        )?),
        TtsProviderKind::ElevenLabs => Arc::new(HttpTts::new_elevenlabs(
            keys.elevenlabs.clone().unwrap_or_default(),
            voice.tts_model.clone(),
            dir,
        )?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_quotes() {
        assert_eq!(sanitize(r#"She said "it's fine""#), "She said its fine");
        assert_eq!(sanitize("plain"), "plain");
    }

    #[test]
    fn test_artifact_paths_are_unique() {
        let dir = Path::new("/tmp/sora");
        let a = artifact_path(dir);
        let b = artifact_path(dir);
        assert_ne!(a, b);
        assert!(a.starts_with(dir));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp3"));
    }

    #[test]
    fn test_quote_only_text_is_rejected() {
        assert!(matches!(prepare_text(r#""' "'"#), Err(Error::Tts(_))));
    }

    #[test]
    fn test_http_tts_requires_key() {
        assert!(HttpTts::new_openai(String::new(), "tts-1".into(), PathBuf::from("/tmp")).is_err());
        let tts = HttpTts::new_elevenlabs("k".into(), "m".into(), PathBuf::from("/tmp")).unwrap();
        assert_eq!(tts.provider(), HttpTtsProvider::ElevenLabs);
    }

    #[test]
    fn test_edge_tts_explicit_path() {
        let tts = EdgeTts::locate(Some(Path::new("/opt/edge-tts")), "/tmp").unwrap();
        assert_eq!(tts.program(), Path::new("/opt/edge-tts"));
    }

    #[tokio::test]
    async fn test_edge_tts_missing_program_fails() {
        let dir = tempfile::tempdir().unwrap();
        let tts = EdgeTts::new(dir.path().join("no-such-edge-tts"), dir.path());
        let result = tts.synthesize("hello", "en-US-AriaNeural").await;
        assert!(matches!(result, Err(Error::Tts(_))));
    }

    #[test]
    fn test_dropped_artifact_deletes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reply.mp3");
        std::fs::write(&path, b"mp3").unwrap();

        drop(AudioArtifact::new(&path));
        assert!(!path.exists());

        // Dropping an artifact whose file never appeared is fine
        drop(AudioArtifact::new(&path));
    }

    #[test]
    fn test_into_path_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.mp3");
        std::fs::write(&path, b"mp3").unwrap();

        assert_eq!(AudioArtifact::new(&path).into_path(), path);
        assert!(path.exists());
    }

    /// Script standing in for `edge-tts`; `$6` is the `--write-media` path
    #[cfg(unix)]
    fn fake_edge_tts(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let program = dir.join("edge-tts");
        std::fs::write(&program, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&program, std::fs::Permissions::from_mode(0o755)).unwrap();
        program
    }

    #[cfg(unix)]
    fn media_files(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".mp3"))
            .count()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_edge_tts_failure_removes_partial_output() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let program = fake_edge_tts(bin.path(), r#"printf partial > "$6"; exit 1"#);

        let tts = EdgeTts::new(program, out.path());
        let result = tts.synthesize("hello", "en-US-AriaNeural").await;

        assert!(matches!(result, Err(Error::Tts(_))));
        assert_eq!(media_files(out.path()), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_synthesis_removes_partial_output() {
        let bin = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let program = fake_edge_tts(bin.path(), r#"printf partial > "$6"; sleep 30"#);

        let tts = EdgeTts::new(program, out.path());
        let pending = tts.synthesize("hello", "en-US-AriaNeural");
        let waited = tokio::time::timeout(std::time::Duration::from_millis(300), pending).await;

        assert!(waited.is_err());
        assert_eq!(media_files(out.path()), 0);
    }
}
