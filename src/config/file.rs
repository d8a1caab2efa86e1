//! TOML configuration file loading
//!
//! Supports `~/.config/sora/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct SoraConfigFile {
    /// LLM configuration
    #[serde(default)]
    pub llm: LlmFileConfig,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Web search configuration
    #[serde(default)]
    pub search: SearchFileConfig,

    /// Conversation context configuration
    #[serde(default)]
    pub context: ContextFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,
}

/// LLM-related configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Ollama base URL
    pub base_url: Option<String>,

    /// Model identifier (e.g. "llama3.2")
    pub model: Option<String>,

    /// Selectable model identifiers
    pub models: Option<Vec<String>>,

    /// System instruction sent with every turn
    pub system_prompt: Option<String>,
}

/// A voice entry as written in the file
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceProfileFileConfig {
    pub id: String,
    pub label: Option<String>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Voice identifier (e.g. "en-US-AriaNeural")
    pub voice: Option<String>,

    /// Selectable voices
    pub voices: Option<Vec<VoiceProfileFileConfig>>,

    /// Start muted
    pub muted: Option<bool>,

    /// TTS provider ("edge", "openai", "elevenlabs")
    pub tts_provider: Option<String>,

    /// Path to the edge-tts executable
    pub edge_tts_path: Option<String>,

    /// TTS model for HTTP providers (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// STT provider ("whisper", "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// Seconds to wait for speech to start
    pub listen_timeout_secs: Option<f64>,

    /// Playback poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Directory for synthesized speech files
    pub artifact_dir: Option<String>,
}

/// Web search configuration
#[derive(Debug, Default, Deserialize)]
pub struct SearchFileConfig {
    /// Provider ("duckduckgo", "brave", "serper")
    pub provider: Option<String>,

    /// Words that trigger a lookup
    pub triggers: Option<Vec<String>>,

    /// Results requested per lookup
    pub max_results: Option<usize>,
}

/// Conversation context configuration
#[derive(Debug, Default, Deserialize)]
pub struct ContextFileConfig {
    /// History turns included in each request
    pub history_window: Option<usize>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub elevenlabs: Option<String>,
    pub deepgram: Option<String>,
    pub brave: Option<String>,
    pub serper: Option<String>,
}

/// Load the TOML config file from `path`, or from the standard path
///
/// Returns `SoraConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file(path: Option<&Path>) -> SoraConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return SoraConfigFile::default();
    };

    if !path.exists() {
        return SoraConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config_file(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                SoraConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            SoraConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if the content is not valid TOML for the schema
pub fn parse_config_file(content: &str) -> crate::Result<SoraConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/sora/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("sora").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_partial_file() {
        let file = parse_config_file(
            r#"
            [llm]
            model = "mistral"

            [voice]
            muted = true
            voices = [{ id = "en-GB-SoniaNeural", label = "Female (UK)" }]

            [search]
            triggers = ["forecast"]
            "#,
        )
        .unwrap();

        assert_eq!(file.llm.model.as_deref(), Some("mistral"));
        assert!(file.llm.base_url.is_none());
        assert_eq!(file.voice.muted, Some(true));
        assert_eq!(file.voice.voices.unwrap()[0].id, "en-GB-SoniaNeural");
        assert_eq!(file.search.triggers.unwrap(), vec!["forecast"]);
        assert!(file.context.history_window.is_none());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let file = load_config_file(Some(&dir.path().join("absent.toml")));
        assert!(file.llm.model.is_none());
    }

    #[test]
    fn test_invalid_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm\nmodel = ").unwrap();

        let file = load_config_file(Some(&path));
        assert!(file.llm.model.is_none());
    }
}
