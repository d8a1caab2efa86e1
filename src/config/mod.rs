//! Configuration management for Sora
//!
//! Built-in defaults, overlaid by the optional TOML file, overlaid by
//! environment variables. CLI flags are applied last by the binary.

pub mod file;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::{Error, Result};
use file::SoraConfigFile;

/// Default model identifier
pub const DEFAULT_MODEL: &str = "llama3.2";

/// Default voice identifier
pub const DEFAULT_VOICE: &str = "en-US-AriaNeural";

/// Default Ollama endpoint
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Default system instruction
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are Sora. Helpful, friendly, female assistant.";

/// Sora configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Model chat configuration
    pub llm: LlmConfig,

    /// Voice input/output configuration
    pub voice: VoiceConfig,

    /// Web search configuration
    pub search: SearchConfig,

    /// Conversation context configuration
    pub context: ContextConfig,

    /// API keys
    pub api_keys: ApiKeys,
}

/// Model chat configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Ollama base URL
    pub base_url: String,

    /// Initially active model
    pub model: String,

    /// Selectable model identifiers
    pub models: Vec<String>,

    /// System instruction prepended to every request
    pub system_prompt: String,
}

/// A selectable voice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceProfile {
    /// Engine voice identifier
    pub id: String,
    /// Human-readable label
    pub label: String,
}

impl VoiceProfile {
    fn new(id: &str, label: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
        }
    }
}

/// Text-to-speech backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TtsProviderKind {
    /// `edge-tts` command line tool
    #[default]
    Edge,
    /// `OpenAI` speech API
    OpenAi,
    /// ElevenLabs speech API
    ElevenLabs,
}

impl FromStr for TtsProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "edge" | "edge-tts" => Ok(Self::Edge),
            "openai" => Ok(Self::OpenAi),
            "elevenlabs" => Ok(Self::ElevenLabs),
            other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
        }
    }
}

/// Speech-to-text backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SttProviderKind {
    /// `OpenAI` Whisper API
    #[default]
    Whisper,
    /// Deepgram API
    Deepgram,
}

impl FromStr for SttProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "whisper" | "openai" => Ok(Self::Whisper),
            "deepgram" => Ok(Self::Deepgram),
            other => Err(Error::Config(format!("unknown STT provider: {other}"))),
        }
    }
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Initially active voice
    pub voice: String,

    /// Selectable voices
    pub voices: Vec<VoiceProfile>,

    /// Start muted
    pub muted: bool,

    /// TTS backend
    pub tts_provider: TtsProviderKind,

    /// Explicit edge-tts executable; looked up on `PATH` when unset
    pub edge_tts_path: Option<PathBuf>,

    /// TTS model for HTTP providers
    pub tts_model: String,

    /// STT backend
    pub stt_provider: SttProviderKind,

    /// STT model
    pub stt_model: String,

    /// How long to wait for speech to start
    pub listen_timeout: Duration,

    /// Playback poll interval
    pub poll_interval: Duration,

    /// Directory for synthesized speech files
    pub artifact_dir: PathBuf,
}

/// Web search backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchProviderKind {
    /// DuckDuckGo instant answers (no key)
    #[default]
    DuckDuckGo,
    /// Brave Search API
    Brave,
    /// Serper (Google) API
    Serper,
}

impl FromStr for SearchProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "duckduckgo" | "ddg" => Ok(Self::DuckDuckGo),
            "brave" => Ok(Self::Brave),
            "serper" => Ok(Self::Serper),
            other => Err(Error::Config(format!("unknown search provider: {other}"))),
        }
    }
}

/// Web search configuration
#[derive(Debug, Clone)]
pub struct SearchConfig {
    /// Search backend
    pub provider: SearchProviderKind,

    /// Case-insensitive words that trigger a lookup
    pub triggers: Vec<String>,

    /// Results requested per lookup
    pub max_results: usize,
}

/// Conversation context configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// History turns included in each request (K)
    pub history_window: usize,
}

/// API keys for external services
#[derive(Clone, Default)]
pub struct ApiKeys {
    /// `OpenAI` API key (Whisper and TTS)
    pub openai: Option<String>,

    /// `ElevenLabs` API key
    pub elevenlabs: Option<String>,

    /// `Deepgram` API key
    pub deepgram: Option<String>,

    /// Brave Search API key
    pub brave: Option<String>,

    /// Serper API key
    pub serper: Option<String>,
}

// Keys never reach the log
impl std::fmt::Debug for ApiKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |key: &Option<String>| if key.is_some() { "set" } else { "unset" };
        f.debug_struct("ApiKeys")
            .field("openai", &set(&self.openai))
            .field("elevenlabs", &set(&self.elevenlabs))
            .field("deepgram", &set(&self.deepgram))
            .field("brave", &set(&self.brave))
            .field("serper", &set(&self.serper))
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                base_url: DEFAULT_OLLAMA_URL.to_string(),
                model: DEFAULT_MODEL.to_string(),
                models: vec![DEFAULT_MODEL.to_string(), "mistral".to_string()],
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            voice: VoiceConfig {
                voice: DEFAULT_VOICE.to_string(),
                voices: vec![
                    VoiceProfile::new("en-US-AriaNeural", "Female (US)"),
                    VoiceProfile::new("en-US-ChristopherNeural", "Male (US)"),
                    VoiceProfile::new("en-GB-SoniaNeural", "Female (UK)"),
                ],
                muted: false,
                tts_provider: TtsProviderKind::Edge,
                edge_tts_path: None,
                tts_model: "tts-1".to_string(),
                stt_provider: SttProviderKind::Whisper,
                stt_model: "whisper-1".to_string(),
                listen_timeout: Duration::from_secs(5),
                poll_interval: Duration::from_millis(100),
                artifact_dir: default_artifact_dir(),
            },
            search: SearchConfig {
                provider: SearchProviderKind::DuckDuckGo,
                triggers: vec![
                    "search".to_string(),
                    "news".to_string(),
                    "weather".to_string(),
                ],
                max_results: 1,
            },
            context: ContextConfig { history_window: 5 },
            api_keys: ApiKeys::default(),
        }
    }
}

/// Return the cache directory for synthesized speech
///
/// Uses `~/.cache/sora/speech/` on Linux
pub fn default_artifact_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "sora", "sora").map_or_else(
        || std::env::temp_dir().join("sora"),
        |d| d.cache_dir().join("speech"),
    )
}

impl Config {
    /// Load configuration from the standard locations and the environment
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or value is invalid
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(config_path);
        let config = Self::resolve(file, |key| std::env::var(key).ok())?;

        if let Err(e) = std::fs::create_dir_all(&config.voice.artifact_dir) {
            tracing::warn!(
                path = %config.voice.artifact_dir.display(),
                error = %e,
                "failed to create speech artifact directory"
            );
        }

        Ok(config)
    }

    /// Overlay a parsed file and an environment lookup on top of defaults
    ///
    /// # Errors
    ///
    /// Returns error if a provider name or value is invalid
    #[allow(clippy::needless_pass_by_value)]
    pub fn resolve(file: SoraConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        // LLM
        if let Some(url) = env("OLLAMA_HOST").or(file.llm.base_url) {
            config.llm.base_url = normalize_base_url(&url);
        }
        if let Some(models) = file.llm.models.filter(|m| !m.is_empty()) {
            config.llm.models = models;
        }
        if let Some(model) = env("SORA_MODEL").or(file.llm.model) {
            config.llm.model = model;
        }
        if let Some(prompt) = file.llm.system_prompt {
            config.llm.system_prompt = prompt;
        }

        // Voice
        if let Some(voices) = file.voice.voices.filter(|v| !v.is_empty()) {
            config.voice.voices = voices
                .into_iter()
                .map(|v| VoiceProfile {
                    label: v.label.unwrap_or_else(|| v.id.clone()),
                    id: v.id,
                })
                .collect();
        }
        if let Some(voice) = env("SORA_VOICE").or(file.voice.voice) {
            config.voice.voice = voice;
        }
        if let Some(muted) = env("SORA_MUTED").map(|v| parse_flag(&v)).or(file.voice.muted) {
            config.voice.muted = muted;
        }
        if let Some(provider) = env("SORA_TTS_PROVIDER").or(file.voice.tts_provider) {
            config.voice.tts_provider = provider.parse()?;
        }
        if let Some(path) = file.voice.edge_tts_path {
            config.voice.edge_tts_path = Some(PathBuf::from(path));
        }
        if let Some(model) = env("SORA_TTS_MODEL").or(file.voice.tts_model) {
            config.voice.tts_model = model;
        }
        if let Some(provider) = env("SORA_STT_PROVIDER").or(file.voice.stt_provider) {
            config.voice.stt_provider = provider.parse()?;
        }
        if let Some(model) = env("SORA_STT_MODEL").or(file.voice.stt_model) {
            config.voice.stt_model = model;
        }
        if let Some(secs) = file.voice.listen_timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::Config(format!("invalid listen timeout: {secs}")));
            }
            config.voice.listen_timeout = Duration::from_secs_f64(secs);
        }
        if let Some(ms) = file.voice.poll_interval_ms {
            config.voice.poll_interval = Duration::from_millis(ms.max(1));
        }
        if let Some(dir) = env("SORA_ARTIFACT_DIR").or(file.voice.artifact_dir) {
            config.voice.artifact_dir = PathBuf::from(dir);
        }

        // Search
        if let Some(provider) = env("SORA_SEARCH_PROVIDER").or(file.search.provider) {
            config.search.provider = provider.parse()?;
        }
        if let Some(triggers) = file.search.triggers {
            config.search.triggers = triggers.iter().map(|t| t.trim().to_lowercase()).collect();
        }
        if let Some(max) = file.search.max_results {
            config.search.max_results = max.max(1);
        }

        // Context
        if let Some(k) = file.context.history_window {
            if k == 0 {
                return Err(Error::Config(
                    "context.history_window must be at least 1".to_string(),
                ));
            }
            config.context.history_window = k;
        }

        // API keys: env wins over file
        config.api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(file.api_keys.openai),
            elevenlabs: env("ELEVENLABS_API_KEY").or(file.api_keys.elevenlabs),
            deepgram: env("DEEPGRAM_API_KEY").or(file.api_keys.deepgram),
            brave: env("BRAVE_API_KEY").or(file.api_keys.brave),
            serper: env("SERPER_API_KEY").or(file.api_keys.serper),
        };

        config.ensure_selected_listed();
        Ok(config)
    }

    /// Whether `model` is one of the selectable models
    #[must_use]
    pub fn has_model(&self, model: &str) -> bool {
        self.llm.models.iter().any(|m| m == model)
    }

    /// Whether `voice` is one of the selectable voices
    #[must_use]
    pub fn has_voice(&self, voice: &str) -> bool {
        self.voice.voices.iter().any(|v| v.id == voice)
    }

    /// Make sure the initially active model and voice are selectable
    pub fn ensure_selected_listed(&mut self) {
        if !self.has_model(&self.llm.model) {
            self.llm.models.push(self.llm.model.clone());
        }
        if !self.has_voice(&self.voice.voice) {
            let id = self.voice.voice.clone();
            self.voice.voices.push(VoiceProfile {
                label: id.clone(),
                id,
            });
        }
    }
}

/// Accept `host:port` as well as full URLs
fn normalize_base_url(url: &str) -> String {
    let url = url.trim().trim_end_matches('/');
    if url.contains("://") {
        url.to_string()
    } else {
        format!("http://{url}")
    }
}

fn parse_flag(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}
