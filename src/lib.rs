//! Sora - Conversational voice assistant
//!
//! This library provides the core of the Sora assistant:
//! - Response orchestration (streaming replies, status, turn lifecycle)
//! - Context assembly with live web-search augmentation
//! - Voice input (capture, endpointing, STT) and output (TTS, playback)
//! - Ollama chat streaming
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Display (terminal, ...)                 │
//! └────────────────────▲────────────────────────────────┘
//!                      │ render / update / status
//! ┌────────────────────┴────────────────────────────────┐
//! │                  Orchestrator                        │
//! │   Session  │  Context  │  Reply  │  Status          │
//! └──────┬──────────────┬───────────────────┬───────────┘
//!        │              │                   │
//! ┌──────▼─────┐ ┌──────▼──────┐ ┌──────────▼──────────┐
//! │ Recognizer │ │ Chat / Web  │ │ Synthesizer, Player │
//! │  mic, STT  │ │ Ollama, DDG │ │  edge-tts, cpal     │
//! └────────────┘ └─────────────┘ └─────────────────────┘
//! ```

pub mod config;
pub mod context;
pub mod display;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod session;
pub mod tools;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, TurnEvent, TurnId};
pub use session::{Role, SessionState, Turn};
