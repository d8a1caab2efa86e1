//! Model chat service
//!
//! The orchestrator only sees [`ChatService`]: a lazy, finite,
//! non-restartable stream of content deltas per request.

mod ollama;

use async_trait::async_trait;
use futures::stream::BoxStream;

pub use ollama::OllamaClient;

use crate::Result;
use crate::session::Turn;

/// One incremental piece of a streamed reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatChunk {
    /// Text to append to the reply
    pub content: String,
}

impl ChatChunk {
    /// Create a chunk
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Stream of content deltas; an `Err` item is terminal
pub type ChatStream = BoxStream<'static, Result<ChatChunk>>;

/// A chat backend that streams replies
#[async_trait]
pub trait ChatService: Send + Sync {
    /// Open a streaming chat request
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started
    async fn stream_chat(&self, model: &str, messages: &[Turn]) -> Result<ChatStream>;
}
