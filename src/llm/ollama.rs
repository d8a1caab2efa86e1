//! Ollama chat client
//!
//! Streams `/api/chat` responses, which arrive as newline-delimited JSON.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use super::{ChatChunk, ChatService, ChatStream};
use crate::session::Turn;
use crate::{Error, Result};

/// Client for a local or remote Ollama server
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Turn],
    stream: bool,
}

/// One NDJSON line of a streamed chat response
#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<LineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LineMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Debug, Deserialize)]
struct TagModel {
    name: String,
}

impl OllamaClient {
    /// Create a client for `base_url` (e.g. `http://localhost:11434`)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL of the server
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// List models installed on the server
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or answers with an error
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let tags: TagList = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl ChatService for OllamaClient {
    async fn stream_chat(&self, model: &str, messages: &[Turn]) -> Result<ChatStream> {
        tracing::debug!(model, messages = messages.len(), "opening chat stream");

        let request = ChatRequest {
            model,
            messages,
            stream: true,
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Generation(format!("ollama not reachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Generation(format!("ollama error {status}: {body}")));
        }

        Ok(decode_ndjson(response.bytes_stream()))
    }
}

/// Outcome of parsing one NDJSON line
#[derive(Debug, PartialEq, Eq)]
enum LineEvent {
    Chunk(ChatChunk),
    Empty,
    Done(Option<ChatChunk>),
    Failed(String),
}

fn parse_line(line: &[u8]) -> LineEvent {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return LineEvent::Empty;
    }

    let parsed: ChatLine = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(e) => return LineEvent::Failed(format!("malformed stream line: {e}")),
    };

    if let Some(error) = parsed.error {
        return LineEvent::Failed(error);
    }

    let chunk = parsed
        .message
        .map(|m| m.content)
        .filter(|c| !c.is_empty())
        .map(ChatChunk::new);

    match (parsed.done, chunk) {
        (true, chunk) => LineEvent::Done(chunk),
        (false, Some(chunk)) => LineEvent::Chunk(chunk),
        (false, None) => LineEvent::Empty,
    }
}

struct NdjsonState {
    source: futures::stream::BoxStream<'static, Result<Vec<u8>>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<ChatChunk>>,
    finished: bool,
}

impl NdjsonState {
    /// Parse every complete line in the buffer; at end of input, the remainder too
    fn drain_lines(&mut self, at_end: bool) {
        while !self.finished {
            let line: Vec<u8> = match self.buffer.iter().position(|b| *b == b'\n') {
                Some(pos) => self.buffer.drain(..=pos).collect(),
                None if at_end && !self.buffer.is_empty() => std::mem::take(&mut self.buffer),
                None => return,
            };

            match parse_line(&line) {
                LineEvent::Chunk(chunk) => self.pending.push_back(Ok(chunk)),
                LineEvent::Empty => {}
                LineEvent::Done(chunk) => {
                    if let Some(chunk) = chunk {
                        self.pending.push_back(Ok(chunk));
                    }
                    self.finished = true;
                }
                LineEvent::Failed(message) => {
                    self.pending.push_back(Err(Error::Generation(message)));
                    self.finished = true;
                }
            }
        }
    }
}

/// Turn a byte stream of NDJSON lines into content deltas
///
/// Lines may be split across network chunks; bytes are buffered until a
/// newline arrives so multi-byte characters are never cut.
pub(crate) fn decode_ndjson<S, B, E>(source: S) -> ChatStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]>,
    E: Into<Error>,
{
    let state = NdjsonState {
        source: source
            .map(|item| item.map(|b| b.as_ref().to_vec()).map_err(Into::into))
            .boxed(),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }

            match state.source.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines(false);
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(e));
                    state.finished = true;
                }
                None => {
                    state.drain_lines(true);
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes(parts: &[&str]) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
        let parts: Vec<Result<Vec<u8>>> = parts.iter().map(|p| Ok(p.as_bytes().to_vec())).collect();
        futures::stream::iter(parts)
    }

    async fn collect(stream: ChatStream) -> Vec<Result<ChatChunk>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn test_decode_lines_split_across_chunks() {
        let stream = decode_ndjson(bytes(&[
            r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#,
            "\n{\"message\":{\"role\":\"assistant\",\"con",
            "tent\":\"lo\"},\"done\":false}\n",
            r#"{"message":{"role":"assistant","content":""},"done":true}"#,
        ]));

        let text: String = collect(stream)
            .await
            .into_iter()
            .map(|c| c.unwrap().content)
            .collect();
        assert_eq!(text, "Hello");
    }

    #[tokio::test]
    async fn test_decode_multibyte_split() {
        let line = "{\"message\":{\"content\":\"สวัสดี\"},\"done\":false}\n";
        let raw = line.as_bytes();
        let (a, b) = raw.split_at(25);
        let parts: Vec<Result<Vec<u8>>> = vec![Ok(a.to_vec()), Ok(b.to_vec())];

        let chunks = collect(decode_ndjson(futures::stream::iter(parts))).await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].as_ref().unwrap().content, "สวัสดี");
    }

    #[tokio::test]
    async fn test_decode_error_line_is_terminal() {
        let stream = decode_ndjson(bytes(&[
            "{\"message\":{\"content\":\"a\"},\"done\":false}\n",
            "{\"error\":\"model 'nope' not found\"}\n",
            "{\"message\":{\"content\":\"b\"},\"done\":false}\n",
        ]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(&items[1], Err(Error::Generation(m)) if m.contains("not found")));
    }

    #[tokio::test]
    async fn test_decode_stops_at_done() {
        let stream = decode_ndjson(bytes(&[
            "{\"message\":{\"content\":\"x\"},\"done\":true}\n{\"message\":{\"content\":\"y\"}}\n",
        ]));

        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].as_ref().unwrap().content, "x");
    }

    #[tokio::test]
    async fn test_decode_trailing_line_without_newline() {
        let stream = decode_ndjson(bytes(&["{\"message\":{\"content\":\"tail\"}}"]));
        let items = collect(stream).await;
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn test_parse_malformed_line() {
        assert!(matches!(parse_line(b"not json"), LineEvent::Failed(_)));
        assert_eq!(parse_line(b"   "), LineEvent::Empty);
    }

    #[test]
    fn test_request_serialization() {
        let messages = vec![Turn::system("s"), Turn::user("hi")];
        let request = ChatRequest {
            model: "llama3.2",
            messages: &messages,
            stream: true,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["messages"][1]["role"], "user");
        assert_eq!(json["stream"], true);
    }
}
