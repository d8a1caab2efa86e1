//! Streaming reply accumulator

/// Opening reasoning-trace marker
pub const THINK_OPEN: &str = "<think>";

/// Closing reasoning-trace marker
pub const THINK_CLOSE: &str = "</think>";

/// Remove both reasoning markers, keeping the text between them
#[must_use]
pub fn strip_markers(text: &str) -> String {
    text.replace(THINK_OPEN, "").replace(THINK_CLOSE, "")
}

/// Text of one in-flight reply
#[derive(Debug, Default)]
pub struct StreamingReply {
    partial: String,
}

impl StreamingReply {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a delta and return the text so far
    pub fn push(&mut self, delta: &str) -> &str {
        self.partial.push_str(delta);
        &self.partial
    }

    /// Text received so far
    #[must_use]
    pub fn partial(&self) -> &str {
        &self.partial
    }

    /// Consume the reply and produce the final text
    #[must_use]
    pub fn finish(self) -> String {
        strip_markers(&self.partial)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_strips_markers() {
        let mut reply = StreamingReply::new();
        reply.push("<thi");
        reply.push("nk>pondering</think>");
        assert_eq!(reply.push(" Hello!"), "<think>pondering</think> Hello!");
        assert_eq!(reply.finish(), "pondering Hello!");
    }

    #[test]
    fn test_text_without_markers_unchanged() {
        assert_eq!(strip_markers("plain answer"), "plain answer");
        assert_eq!(strip_markers("</think></think>"), "");
    }
}
