//! Display surface
//!
//! The orchestrator renders turns and status through [`DisplaySurface`].
//! Implementations must be callable from any task.

mod terminal;

pub use terminal::TerminalDisplay;

/// Text shown in an assistant turn before the first chunk arrives
pub const PLACEHOLDER: &str = "...";

/// Who a rendered turn belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

/// Identifies a rendered turn for later updates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TurnHandle(pub u64);

/// Assistant activity shown in the status line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Status {
    #[default]
    Idle,
    Listening,
    Thinking,
    Searching,
    Typing,
    Speaking,
}

impl Status {
    /// Status-line text
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Idle => "Ready",
            Self::Listening => "Listening...",
            Self::Thinking => "Thinking...",
            Self::Searching => "Searching...",
            Self::Typing => "Typing...",
            Self::Speaking => "Speaking...",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Where turns, status and notifications are shown
pub trait DisplaySurface: Send + Sync {
    /// Show a new turn and return a handle for updates
    fn render_turn(&self, text: &str, sender: Sender) -> TurnHandle;

    /// Replace the text of a rendered turn
    fn update(&self, handle: TurnHandle, text: &str);

    /// Show the current status
    fn set_status(&self, status: Status);

    /// Remove every rendered turn
    fn clear(&self);

    /// Show a short transient message
    fn notify(&self, message: &str);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_labels() {
        assert_eq!(Status::default(), Status::Idle);
        assert_eq!(Status::Idle.to_string(), "Ready");
        assert_eq!(Status::Searching.label(), "Searching...");
    }
}
