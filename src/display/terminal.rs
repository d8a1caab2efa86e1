//! Terminal display
//!
//! Streams assistant text as it grows. A line cannot be rewritten in
//! place, so an update that does not extend what is already shown reprints
//! the whole turn on a new line.

use std::io::Write;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DisplaySurface, PLACEHOLDER, Sender, Status, TurnHandle};

const USER_PREFIX: &str = "you> ";
const ASSISTANT_PREFIX: &str = "sora> ";

struct TerminalState<W> {
    out: W,
    next_handle: u64,
    /// Open assistant line and the text printed on it
    open: Option<(TurnHandle, String)>,
}

/// Plain-text display writing to a terminal
pub struct TerminalDisplay<W: Write + Send = std::io::Stdout> {
    state: Mutex<TerminalState<W>>,
    show_status: bool,
}

impl TerminalDisplay {
    /// Display on standard output
    #[must_use]
    pub fn stdout(show_status: bool) -> Self {
        Self::new(std::io::stdout(), show_status)
    }
}

impl<W: Write + Send> TerminalDisplay<W> {
    /// Display on `out`
    pub fn new(out: W, show_status: bool) -> Self {
        Self {
            state: Mutex::new(TerminalState {
                out,
                next_handle: 0,
                open: None,
            }),
            show_status,
        }
    }

    /// Recover the writer
    pub fn into_inner(self) -> W {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .out
    }

    fn state(&self) -> MutexGuard<'_, TerminalState<W>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write> TerminalState<W> {
    fn close_line(&mut self) {
        if self.open.take().is_some() {
            let _ = writeln!(self.out);
        }
    }

    fn flush(&mut self) {
        let _ = self.out.flush();
    }
}

impl<W: Write + Send> DisplaySurface for TerminalDisplay<W> {
    fn render_turn(&self, text: &str, sender: Sender) -> TurnHandle {
        let mut state = self.state();
        state.close_line();

        let handle = TurnHandle(state.next_handle);
        state.next_handle += 1;

        match sender {
            Sender::User => {
                let _ = writeln!(state.out, "{USER_PREFIX}{text}");
            }
            Sender::Assistant => {
                let shown = if text == PLACEHOLDER { "" } else { text };
                let _ = write!(state.out, "{ASSISTANT_PREFIX}{shown}");
                state.open = Some((handle, shown.to_string()));
            }
        }

        state.flush();
        handle
    }

    fn update(&self, handle: TurnHandle, text: &str) {
        let mut state = self.state();

        let delta = match &state.open {
            Some((open, shown)) if *open == handle => {
                if text == shown {
                    return;
                }
                text.strip_prefix(shown.as_str()).map(str::to_string)
            }
            _ => None,
        };

        match delta {
            Some(delta) => {
                let _ = write!(state.out, "{delta}");
            }
            None => {
                state.close_line();
                let _ = write!(state.out, "{ASSISTANT_PREFIX}{text}");
            }
        }

        state.open = Some((handle, text.to_string()));
        state.flush();
    }

    fn set_status(&self, status: Status) {
        tracing::debug!(status = %status, "status");

        if matches!(status, Status::Speaking | Status::Idle) {
            let mut state = self.state();
            state.close_line();
            state.flush();
        }

        if self.show_status && !matches!(status, Status::Idle | Status::Typing) {
            eprintln!("[{status}]");
        }
    }

    fn clear(&self) {
        let mut state = self.state();
        state.close_line();
        let _ = writeln!(state.out, "-- conversation cleared --");
        state.flush();
    }

    fn notify(&self, message: &str) {
        let mut state = self.state();
        state.close_line();
        let _ = writeln!(state.out, "[{message}]");
        state.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(display: TerminalDisplay<Vec<u8>>) -> String {
        String::from_utf8(display.into_inner()).unwrap()
    }

    #[test]
    fn test_streaming_prints_deltas() {
        let display = TerminalDisplay::new(Vec::new(), false);
        display.render_turn("hello", Sender::User);
        let handle = display.render_turn(PLACEHOLDER, Sender::Assistant);
        display.update(handle, "Hi");
        display.update(handle, "Hi there");
        display.update(handle, "Hi there");
        display.set_status(Status::Speaking);

        assert_eq!(output(display), "you> hello\nsora> Hi there\n");
    }

    #[test]
    fn test_rewrite_reprints_line() {
        let display = TerminalDisplay::new(Vec::new(), false);
        let handle = display.render_turn(PLACEHOLDER, Sender::Assistant);
        display.update(handle, "<think>x</think>ok");
        display.update(handle, "xok");
        display.notify("Voice Muted");

        assert_eq!(
            output(display),
            "sora> <think>x</think>ok\nsora> xok\n[Voice Muted]\n"
        );
    }
}
