//! Session state shared across turns
//!
//! Holds the active model and voice, the mute toggle, the interrupt flag of
//! the job currently holding the audio device, and the conversation history.
//! Every field has a single writer; setters are crate-private so only the
//! orchestrator (and, for the interrupt slot, the audio player) can call them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person talking to the assistant
    User,
    /// The model
    Assistant,
    /// Fixed instruction turn
    System,
}

impl Role {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }
}

/// One message unit in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author of the turn
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Turn {
    /// Create a user turn
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// Create a system turn
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// Ordered record of all turns in a session
///
/// Never capped on append; windowing happens when the outgoing message list
/// is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct History {
    turns: Vec<Turn>,
}

impl History {
    /// Append a turn at the end
    pub fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// The last `k` turns, oldest first
    #[must_use]
    pub fn last(&self, k: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(k);
        &self.turns[start..]
    }

    /// All turns, oldest first
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of turns
    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when no turn has been recorded
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Remove every turn
    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

/// Cooperative stop flag shared between a playback job and whoever may
/// interrupt it
pub type CancelFlag = Arc<AtomicBool>;

/// Mutable cross-turn state
#[derive(Debug)]
pub struct SessionState {
    active_model: RwLock<String>,
    active_voice: RwLock<String>,
    muted: AtomicBool,
    interrupt: Mutex<Option<CancelFlag>>,
    history: Mutex<History>,
}

impl SessionState {
    /// Create a session with the given initial selections
    #[must_use]
    pub fn new(model: impl Into<String>, voice: impl Into<String>, muted: bool) -> Self {
        Self {
            active_model: RwLock::new(model.into()),
            active_voice: RwLock::new(voice.into()),
            muted: AtomicBool::new(muted),
            interrupt: Mutex::new(None),
            history: Mutex::new(History::default()),
        }
    }

    /// Currently selected model identifier
    #[must_use]
    pub fn active_model(&self) -> String {
        self.active_model
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Currently selected voice identifier
    #[must_use]
    pub fn active_voice(&self) -> String {
        self.active_voice
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether spoken output is muted
    #[must_use]
    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Whether the job holding the audio device has been asked to stop
    #[must_use]
    pub fn interrupt_requested(&self) -> bool {
        self.interrupt_slot()
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// Snapshot of the full history
    #[must_use]
    pub fn history(&self) -> History {
        self.history_guard().clone()
    }

    /// The last `k` turns, oldest first
    #[must_use]
    pub fn recent_turns(&self, k: usize) -> Vec<Turn> {
        self.history_guard().last(k).to_vec()
    }

    pub(crate) fn set_active_model(&self, model: impl Into<String>) {
        *self
            .active_model
            .write()
            .unwrap_or_else(PoisonError::into_inner) = model.into();
    }

    pub(crate) fn set_active_voice(&self, voice: impl Into<String>) {
        *self
            .active_voice
            .write()
            .unwrap_or_else(PoisonError::into_inner) = voice.into();
    }

    pub(crate) fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::SeqCst);
    }

    /// Append a whole turn; the lock makes concurrent appends land intact
    pub(crate) fn append_turn(&self, turn: Turn) {
        self.history_guard().push(turn);
    }

    /// Append a turn and return the window that ends with it
    pub(crate) fn append_and_window(&self, turn: Turn, k: usize) -> Vec<Turn> {
        let mut history = self.history_guard();
        history.push(turn);
        history.last(k).to_vec()
    }

    pub(crate) fn clear_history(&self) {
        self.history_guard().clear();
    }

    /// Set the stop flag of the job currently holding the audio device
    ///
    /// Returns true if there was a job to signal.
    pub(crate) fn request_interrupt(&self) -> bool {
        self.interrupt_slot().as_ref().is_some_and(|flag| {
            flag.store(true, Ordering::SeqCst);
            true
        })
    }

    /// Signal the current job and install `flag` in one step
    ///
    /// Returns true if a previous job was signalled.
    pub(crate) fn preempt(&self, flag: CancelFlag) -> bool {
        let mut slot = self.interrupt_slot();
        let signalled = slot.take().is_some_and(|previous| {
            previous.store(true, Ordering::SeqCst);
            true
        });
        *slot = Some(flag);
        signalled
    }

    /// Remove the slot if it still belongs to `flag`
    pub(crate) fn release_interrupt(&self, flag: &CancelFlag) {
        let mut slot = self.interrupt_slot();
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, flag)) {
            *slot = None;
        }
    }

    fn history_guard(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn interrupt_slot(&self) -> MutexGuard<'_, Option<CancelFlag>> {
        self.interrupt.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
