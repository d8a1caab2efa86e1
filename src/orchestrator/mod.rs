//! Response orchestrator
//!
//! Drives each turn through `Thinking → [Searching] → Typing → Speaking → Idle`
//! and voice input through `Listening → Idle | Thinking`. Long-running work
//! runs on tracked tasks; completions come back as [`TurnEvent`]s that the
//! state machine applies.

mod reply;
mod status;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

pub use reply::{StreamingReply, THINK_CLOSE, THINK_OPEN, strip_markers};
pub use status::StatusBoard;

use crate::config::VoiceProfile;
use crate::context::ContextAssembler;
use crate::display::{DisplaySurface, PLACEHOLDER, Sender, Status, TurnHandle};
use crate::llm::ChatService;
use crate::session::{SessionState, Turn};
use crate::voice::{
    AudioJob, AudioOutput, AudioPlayer, PlaybackOutcome, Recognizer, SpeechSynthesizer,
};
use crate::{Error, Result};

/// Identifies one turn or listen operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TurnId(pub u64);

/// Completion messages delivered back to the state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEvent {
    /// The reply streamed to the end and was recorded
    ReplyCompleted { turn: TurnId, text: String },
    /// Generation failed; the error was shown in place of the reply
    ReplyFailed { turn: TurnId, error: String },
    /// Speech for a turn ended, however it ended
    SpeechFinished {
        turn: TurnId,
        outcome: PlaybackOutcome,
    },
    /// Recognition produced text
    Transcribed { listen: TurnId, text: String },
    /// Recognition failed for any reason
    ListenFailed { listen: TurnId },
}

const EVENT_CAPACITY: usize = 64;

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    session: Arc<SessionState>,
    assembler: ContextAssembler,
    chat: Arc<dyn ChatService>,
    display: Arc<dyn DisplaySurface>,
    speech: Option<(Arc<dyn SpeechSynthesizer>, Arc<dyn AudioOutput>)>,
    recognizer: Option<Arc<dyn Recognizer>>,
    models: Vec<String>,
    voices: Vec<VoiceProfile>,
    listen_timeout: Duration,
    poll_interval: Duration,
}

impl OrchestratorBuilder {
    /// Speak replies through `synthesizer` and `output`
    #[must_use]
    pub fn speech(
        mut self,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        output: Arc<dyn AudioOutput>,
    ) -> Self {
        self.speech = Some((synthesizer, output));
        self
    }

    /// Enable voice input
    #[must_use]
    pub fn recognizer(mut self, recognizer: Arc<dyn Recognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    /// Selectable model identifiers; empty accepts any identifier
    #[must_use]
    pub fn models(mut self, models: Vec<String>) -> Self {
        self.models = models;
        self
    }

    /// Selectable voices; empty accepts any identifier
    #[must_use]
    pub fn voices(mut self, voices: Vec<VoiceProfile>) -> Self {
        self.voices = voices;
        self
    }

    /// How long `listen` waits for speech to start
    #[must_use]
    pub const fn listen_timeout(mut self, timeout: Duration) -> Self {
        self.listen_timeout = timeout;
        self
    }

    /// Playback stop-flag poll interval
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Build the orchestrator
    #[must_use]
    pub fn build(self) -> Orchestrator {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let session = Arc::clone(&self.session);
        let poll_interval = self.poll_interval;
        let speech = self.speech.map(|(synthesizer, output)| Speech {
            synthesizer,
            player: AudioPlayer::new(output, session, poll_interval),
        });

        Orchestrator {
            inner: Arc::new(Inner {
                status: StatusBoard::new(Arc::clone(&self.display)),
                session: self.session,
                assembler: self.assembler,
                chat: self.chat,
                speech,
                display: self.display,
                recognizer: self.recognizer,
                models: self.models,
                voices: self.voices,
                listen_timeout: self.listen_timeout,
                next_id: AtomicU64::new(1),
                tasks: Mutex::new(JoinSet::new()),
                events,
            }),
        }
    }
}

/// Coordinates input, generation, display and speech for a session
pub struct Orchestrator {
    inner: Arc<Inner>,
}

/// Synthesis and playback for spoken replies
struct Speech {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    player: AudioPlayer,
}

struct Inner {
    session: Arc<SessionState>,
    assembler: ContextAssembler,
    chat: Arc<dyn ChatService>,
    speech: Option<Speech>,
    display: Arc<dyn DisplaySurface>,
    recognizer: Option<Arc<dyn Recognizer>>,
    models: Vec<String>,
    voices: Vec<VoiceProfile>,
    listen_timeout: Duration,
    status: StatusBoard,
    next_id: AtomicU64,
    tasks: Mutex<JoinSet<()>>,
    events: broadcast::Sender<TurnEvent>,
}

impl Orchestrator {
    /// Start building an orchestrator from its collaborators
    #[must_use]
    pub fn builder(
        session: Arc<SessionState>,
        assembler: ContextAssembler,
        chat: Arc<dyn ChatService>,
        display: Arc<dyn DisplaySurface>,
    ) -> OrchestratorBuilder {
        OrchestratorBuilder {
            session,
            assembler,
            chat,
            display,
            speech: None,
            recognizer: None,
            models: Vec::new(),
            voices: Vec::new(),
            listen_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Submit user text as a new turn and return immediately
    ///
    /// Blank input is ignored.
    pub fn submit(&self, text: &str) -> Option<TurnId> {
        self.inner.submit(text)
    }

    /// Run a turn to the end of generation
    ///
    /// Speech continues on a tracked task; use [`Self::wait_idle`] to wait for it.
    pub async fn run_turn(&self, text: &str) -> Option<TurnId> {
        let (id, text) = self.inner.begin_turn(text)?;
        self.inner.run_turn(id, text).await;
        Some(id)
    }

    /// Capture one spoken utterance and submit it
    ///
    /// Returns `None` when no recognizer is configured.
    pub fn listen(&self) -> Option<TurnId> {
        Inner::listen(&self.inner)
    }

    /// Clear history and the displayed transcript
    pub fn clear_history(&self) {
        self.inner.session.clear_history();
        self.inner.display.clear();
        tracing::info!("history cleared");
    }

    /// Select the model for subsequent turns
    ///
    /// # Errors
    ///
    /// Returns error if `model` is not one of the selectable models
    pub fn set_model(&self, model: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.models.is_empty() && !inner.models.iter().any(|m| m == model) {
            return Err(Error::Config(format!("unknown model: {model}")));
        }

        inner.session.set_active_model(model);
        inner.display.notify(&format!("Model: {model}"));
        tracing::info!(model, "model changed");
        Ok(())
    }

    /// Select the voice for subsequent speech
    ///
    /// # Errors
    ///
    /// Returns error if `voice` is not one of the selectable voices
    pub fn set_voice(&self, voice: &str) -> Result<()> {
        let inner = &self.inner;
        if !inner.voices.is_empty() && !inner.voices.iter().any(|v| v.id == voice) {
            return Err(Error::Config(format!("unknown voice: {voice}")));
        }

        inner.session.set_active_voice(voice);
        inner.display.notify("Voice Changed");
        tracing::info!(voice, "voice changed");
        Ok(())
    }

    /// Flip the mute toggle and return the new state
    pub fn toggle_mute(&self) -> bool {
        let muted = !self.inner.session.is_muted();
        self.set_muted(muted);
        muted
    }

    /// Mute or unmute spoken output
    ///
    /// Muting also stops playback in progress.
    pub fn set_muted(&self, muted: bool) {
        let inner = &self.inner;
        inner.session.set_muted(muted);
        if muted {
            inner.session.request_interrupt();
        }
        inner
            .display
            .notify(if muted { "Voice Muted" } else { "Voice Enabled" });
        tracing::info!(muted, "mute toggled");
    }

    /// Ask current playback to stop; returns true if a job was signalled
    pub fn stop_speaking(&self) -> bool {
        self.inner.session.request_interrupt()
    }

    /// Current status
    #[must_use]
    pub fn status(&self) -> Status {
        self.inner.status.current()
    }

    /// Shared session state
    #[must_use]
    pub fn session(&self) -> &Arc<SessionState> {
        &self.inner.session
    }

    /// Selectable model identifiers
    #[must_use]
    pub fn models(&self) -> &[String] {
        &self.inner.models
    }

    /// Selectable voices
    #[must_use]
    pub fn voices(&self) -> &[VoiceProfile] {
        &self.inner.voices
    }

    /// Receive completion events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.inner.events.subscribe()
    }

    /// Wait until every tracked task, including ones they spawn, has finished
    pub async fn wait_idle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.inner.tasks());
            if batch.is_empty() {
                return;
            }
            drain(&mut batch).await;
        }
    }

    /// Stop playback and abort all outstanding work
    pub async fn shutdown(&self) {
        self.inner.session.request_interrupt();
        let mut batch = std::mem::take(&mut *self.inner.tasks());
        batch.abort_all();
        drain(&mut batch).await;
        tracing::debug!("orchestrator shut down");
    }
}

async fn drain(batch: &mut JoinSet<()>) {
    while let Some(result) = batch.join_next().await {
        if let Err(e) = result
            && e.is_panic()
        {
            tracing::error!(error = %e, "background task panicked");
        }
    }
}

impl Inner {
    fn next_id(&self) -> TurnId {
        TurnId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Trim, render the user turn and allocate an id
    fn begin_turn(&self, text: &str) -> Option<(TurnId, String)> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        let id = self.next_id();
        self.display.render_turn(text, Sender::User);
        Some((id, text.to_string()))
    }

    fn submit(self: &Arc<Self>, text: &str) -> Option<TurnId> {
        let (id, text) = self.begin_turn(text)?;
        let inner = Arc::clone(self);
        self.spawn(async move { inner.run_turn(id, text).await });
        Some(id)
    }

    async fn run_turn(self: &Arc<Self>, id: TurnId, text: String) {
        tracing::info!(turn = id.0, "turn started");
        self.status.set(id, Status::Thinking);

        let handle = self.display.render_turn(PLACEHOLDER, Sender::Assistant);
        let mut messages = self.assembler.build(&text, &self.session);

        if self.assembler.should_augment(&text) {
            self.status.set(id, Status::Searching);
            self.assembler.augment(&mut messages, &text).await;
        }

        self.status.set(id, Status::Typing);

        match self.stream_reply(&messages, handle).await {
            Ok(final_text) => {
                self.display.update(handle, &final_text);
                self.session.append_turn(Turn::assistant(final_text.clone()));
                tracing::info!(turn = id.0, chars = final_text.len(), "turn finished");

                self.handle_event(TurnEvent::ReplyCompleted {
                    turn: id,
                    text: final_text.clone(),
                });
                self.speak(id, final_text);
            }
            Err(e) => {
                tracing::warn!(turn = id.0, error = %e, "generation failed");
                self.display.update(handle, &format!("Error: {e}"));
                self.handle_event(TurnEvent::ReplyFailed {
                    turn: id,
                    error: e.to_string(),
                });
            }
        }
    }

    async fn stream_reply(&self, messages: &[Turn], handle: TurnHandle) -> Result<String> {
        let model = self.session.active_model();
        let mut stream = self.chat.stream_chat(&model, messages).await?;
        let mut reply = StreamingReply::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if chunk.content.is_empty() {
                continue;
            }
            self.display.update(handle, reply.push(&chunk.content));
        }

        Ok(reply.finish())
    }

    /// Hand the final text to synthesis and playback on a tracked task
    fn speak(self: &Arc<Self>, id: TurnId, text: String) {
        if self.speech.is_none() {
            self.status.reset_if_owner(id);
            return;
        }

        self.status.set(id, Status::Speaking);
        let voice = self.session.active_voice();
        let inner = Arc::clone(self);

        self.spawn(async move {
            let Some(speech) = &inner.speech else {
                return;
            };

            let outcome = match speech.synthesizer.synthesize(&text, &voice).await {
                Ok(artifact) => speech.player.play(AudioJob::new(artifact)).await,
                Err(e) => {
                    tracing::warn!(turn = id.0, error = %e, "speech synthesis failed");
                    PlaybackOutcome::Failed
                }
            };
            inner.handle_event(TurnEvent::SpeechFinished { turn: id, outcome });
        });
    }

    fn listen(self: &Arc<Self>) -> Option<TurnId> {
        let recognizer = self.recognizer.clone()?;
        let id = self.next_id();
        self.status.set(id, Status::Listening);

        let inner = Arc::clone(self);
        let timeout = self.listen_timeout;
        self.spawn(async move {
            let event = match recognizer.listen(timeout).await {
                Ok(text) => TurnEvent::Transcribed { listen: id, text },
                Err(e) => {
                    tracing::debug!(listen = id.0, error = %e, "recognition failed");
                    TurnEvent::ListenFailed { listen: id }
                }
            };
            inner.handle_event(event);
        });

        Some(id)
    }

    /// Apply a completion event, then publish it
    fn handle_event(self: &Arc<Self>, event: TurnEvent) {
        match &event {
            TurnEvent::ReplyCompleted { .. } => {}
            TurnEvent::ReplyFailed { turn, .. } | TurnEvent::SpeechFinished { turn, .. } => {
                self.status.reset_if_owner(*turn);
            }
            TurnEvent::ListenFailed { listen } => {
                self.status.reset_if_owner(*listen);
            }
            TurnEvent::Transcribed { listen, text } => {
                if self.submit(text).is_none() {
                    self.status.reset_if_owner(*listen);
                }
            }
        }

        // Nobody subscribed is fine
        let _ = self.events.send(event);
    }
}
