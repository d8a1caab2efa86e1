//! Shared test utilities
//!
//! Fakes for every collaborator of the orchestrator, none of which touch
//! audio hardware or the network.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;

use sora::context::ContextAssembler;
use sora::display::{DisplaySurface, Sender, Status, TurnHandle};
use sora::llm::{ChatChunk, ChatService, ChatStream};
use sora::orchestrator::{Orchestrator, OrchestratorBuilder, TurnEvent};
use sora::tools::{SearchResult, SearchService};
use sora::voice::{
    AudioArtifact, AudioOutput, PlaybackHandle, Recognizer, SpeechSynthesizer, artifact_path,
};
use sora::{Error, Result, SessionState, Turn};

/// One step of a scripted reply
#[derive(Debug, Clone)]
pub enum Step {
    Chunk(&'static str),
    Fail(&'static str),
}

/// Chat service replaying scripted streams, one per request
///
/// A script is either a stream or an error raised before streaming starts.
#[derive(Default)]
pub struct ScriptedChat {
    scripts: Mutex<VecDeque<std::result::Result<Vec<Step>, &'static str>>>,
    requests: Mutex<Vec<(String, Vec<Turn>)>>,
}

impl ScriptedChat {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a reply made of `chunks`
    pub fn reply(self: &Arc<Self>, chunks: &[&'static str]) -> Arc<Self> {
        self.script(chunks.iter().copied().map(Step::Chunk).collect())
    }

    /// Queue an arbitrary script
    pub fn script(self: &Arc<Self>, steps: Vec<Step>) -> Arc<Self> {
        self.scripts.lock().unwrap().push_back(Ok(steps));
        Arc::clone(self)
    }

    /// Queue a request that fails before any chunk is produced
    pub fn refuse(self: &Arc<Self>, message: &'static str) -> Arc<Self> {
        self.scripts.lock().unwrap().push_back(Err(message));
        Arc::clone(self)
    }

    /// Every request received, as (model, messages)
    pub fn requests(&self) -> Vec<(String, Vec<Turn>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatService for ScriptedChat {
    async fn stream_chat(&self, model: &str, messages: &[Turn]) -> Result<ChatStream> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), messages.to_vec()));

        let steps = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(vec![Step::Chunk("ok")]))
            .map_err(|m| Error::Generation(m.to_string()))?;

        let items: Vec<Result<ChatChunk>> = steps
            .into_iter()
            .map(|step| match step {
                Step::Chunk(c) => Ok(ChatChunk::new(c)),
                Step::Fail(m) => Err(Error::Generation(m.to_string())),
            })
            .collect();

        Ok(futures::stream::iter(items).boxed())
    }
}

/// Search service counting lookups
#[derive(Default)]
pub struct CountingSearch {
    body: Option<String>,
    calls: AtomicUsize,
}

impl CountingSearch {
    pub fn returning(body: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            body: body.map(ToString::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchService for CountingSearch {
    async fn search(&self, _query: &str, max_results: usize) -> Result<Vec<SearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .body
            .iter()
            .take(max_results)
            .map(|body| SearchResult {
                title: "result".to_string(),
                url: "https://example.com".to_string(),
                body: body.clone(),
            })
            .collect())
    }
}

/// Synthesizer writing placeholder files
pub struct StubSynth {
    dir: PathBuf,
    fail: bool,
    calls: Mutex<Vec<(String, String)>>,
}

impl StubSynth {
    pub fn new(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail: false,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Synthesizer whose engine always fails
    pub fn failing(dir: &Path) -> Arc<Self> {
        Arc::new(Self {
            dir: dir.to_path_buf(),
            fail: true,
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Every call, as (text, voice)
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for StubSynth {
    async fn synthesize(&self, text: &str, voice: &str) -> Result<AudioArtifact> {
        self.calls
            .lock()
            .unwrap()
            .push((text.to_string(), voice.to_string()));
        if self.fail {
            return Err(Error::Tts("edge-tts exited with status 1".to_string()));
        }

        let artifact = AudioArtifact::new(artifact_path(&self.dir));
        tokio::fs::write(artifact.path(), b"fake mp3").await?;
        Ok(artifact)
    }
}

#[derive(Default)]
struct OutputState {
    lengths: Mutex<VecDeque<Duration>>,
    log: Mutex<Vec<String>>,
    opened: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

/// Audio device that "plays" for scripted durations and tracks overlap
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<OutputState>,
}

impl FakeOutput {
    /// Playback lengths for successive opens; later opens finish at once
    pub fn with_lengths(lengths: &[Duration]) -> Self {
        let output = Self::default();
        output
            .state
            .lengths
            .lock()
            .unwrap()
            .extend(lengths.iter().copied());
        output
    }

    pub fn opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.state.active.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// `open:N` / `close:N` entries in order
    pub fn log(&self) -> Vec<String> {
        self.state.log.lock().unwrap().clone()
    }
}

struct FakeHandle {
    state: Arc<OutputState>,
    id: usize,
    until: Instant,
    closed: bool,
}

impl AudioOutput for FakeOutput {
    fn open(&self, path: &Path) -> Result<Box<dyn PlaybackHandle>> {
        assert!(path.exists(), "artifact must exist while playing");

        let id = self.state.opened.fetch_add(1, Ordering::SeqCst) + 1;
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);
        self.state.log.lock().unwrap().push(format!("open:{id}"));

        let length = self
            .state
            .lengths
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Duration::ZERO);

        Ok(Box::new(FakeHandle {
            state: Arc::clone(&self.state),
            id,
            until: Instant::now() + length,
            closed: false,
        }))
    }
}

impl FakeHandle {
    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.state.active.fetch_sub(1, Ordering::SeqCst);
            self.state.log.lock().unwrap().push(format!("close:{}", self.id));
        }
    }
}

impl PlaybackHandle for FakeHandle {
    fn is_busy(&self) -> bool {
        !self.closed && Instant::now() < self.until
    }

    fn stop(&mut self) {
        self.close();
    }
}

impl Drop for FakeHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// Recorded display call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayEvent {
    Render {
        handle: TurnHandle,
        text: String,
        sender: Sender,
    },
    Update {
        handle: TurnHandle,
        text: String,
    },
    Status(Status),
    Clear,
    Notify(String),
}

/// Display recording every call
#[derive(Default)]
pub struct RecordingDisplay {
    events: Mutex<Vec<DisplayEvent>>,
    next: AtomicUsize,
}

impl RecordingDisplay {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<DisplayEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Status changes with consecutive repeats collapsed
    pub fn statuses(&self) -> Vec<Status> {
        let mut statuses: Vec<Status> = Vec::new();
        for event in self.events() {
            if let DisplayEvent::Status(s) = event
                && statuses.last() != Some(&s)
            {
                statuses.push(s);
            }
        }
        statuses
    }

    /// Turns currently shown, oldest first, with their latest text
    pub fn transcript(&self) -> Vec<(Sender, String)> {
        let mut order: Vec<TurnHandle> = Vec::new();
        let mut turns: HashMap<TurnHandle, (Sender, String)> = HashMap::new();

        for event in self.events() {
            match event {
                DisplayEvent::Render {
                    handle,
                    text,
                    sender,
                } => {
                    order.push(handle);
                    turns.insert(handle, (sender, text));
                }
                DisplayEvent::Update { handle, text } => {
                    if let Some(turn) = turns.get_mut(&handle) {
                        turn.1 = text;
                    }
                }
                DisplayEvent::Clear => {
                    order.clear();
                    turns.clear();
                }
                DisplayEvent::Status(_) | DisplayEvent::Notify(_) => {}
            }
        }

        order.into_iter().filter_map(|h| turns.remove(&h)).collect()
    }

    pub fn notifications(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                DisplayEvent::Notify(m) => Some(m),
                _ => None,
            })
            .collect()
    }

    fn push(&self, event: DisplayEvent) {
        self.events.lock().unwrap().push(event);
    }
}

impl DisplaySurface for RecordingDisplay {
    fn render_turn(&self, text: &str, sender: Sender) -> TurnHandle {
        let handle = TurnHandle(self.next.fetch_add(1, Ordering::SeqCst) as u64);
        self.push(DisplayEvent::Render {
            handle,
            text: text.to_string(),
            sender,
        });
        handle
    }

    fn update(&self, handle: TurnHandle, text: &str) {
        self.push(DisplayEvent::Update {
            handle,
            text: text.to_string(),
        });
    }

    fn set_status(&self, status: Status) {
        self.push(DisplayEvent::Status(status));
    }

    fn clear(&self) {
        self.push(DisplayEvent::Clear);
    }

    fn notify(&self, message: &str) {
        self.push(DisplayEvent::Notify(message.to_string()));
    }
}

/// Recognizer with a fixed answer; `None` behaves like a timeout
pub struct FakeRecognizer {
    text: Option<String>,
    calls: AtomicUsize,
}

impl FakeRecognizer {
    pub fn hearing(text: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            text: text.map(ToString::to_string),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn listen(&self, _timeout: Duration) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.text
            .clone()
            .ok_or_else(|| Error::Recognition("no speech before timeout".to_string()))
    }
}

pub const SYSTEM_PROMPT: &str = "You are Sora. Helpful, friendly, female assistant.";
pub const VOICE: &str = "en-US-AriaNeural";

/// Orchestrator wired to fakes
pub struct Harness {
    pub session: Arc<SessionState>,
    pub chat: Arc<ScriptedChat>,
    pub search: Arc<CountingSearch>,
    pub synth: Arc<StubSynth>,
    pub output: FakeOutput,
    pub display: Arc<RecordingDisplay>,
    pub dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(chat: Arc<ScriptedChat>) -> Self {
        Self::with_parts(chat, CountingSearch::returning(None), FakeOutput::default())
    }

    pub fn with_parts(
        chat: Arc<ScriptedChat>,
        search: Arc<CountingSearch>,
        output: FakeOutput,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self {
            session: Arc::new(SessionState::new("llama3.2", VOICE, false)),
            synth: StubSynth::new(dir.path()),
            chat,
            search,
            output,
            display: RecordingDisplay::new(),
            dir,
        }
    }

    /// Swap in a synthesizer that always fails
    #[must_use]
    pub fn with_failing_synth(mut self) -> Self {
        self.synth = StubSynth::failing(self.dir.path());
        self
    }

    /// Builder with speech, two selectable models and the default voices
    pub fn builder(&self, history_window: usize) -> OrchestratorBuilder {
        let assembler = ContextAssembler::new(
            SYSTEM_PROMPT,
            history_window,
            vec!["search".into(), "news".into(), "weather".into()],
            self.search.clone(),
        );

        Orchestrator::builder(
            Arc::clone(&self.session),
            assembler,
            self.chat.clone(),
            self.display.clone(),
        )
        .speech(self.synth.clone(), Arc::new(self.output.clone()))
        .models(vec!["llama3.2".into(), "mistral".into()])
        .voices(sora::Config::default().voice.voices)
        .poll_interval(Duration::from_millis(5))
    }

    pub fn orchestrator(&self) -> Orchestrator {
        self.builder(5).build()
    }

    /// Number of files left in the artifact directory
    pub fn artifacts_left(&self) -> usize {
        std::fs::read_dir(self.dir.path()).unwrap().count()
    }
}

/// Drain every event received so far
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
