use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing_subscriber::EnvFilter;

use sora::context::ContextAssembler;
use sora::display::TerminalDisplay;
use sora::llm::OllamaClient;
use sora::tools::{SearchService, WebSearchTool};
use sora::voice::{
    AudioJob, AudioPlayer, CpalOutput, CpalPlayback, DecodedAudio, InputStream, MicrophoneSource,
    MicrophoneStream, PlaybackHandle, SpeechRecognizer, SpeechToText, calculate_energy,
    synthesizer_from_config,
};
use sora::{Config, Orchestrator, SessionState};

/// Sora - Conversational voice assistant
#[derive(Parser)]
#[command(name = "sora", version, about)]
struct Cli {
    /// Path to a config file (default: ~/.config/sora/config.toml)
    #[arg(short, long, env = "SORA_CONFIG")]
    config: Option<PathBuf>,

    /// Model to start with
    #[arg(short, long)]
    model: Option<String>,

    /// Voice to start with
    #[arg(long)]
    voice: Option<String>,

    /// Start with spoken output muted
    #[arg(long)]
    muted: bool,

    /// Disable speech input and output entirely
    #[arg(long, env = "SORA_NO_VOICE")]
    no_voice: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session (default)
    Chat,
    /// Ask one question, speak the answer and exit
    Ask {
        /// Question text
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// List selectable and installed models
    Models,
    /// List selectable voices
    Voices,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,sora=info",
        1 => "info,sora=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(model) = cli.model.clone() {
        config.llm.model = model;
    }
    if let Some(voice) = cli.voice.clone() {
        config.voice.voice = voice;
    }
    if cli.muted {
        config.voice.muted = true;
    }
    config.ensure_selected_listed();
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Chat) {
        Command::Chat => chat(&config, cli.no_voice).await,
        Command::Ask { text } => ask(&config, cli.no_voice, &text.join(" ")).await,
        Command::Models => list_models(&config).await,
        Command::Voices => {
            list_voices(&config, &config.voice.voice);
            Ok(())
        }
        Command::TestMic { duration } => test_mic(duration).await,
        Command::TestSpeaker => test_speaker().await,
        Command::TestTts { text } => test_tts(&config, &text).await,
    }
}

/// Wire the orchestrator from configuration
fn build_orchestrator(config: &Config, no_voice: bool) -> Orchestrator {
    let session = Arc::new(SessionState::new(
        config.llm.model.clone(),
        config.voice.voice.clone(),
        config.voice.muted,
    ));

    let search: Arc<dyn SearchService> =
        match WebSearchTool::from_config(config.search.provider, &config.api_keys) {
            Ok(tool) => Arc::new(tool),
            Err(e) => {
                tracing::warn!(error = %e, "falling back to DuckDuckGo search");
                Arc::new(WebSearchTool::new_duckduckgo())
            }
        };

    let assembler = ContextAssembler::from_config(config, search);
    let chat = Arc::new(OllamaClient::new(config.llm.base_url.clone()));
    let display = Arc::new(TerminalDisplay::stdout(true));

    let mut builder = Orchestrator::builder(session, assembler, chat, display)
        .models(config.llm.models.clone())
        .voices(config.voice.voices.clone())
        .listen_timeout(config.voice.listen_timeout)
        .poll_interval(config.voice.poll_interval);

    if no_voice {
        tracing::info!("voice disabled");
        return builder.build();
    }

    match synthesizer_from_config(&config.voice, &config.api_keys) {
        Ok(synthesizer) => builder = builder.speech(synthesizer, Arc::new(CpalOutput)),
        Err(e) => tracing::warn!(error = %e, "speech output unavailable"),
    }

    match SpeechToText::from_config(&config.voice, &config.api_keys) {
        Ok(stt) => {
            let recognizer = SpeechRecognizer::new(Arc::new(MicrophoneSource), Arc::new(stt));
            builder = builder.recognizer(Arc::new(recognizer));
        }
        Err(e) => tracing::info!(error = %e, "voice input unavailable"),
    }

    builder.build()
}

/// What a REPL line asks for
#[derive(Debug, PartialEq, Eq)]
enum ReplCommand<'a> {
    Say(&'a str),
    Listen,
    Mute,
    Model(&'a str),
    Voice(&'a str),
    Clear,
    Stop,
    Models,
    Voices,
    Help,
    Quit,
    Unknown(&'a str),
}

fn parse_line(line: &str) -> ReplCommand<'_> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return ReplCommand::Say(line);
    };

    let (name, arg) = command
        .split_once(char::is_whitespace)
        .map_or((command, ""), |(n, a)| (n, a.trim()));

    match name {
        "listen" | "l" => ReplCommand::Listen,
        "mute" => ReplCommand::Mute,
        "model" if !arg.is_empty() => ReplCommand::Model(arg),
        "voice" if !arg.is_empty() => ReplCommand::Voice(arg),
        "model" | "models" => ReplCommand::Models,
        "voice" | "voices" => ReplCommand::Voices,
        "clear" => ReplCommand::Clear,
        "stop" => ReplCommand::Stop,
        "help" | "?" => ReplCommand::Help,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        _ => ReplCommand::Unknown(name),
    }
}

const HELP: &str = "\
commands:
  /listen         speak a question
  /mute           toggle spoken output
  /model <id>     switch model
  /voice <id>     switch voice
  /models         list models
  /voices         list voices
  /clear          clear history
  /stop           stop speaking
  /quit           exit";

/// Interactive session on stdin
#[allow(clippy::future_not_send)]
async fn chat(config: &Config, no_voice: bool) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, no_voice);
    tracing::info!(
        model = %config.llm.model,
        voice = %config.voice.voice,
        "starting sora"
    );
    println!("Sora is ready. Type a message, or /help for commands.");

    let mut lines = LinesStream::new(tokio::io::BufReader::new(tokio::io::stdin()).lines());

    loop {
        let line = tokio::select! {
            line = lines.next() => line,
            _ = tokio::signal::ctrl_c() => None,
        };

        let Some(line) = line else {
            break;
        };

        match parse_line(&line?) {
            ReplCommand::Say(text) => {
                orchestrator.submit(text);
            }
            ReplCommand::Listen => {
                if orchestrator.listen().is_none() {
                    println!("voice input unavailable (needs an OpenAI or Deepgram API key)");
                }
            }
            ReplCommand::Mute => {
                orchestrator.toggle_mute();
            }
            ReplCommand::Model(id) => {
                if let Err(e) = orchestrator.set_model(id) {
                    println!("{e}");
                }
            }
            ReplCommand::Voice(id) => {
                if let Err(e) = orchestrator.set_voice(id) {
                    println!("{e}");
                }
            }
            ReplCommand::Clear => orchestrator.clear_history(),
            ReplCommand::Stop => {
                orchestrator.stop_speaking();
            }
            ReplCommand::Models => {
                let active = orchestrator.session().active_model();
                for model in orchestrator.models() {
                    let marker = if *model == active { "*" } else { " " };
                    println!("{marker} {model}");
                }
            }
            ReplCommand::Voices => {
                list_voices(config, &orchestrator.session().active_voice());
            }
            ReplCommand::Help => println!("{HELP}"),
            ReplCommand::Quit => break,
            ReplCommand::Unknown(name) => println!("unknown command /{name}, try /help"),
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

/// One question, answered and spoken
#[allow(clippy::future_not_send)]
async fn ask(config: &Config, no_voice: bool, text: &str) -> anyhow::Result<()> {
    let orchestrator = build_orchestrator(config, no_voice);

    if orchestrator.run_turn(text).await.is_none() {
        anyhow::bail!("nothing to ask");
    }
    orchestrator.wait_idle().await;
    Ok(())
}

async fn list_models(config: &Config) -> anyhow::Result<()> {
    println!("Selectable models:");
    for model in &config.llm.models {
        let marker = if *model == config.llm.model { "*" } else { " " };
        println!("{marker} {model}");
    }

    let client = OllamaClient::new(config.llm.base_url.clone());
    match client.list_models().await {
        Ok(installed) => {
            println!("\nInstalled on {}:", client.base_url());
            for model in installed {
                println!("  {model}");
            }
        }
        Err(e) => println!("\nCould not reach Ollama at {}: {e}", client.base_url()),
    }

    Ok(())
}

fn list_voices(config: &Config, active: &str) {
    for voice in &config.voice.voices {
        let marker = if voice.id == active { "*" } else { " " };
        println!("{marker} {:<24} {}", voice.id, voice.label);
    }
}

/// Print a level meter for the default microphone
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut stream = MicrophoneStream::start()?;
    println!("Sample rate: {} Hz", stream.sample_rate());
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = stream.take_buffer();
        let energy = calculate_energy(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Play a 440Hz tone
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let sample_rate = 24000_u32;
    let frequency = 440.0_f32;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..sample_rate * 2)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    println!("Playing {} samples at {sample_rate} Hz...", samples.len());

    let mut playback = CpalPlayback::start(DecodedAudio {
        samples,
        sample_rate,
    })?;
    while playback.is_busy() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    playback.stop();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");

    Ok(())
}

/// Synthesize and play `text` with the configured engine
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let synthesizer = synthesizer_from_config(&config.voice, &config.api_keys)?;

    println!("Synthesizing speech with {}...", config.voice.voice);
    let artifact = synthesizer.synthesize(text, &config.voice.voice).await?;
    let bytes = tokio::fs::metadata(artifact.path()).await?.len();
    println!("Got {bytes} bytes of audio at {}", artifact.path().display());

    let session = Arc::new(SessionState::new(
        config.llm.model.clone(),
        config.voice.voice.clone(),
        false,
    ));
    let player = AudioPlayer::new(Arc::new(CpalOutput), session, config.voice.poll_interval);

    println!("Playing audio...");
    let outcome = player.play(AudioJob::new(artifact)).await;

    println!("\n---");
    println!("Playback outcome: {outcome:?}");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line() {
        assert_eq!(parse_line("  hello there "), ReplCommand::Say("hello there"));
        assert_eq!(parse_line("/model mistral"), ReplCommand::Model("mistral"));
        assert_eq!(parse_line("/model"), ReplCommand::Models);
        assert_eq!(parse_line("/quit"), ReplCommand::Quit);
        assert_eq!(parse_line("/frobnicate"), ReplCommand::Unknown("frobnicate"));
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["sora", "-vv", "--muted", "ask", "what's", "the", "weather"])
            .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(cli.muted);
        assert!(matches!(cli.command, Some(Command::Ask { text }) if text.len() == 3));
    }
}
