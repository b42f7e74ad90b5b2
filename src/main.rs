use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_client::voice::{AudioSink, CaptureBackend};
use parley_client::{
    AudioCaptureController, Config, CpalCapture, CpalSink, EventBus, HttpBackend, MessageStatus,
    PlaybackQueue, Role, ServiceSet, TurnEvent, TurnOrchestrator,
};

/// Parley - terminal chat client for AI characters
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Character to converse with
    #[arg(short, long, env = "PARLEY_CHARACTER", default_value = "1")]
    character: i64,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable voice features (for machines without audio hardware)
    #[arg(long, env = "PARLEY_DISABLE_VOICE")]
    disable_voice: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the interactive setup wizard
    Setup,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test speech synthesis output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,parley_client=info",
        1 => "info,parley_client=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Setup => parley_client::setup::run_setup(),
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker => test_speaker().await,
            Command::TestTts { text } => test_tts(&text).await,
        };
    }

    chat(cli).await
}

/// Sink used when voice is disabled; the queue never receives segments
struct NullSink;

#[async_trait::async_trait]
impl AudioSink for NullSink {
    async fn play(&self, _audio: &[u8]) -> parley_client::Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Interactive chat loop against the configured backend
async fn chat(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load_with_options(cli.disable_voice)?;
    tracing::debug!(?config, "loaded configuration");

    let backend = Arc::new(HttpBackend::new(&config.backend_url, config.request_timeout)?);
    let services = ServiceSet::from_backend(backend);
    let events = EventBus::new();

    let sink: Arc<dyn AudioSink> = if config.voice.enabled {
        Arc::new(CpalSink::new()?)
    } else {
        Arc::new(NullSink)
    };
    let playback = PlaybackQueue::new(sink, events.clone());
    let capture = AudioCaptureController::new(Box::new(CpalCapture::new()));

    let orchestrator = Arc::new(TurnOrchestrator::new(
        cli.character,
        capture,
        playback,
        services,
        events.clone(),
        &config,
    ));

    tokio::spawn(render_events(events.subscribe()));

    match orchestrator.open_conversation().await {
        Ok(count) => {
            for message in orchestrator.messages().await {
                let who = match message.role {
                    Role::User => "you",
                    Role::Assistant => "character",
                };
                println!("{who}: {}", message.text);
            }
            tracing::debug!(messages = count, "conversation opened");
        }
        Err(e) => tracing::warn!(error = %e, "history fetch failed, starting fresh"),
    }

    println!("Connected to character {}.", cli.character);
    if config.voice.enabled {
        println!("Type a message, /voice to speak, /cancel to interrupt, /quit to exit.");
    } else {
        println!("Type a message, /cancel to interrupt, /quit to exit.");
    }

    loop {
        let line = read_line("you").await?;
        let line = line.trim().to_string();

        match line.as_str() {
            "" => {}
            "/quit" | "/exit" => break,
            "/cancel" => orchestrator.cancel().await,
            "/voice" => {
                if let Err(e) = orchestrator.begin_voice_capture().await {
                    println!("! {e}");
                    continue;
                }
                println!("Recording... press enter to stop.");
                let _ = read_line("").await?;
                if let Err(e) = orchestrator.finish_voice_capture().await {
                    println!("! {e}");
                }
            }
            _ => {
                if let Err(e) = orchestrator.submit_text(&line).await {
                    println!("! {e}");
                }
            }
        }
    }

    orchestrator.cancel().await;
    Ok(())
}

/// Read one line of input without blocking the runtime
async fn read_line(prompt: &str) -> anyhow::Result<String> {
    let prompt = prompt.to_string();
    tokio::task::spawn_blocking(move || {
        if !prompt.is_empty() {
            print!("{prompt}> ");
            std::io::stdout().flush()?;
        }
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await?
}

/// Print turn events as they arrive
///
/// Assistant text is printed incrementally as the reveal progresses; the
/// revealed prefixes grow monotonically so the delta is always a suffix.
async fn render_events(mut rx: tokio::sync::broadcast::Receiver<TurnEvent>) {
    let mut revealed_len = 0usize;

    while let Ok(event) = rx.recv().await {
        match event {
            TurnEvent::MessageAppended(message) if message.role == Role::Assistant => {
                if message.status == MessageStatus::Error {
                    println!("character: {}", message.text);
                } else {
                    revealed_len = 0;
                    print!("character: ");
                    let _ = std::io::stdout().flush();
                }
            }
            TurnEvent::RevealProgress { text, .. } => {
                if text.len() > revealed_len {
                    print!("{}", &text[revealed_len..]);
                    let _ = std::io::stdout().flush();
                    revealed_len = text.len();
                }
            }
            TurnEvent::MessageCommitted { .. } => {
                println!();
                revealed_len = 0;
            }
            TurnEvent::SuggestionOffered(topic) => {
                println!("(suggested topic: {topic})");
            }
            TurnEvent::CompanionshipUpdated(score) => {
                tracing::info!(score, "companionship updated");
            }
            TurnEvent::NowPlaying(Some(text)) => {
                tracing::debug!(text = %text, "now playing");
            }
            TurnEvent::TurnFailed { message } => {
                tracing::warn!(error = %message, "turn failed");
            }
            _ => {}
        }
    }
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = CpalCapture::new();
    capture.open()?;

    let sample_rate = capture.sample_rate();
    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        // Clear buffer each second
        capture.clear_buffer();
    }

    capture.close();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Calculate RMS energy
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let playback = CpalSink::new()?;

    // Generate 2 seconds of 440Hz sine wave at 24kHz sample rate
    let sample_rate = 24000_i32;
    let frequency = 440.0_f32;
    let duration_secs = 2.0_f32;
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let num_samples = (sample_rate as f32 * duration_secs) as usize;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    println!("Playing {} samples at {} Hz...", samples.len(), sample_rate);

    playback.play_samples(samples).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Test speech synthesis against the configured backend
async fn test_tts(text: &str) -> anyhow::Result<()> {
    use parley_client::SynthesisService;

    println!("Testing TTS with text: \"{text}\"\n");

    let config = Config::load()?;
    let backend = HttpBackend::new(&config.backend_url, config.request_timeout)?;

    println!("Synthesizing speech...");
    let mp3_data = backend
        .synthesize(text, config.voice.voice_profile.as_deref())
        .await?;
    println!("Got {} bytes of audio data", mp3_data.len());

    // Check MP3 header
    if mp3_data.len() > 3 {
        println!(
            "First 4 bytes: {:02x} {:02x} {:02x} {:02x}",
            mp3_data[0], mp3_data[1], mp3_data[2], mp3_data[3]
        );
    }

    println!("Playing audio...");
    let playback = CpalSink::new()?;
    playback.play(&mp3_data).await?;

    println!("\n---");
    println!("If you heard the speech, TTS is working!");

    Ok(())
}
