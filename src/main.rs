use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use talkback::voice::{
    AudioQualitySampler, CpalMicrophone, HttpSpeechOutput, RefreshClock, SpeechOutput,
    SynthesisRequest, UtteranceOutcome,
};
use talkback::{
    Capabilities, Config, HttpResponseGenerator, Intent, Language, ResponseClient, Role,
    SessionController, SessionId, SessionView,
};

/// How many chat entries the terminal front end shows
const VISIBLE_MESSAGES: usize = 8;

/// Talkback - Hold-to-talk voice client for conversational AI backends
#[derive(Parser)]
#[command(name = "talkback", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Response service base URL
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Recognition and synthesis language (e.g. "es-ES")
    #[arg(short, long, global = true)]
    language: Option<String>,

    /// Start with spoken replies disabled
    #[arg(long, global = true)]
    mute: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Show live microphone quality
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Speak text through the configured TTS provider
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hola, esto es una prueba de voz.")]
        text: String,
    },
    /// Send one transcript to the response service
    Ask {
        /// Transcript to send
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,talkback=info",
        1 => "info,talkback=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
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

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    // CLI flags take precedence over env and file
    if let Some(base_url) = &cli.base_url {
        config.service.base_url.clone_from(base_url);
    }
    if let Some(tag) = &cli.language {
        config.session.language = Language::parse(tag)?;
    }
    if cli.mute {
        config.session.voice_enabled = false;
    }
    tracing::debug!(?config.service, ?config.session, "loaded configuration");

    match cli.command {
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::TestTts { text }) => test_tts(&config, &text).await,
        Some(Command::Ask { text }) => ask(&config, &text).await,
        None => run_terminal(config).await,
    }
}

/// A line typed into the terminal front end
#[derive(Debug, PartialEq)]
enum Input {
    Intent(Intent),
    Help,
    Quit,
    Unknown(String),
}

fn parse_input(line: &str, is_active: bool) -> Input {
    let line = line.trim();
    let (command, argument) = line
        .split_once(char::is_whitespace)
        .map_or((line, ""), |(c, a)| (c, a.trim()));

    match command.to_ascii_lowercase().as_str() {
        "" if is_active => Input::Intent(Intent::PressEnd),
        "" => Input::Intent(Intent::PressStart),
        "v" | "voice" => Input::Intent(Intent::ToggleVoice),
        "lang" | "language" if !argument.is_empty() => {
            Input::Intent(Intent::SelectLanguage(argument.to_string()))
        }
        "vol" | "volume" => argument
            .parse::<f64>()
            .map_or_else(|_| Input::Unknown(line.to_string()), |v| Input::Intent(Intent::SetVolume(v))),
        "q" | "quit" | "exit" => Input::Quit,
        "?" | "h" | "help" => Input::Help,
        _ => Input::Unknown(line.to_string()),
    }
}

fn print_help() {
    println!("  <Enter>       start / stop talking");
    println!("  v             toggle spoken replies");
    println!("  lang <tag>    switch language (e.g. lang en-US)");
    println!("  vol <0-100>   set reply volume");
    println!("  q             quit");
}

fn render(view: &SessionView) {
    let status = &view.status;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let meter_len = (view.audio_quality.clamp(0.0, 1.0) * 20.0) as usize;

    println!(
        "\n[{}] {} | voice {} | vol {} | [{}{}]",
        if status.is_active { "LISTENING" } else { "idle" },
        status.selected_language,
        if status.voice_enabled { "on" } else { "off" },
        status.volume.percent(),
        "#".repeat(meter_len),
        " ".repeat(20 - meter_len),
    );

    if let Some(notice) = &status.notice {
        println!("! {notice}");
    }

    for message in view.newest_first().take(VISIBLE_MESSAGES) {
        let who = match message.role() {
            Role::User => "you",
            Role::Assistant => "bot",
        };
        println!(
            "  {} {who}: {}",
            message.timestamp().format("%H:%M:%S"),
            message.content()
        );
    }
}

/// Interactive hold-to-talk session in the terminal
async fn run_terminal(config: Config) -> anyhow::Result<()> {
    let capabilities = Capabilities::system(&config)?;
    let controller = Arc::new(SessionController::new(
        config.session_settings(),
        capabilities,
    ));

    println!("talkback - session {}", controller.session_id().await);
    print_help();

    // Redraw on every status change
    let renderer = {
        let controller = Arc::clone(&controller);
        let mut status = controller.subscribe();
        tokio::spawn(async move {
            render(&controller.snapshot().await);
            while status.changed().await.is_ok() {
                render(&controller.snapshot().await);
            }
        })
    };

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
        };

        match parse_input(&line, controller.status().is_active) {
            Input::Intent(intent) => controller.dispatch(intent).await,
            Input::Help => print_help(),
            Input::Quit => break,
            Input::Unknown(text) => println!("unknown command: {text} (? for help)"),
        }
    }

    renderer.abort();
    let _ = renderer.await;
    match Arc::try_unwrap(controller) {
        Ok(mut controller) => controller.shutdown().await,
        Err(controller) => controller.dispatch(Intent::PressEnd).await,
    }

    Ok(())
}

/// Show live microphone quality
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut sampler = AudioQualitySampler::new(
        Arc::new(CpalMicrophone::new()),
        Arc::new(RefreshClock::new(config.audio.frame_rate)),
        config.audio.analyzer,
    );

    let (_listening_tx, listening) = watch::channel(true);
    sampler.start(listening).await?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let quality = sampler.current();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (quality * 50.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] quality: {quality:.3} | [{meter}]", i + 1);
    }

    sampler.stop().await;

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If quality stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Speak text through the configured synthesis backend
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let tts = config.text_to_speech().ok_or_else(|| {
        anyhow::anyhow!("no API key for {} text-to-speech", config.voice.tts_provider)
    })?;
    let output = HttpSpeechOutput::new(Some(tts));

    println!("Synthesizing and playing...");
    let outcome = output
        .speak(SynthesisRequest {
            text: text.to_string(),
            language: config.session.language.clone(),
            volume: config.session.volume,
        })
        .await?;

    match outcome {
        UtteranceOutcome::Completed => {
            println!("\n---");
            println!("If you heard the speech, TTS is working!");
            Ok(())
        }
        UtteranceOutcome::Cancelled => anyhow::bail!("playback was cancelled"),
        UtteranceOutcome::Failed(e) => anyhow::bail!("TTS failed: {e}"),
    }
}

/// One round trip to the response service
async fn ask(config: &Config, text: &str) -> anyhow::Result<()> {
    let generator = HttpResponseGenerator::new(&config.service.base_url, config.service.timeout)?;
    println!("POST {}", generator.endpoint());

    let client = ResponseClient::new(Arc::new(generator));
    let reply = client.generate_response(text, &SessionId::generate()).await;

    if reply.is_fallback() {
        eprintln!("(request failed, showing fallback)");
    }
    println!("{}", reply.text());
    Ok(())
}
