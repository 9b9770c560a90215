use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxy_voice::config::VoiceConfig;
use voxy_voice::core::audio::{AudioSink, AudioSource, CaptureProfile};
use voxy_voice::core::credentials::ChainedCredentialProvider;
use voxy_voice::core::events::VoiceEvent;
use voxy_voice::core::realtime::{
    RealtimeVoice, SessionCapabilities, VoiceSession, WebSocketConnector,
};

/// Voxy - talk to the realtime assistant from a terminal
#[derive(Parser, Debug)]
#[command(name = "voxy-voice")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Assistant voice (alloy, ash, ballad, coral, echo, sage, shimmer, verse)
    #[arg(long)]
    voice: Option<String>,

    /// Realtime model
    #[arg(long)]
    model: Option<String>,

    /// Let the assistant speak first
    #[arg(long)]
    greet: bool,

    /// Use smaller capture frames (constrained devices)
    #[arg(long)]
    constrained: bool,
}

#[cfg(feature = "device-audio")]
fn audio_devices() -> (Arc<dyn AudioSource>, Arc<dyn AudioSink>) {
    use voxy_voice::core::audio::{CpalAudioSink, CpalAudioSource};
    (Arc::new(CpalAudioSource), Arc::new(CpalAudioSink))
}

#[cfg(not(feature = "device-audio"))]
fn audio_devices() -> (Arc<dyn AudioSource>, Arc<dyn AudioSink>) {
    use voxy_voice::core::audio::{HeadlessAudioSink, SilentAudioSource};
    warn!("Built without device-audio: capturing silence and discarding playback");
    (Arc::new(SilentAudioSource), Arc::new(HeadlessAudioSink))
}

fn print_event(event: &VoiceEvent) {
    match event {
        VoiceEvent::UserTranscript { text } => println!("you:   {text}"),
        VoiceEvent::AssistantTranscript { text } => println!("voxy:  {text}"),
        VoiceEvent::UserTranscriptPartial { .. } | VoiceEvent::AssistantTranscriptPartial { .. } => {}
        VoiceEvent::Error { error } => eprintln!("error: {error}"),
        other => info!("{}", other),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Initialize crypto provider for TLS connections
    // This must be done before any TLS connections are attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        info!("Loading configuration from {}", config_path.display());
        VoiceConfig::from_file(config_path)
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?
    } else {
        VoiceConfig::from_env().context("Invalid configuration from environment")?
    };

    if let Some(voice) = &cli.voice {
        config.voice = RealtimeVoice::from_str_or_default(voice);
    }
    if let Some(model) = cli.model {
        config.model = model;
    }
    if cli.constrained {
        config.audio.capture_profile = CaptureProfile::Constrained;
    }
    config.validate()?;

    let credentials = ChainedCredentialProvider::from_settings(&config.credentials)
        .context("Invalid credential settings")?;
    info!("Credential sources: {:?}", credentials.provider_names());

    let (audio_source, audio_sink) = audio_devices();
    let capabilities = SessionCapabilities {
        connector: Arc::new(WebSocketConnector::new()),
        credentials: Arc::new(credentials),
        audio_source,
        audio_sink,
    };

    let mut session = VoiceSession::new(config, capabilities);
    let mut events = session.subscribe();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Event printer lagged, skipped {} events", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    session.connect().await.context("Failed to connect")?;
    if cli.greet {
        session.trigger_greeting().await?;
    }
    session
        .start_listening()
        .await
        .context("Failed to start listening")?;
    println!("Listening. Press Ctrl-C to stop.");

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Shutting down");
                session.disconnect().await;
                break;
            }
            more = session.process_next() => {
                if !more {
                    info!("Session ended");
                    break;
                }
            }
        }
    }

    drop(session);
    let _ = printer.await;
    Ok(())
}
