// Presence command line interface
// Runs the streaming client, a demo broadcaster, or checks a config file

use anyhow::Context;
use clap::{Parser, Subcommand};
use presence_core::{LogLevel, PresenceConfig, SessionState, OUTPUT_SAMPLE_RATE};
use presence_session::{PresenceBroadcaster, PresencePipeline, SessionUpdate};
use std::f32::consts::TAU;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "presence")]
#[command(about = "Real-time agent speech and presence streaming", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to an agent server and play its speech
    Listen {
        /// WebSocket URL of the agent server
        #[arg(long)]
        url: Option<String>,

        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,

        /// Run the render clock without an audio device
        #[arg(long)]
        headless: bool,
    },

    /// Serve a synthetic utterance on a loop for clients to connect to
    ServeDemo {
        /// Port to listen on
        #[arg(long)]
        port: Option<u16>,

        /// Configuration file (JSON, TOML or YAML)
        #[arg(long, short)]
        config: Option<PathBuf>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen { url, config, headless } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(url) = url {
                config.connection.url = url;
            }
            if headless {
                config.playback.headless = true;
            }
            init_tracing(&config.log_level, cli.log_json);
            listen(config).await?;
        }
        Commands::ServeDemo { port, config } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(port) = port {
                config.broadcaster.port = port;
            }
            init_tracing(&config.log_level, cli.log_json);
            serve_demo(config).await?;
        }
        Commands::CheckConfig { path } => {
            let config = PresenceConfig::from_file(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("Invalid configuration in {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("✅ {} is valid", path.display());
        }
    }

    Ok(())
}

fn init_tracing(level: &LogLevel, json: bool) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// File (if given) overlaid with `PRESENCE_*` environment variables
fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PresenceConfig> {
    let mut config = match path {
        Some(path) => PresenceConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => PresenceConfig::default(),
    };
    config.apply_env();
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn listen(config: PresenceConfig) -> anyhow::Result<()> {
    let mut pipeline = PresencePipeline::start(config)?;

    let mut updates = pipeline.feed().subscribe_session();
    let update_log = tokio::spawn(async move {
        while let Ok(update) = updates.recv().await {
            if let SessionUpdate::Emotion(emotion) = update {
                info!(%emotion, "Emotion changed");
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
        exit = pipeline.closed() => {
            match exit {
                Ok(exit) => info!(?exit, "Connection ended"),
                Err(e) => error!("Connection failed: {}", e),
            }
        }
    }

    let stats = pipeline.buffer_stats();
    let result = pipeline.shutdown().await;
    update_log.abort();
    info!(
        frames = stats.frames(),
        underruns = stats.underruns(),
        "Playback summary"
    );

    result?;
    Ok(())
}

async fn serve_demo(config: PresenceConfig) -> anyhow::Result<()> {
    let broadcaster = PresenceBroadcaster::new(config.broadcaster.channel_capacity);
    let server = broadcaster.bind(&config.broadcaster.socket_addr()).await?;
    info!("Demo clients can connect to ws://{}/", server.local_addr());

    let frame_size = config.playback.frame_size;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
            result = play_demo_utterance(&broadcaster, frame_size) => {
                if let Err(e) = result {
                    warn!("Demo utterance failed: {}", e);
                }
            }
        }
    }

    server.shutdown().await?;
    Ok(())
}

/// thinking, then 1.5 s of a 440 Hz tone paced in real time, then idle
async fn play_demo_utterance(
    broadcaster: &PresenceBroadcaster,
    frame_size: usize,
) -> Result<(), presence_session::PresenceError> {
    const TONE_HZ: f32 = 440.0;
    const AMPLITUDE: f32 = 0.2;
    const UTTERANCE_SECS: f32 = 1.5;

    let id = uuid::Uuid::new_v4().to_string();
    let sample_rate = OUTPUT_SAMPLE_RATE as f32;
    let total = (UTTERANCE_SECS * sample_rate) as usize;
    let period = Duration::from_secs_f32(frame_size as f32 / sample_rate);

    broadcaster.state(SessionState::Thinking)?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    broadcaster.tts_begin(OUTPUT_SAMPLE_RATE, &id)?;
    let mut ticker = tokio::time::interval(period);
    let mut start = 0;
    while start < total {
        ticker.tick().await;
        let end = (start + frame_size).min(total);
        let chunk: Vec<f32> = (start..end)
            .map(|n| {
                // Short linear fade at both ends
                let fade = (n.min(total - n) as f32 / 480.0).min(1.0);
                AMPLITUDE * fade * (TAU * TONE_HZ * n as f32 / sample_rate).sin()
            })
            .collect();
        broadcaster.tts_chunk(&id, start as f64 / sample_rate as f64, &chunk)?;
        start = end;
    }
    broadcaster.tts_end(&id)?;
    broadcaster.state(SessionState::Idle)?;

    info!(stream_id = %id, clients = broadcaster.client_count(), "Demo utterance sent");
    tokio::time::sleep(Duration::from_secs(1)).await;
    Ok(())
}
