//! voice-chat: talk to a hosted language model from the terminal.

use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voice_chat::chat::CohereChatClient;
use voice_chat::config::{Config, SynthesisBackend};
use voice_chat::controller::ConversationController;
use voice_chat::message::ConversationState;
use voice_chat::recognition::{self, TranscriptionAdapter};
use voice_chat::renderer::ResponseRenderer;
use voice_chat::{synthesis, tui};

#[derive(Parser, Debug)]
#[command(name = "voice-chat", about = "Voice chat with a hosted language model")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Chat model to use (overrides config)
    #[arg(short, long)]
    model: Option<String>,

    /// Don't read replies aloud
    #[arg(long)]
    mute: bool,

    /// Disable microphone input
    #[arg(long)]
    no_mic: bool,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

fn open_log(path: &std::path::Path) -> std::io::Result<File> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let (mut config, origin) = Config::load(args.config.as_deref());
    if let Some(model) = args.model {
        config.chat.model = model;
    }
    if args.mute {
        config.synthesis.backend = SynthesisBackend::None;
    }
    if args.no_mic {
        config.recognition.enabled = false;
    }

    // The terminal belongs to the UI, so logs go to a file
    let filter = if args.verbose {
        EnvFilter::new("debug,whisper_rs=info,ort=info")
    } else {
        EnvFilter::new("info,whisper_rs=warn,ort=warn")
    };
    let log_path = config.logging.file_path();
    let log_file = open_log(&log_path)?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(log_file))
        .with_ansi(false)
        .init();

    info!("voice-chat starting (log: {})", log_path.display());
    origin.log();
    info!("Chat model: {} at {}", config.chat.model, config.chat.host);

    let client = CohereChatClient::new(config.chat.clone())?;
    let model = client.model().to_string();

    // Native backends load models from disk; keep that off the runtime threads
    let synthesizer = tokio::task::spawn_blocking({
        let synthesis_config = config.synthesis.clone();
        move || synthesis::build(&synthesis_config)
    })
    .await?;
    let capability = tokio::task::spawn_blocking({
        let config = config.clone();
        move || recognition::negotiate(&config)
    })
    .await?;

    let state = Arc::new(parking_lot::Mutex::new(ConversationState::new()));
    let renderer = ResponseRenderer::new(state.clone(), synthesizer, config.reveal.interval());
    let controller = ConversationController::with_state(Arc::new(client), renderer, state);
    let adapter = TranscriptionAdapter::new(controller.clone(), capability);
    let mut app = tui::app::App::new(controller.clone(), adapter, model);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = tui::app::run(&mut terminal, &mut app, config.ui.frame_interval()).await;
    tui::restore()?;

    controller.stop_generation();
    if let Err(e) = &result {
        warn!("UI loop failed: {e}");
    }
    info!("voice-chat exiting");
    Ok(result?)
}
