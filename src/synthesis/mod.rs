//! Speech synthesis: the "speak the reply" half of the renderer.
//!
//! Backends:
//! - `command`: an external TTS program (spd-say, espeak-ng, say, ...)
//! - `kokoro`: native Kokoro ONNX inference + rodio playback (feature `kokoro`)

#[cfg(feature = "kokoro")]
pub mod kokoro;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::config::{SynthesisBackend, SynthesisConfig};
use crate::{Error, Result};

/// A speech-synthesis queue. `speak` resolves once the utterance has been
/// played or dropped; `cancel` drops everything queued or playing.
///
/// Callers take a `generation()` ticket when they decide to speak and pass it
/// to `speak`. An utterance whose ticket predates the latest `cancel` is
/// dropped, even if its task had not started running yet.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Current cancel generation.
    fn generation(&self) -> u64;

    async fn speak(&self, text: &str, generation: u64) -> Result<()>;

    fn cancel(&self);
}

/// Runs one external process per utterance, in submission order.
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
    turn: AsyncMutex<()>,
    cancel_tx: watch::Sender<u64>,
}

impl CommandSynthesizer {
    pub fn new(command: &[String]) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| Error::Config("synthesis.command is empty".into()))?;
        let (cancel_tx, _) = watch::channel(0);

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            turn: AsyncMutex::new(()),
            cancel_tx,
        })
    }
}

#[async_trait]
impl SpeechSynthesizer for CommandSynthesizer {
    fn generation(&self) -> u64 {
        *self.cancel_tx.borrow()
    }

    async fn speak(&self, text: &str, generation: u64) -> Result<()> {
        if text.trim().is_empty() {
            return Ok(());
        }

        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow_and_update() != generation {
            debug!("Utterance cancelled before it was queued");
            return Ok(());
        }

        let _turn = self.turn.lock().await;
        if *cancel_rx.borrow() != generation {
            debug!("Utterance cancelled while queued");
            return Ok(());
        }

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::Synthesis(format!("failed to spawn {}: {e}", self.program)))?;

        tokio::select! {
            status = child.wait() => {
                let status = status?;
                if !status.success() {
                    warn!("{} exited with {status}", self.program);
                }
            }
            _ = cancel_rx.changed() => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to stop {}: {e}", self.program);
                }
                debug!("Utterance cancelled during playback");
            }
        }

        Ok(())
    }

    fn cancel(&self) {
        self.cancel_tx.send_modify(|epoch| *epoch += 1);
    }
}

/// Pick the configured backend. `None` means synthesis is off.
pub fn build(config: &SynthesisConfig) -> Option<Arc<dyn SpeechSynthesizer>> {
    match config.backend {
        SynthesisBackend::None => {
            info!("Speech synthesis disabled");
            None
        }
        SynthesisBackend::Command => match CommandSynthesizer::new(&config.command) {
            Ok(synth) => {
                info!("Speech synthesis via `{}`", config.command.join(" "));
                Some(Arc::new(synth))
            }
            Err(e) => {
                warn!("{e}; continuing without voice output");
                None
            }
        },
        SynthesisBackend::Kokoro => build_kokoro(config),
    }
}

#[cfg(feature = "kokoro")]
fn build_kokoro(config: &SynthesisConfig) -> Option<Arc<dyn SpeechSynthesizer>> {
    info!("Loading Kokoro TTS model...");
    let mut engine = kokoro::KokoroSynthesizer::new(config);
    match engine.load_model_sync() {
        Ok(()) => {
            info!("Kokoro TTS ready (voice: {}, speed: {})", config.voice, config.speed);
            Some(Arc::new(engine))
        }
        Err(e) => {
            warn!("Failed to load TTS model: {e}");
            info!("TTS disabled, continuing without voice output");
            None
        }
    }
}

#[cfg(not(feature = "kokoro"))]
fn build_kokoro(_config: &SynthesisConfig) -> Option<Arc<dyn SpeechSynthesizer>> {
    warn!("Kokoro backend requested but this build lacks the `kokoro` feature");
    None
}
