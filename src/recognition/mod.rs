//! Speech recognition: capability negotiation and the transcription adapter.
//!
//! A recognizer runs one non-continuous session at a time and reports
//! through an event sink: `Start`, then `Result` or `Error`, then `End`.
//! The adapter turns those events into conversation state changes and
//! auto-submits every transcript.

#[cfg(feature = "whisper")]
pub mod recorder;
#[cfg(feature = "whisper")]
pub mod transcriber;
#[cfg(feature = "whisper")]
pub mod whisper;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::Config;
use crate::controller::{ConversationController, SubmitOutcome};
use crate::Result;

pub const NOT_SUPPORTED: &str = "Speech recognition not supported on this system.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    Start,
    End,
    Result(String),
    Error(String),
}

pub type EventSink = mpsc::UnboundedSender<RecognitionEvent>;

/// A platform speech-recognition engine.
pub trait SpeechRecognizer: Send + Sync {
    /// Begin a session. Emits `Start` once capture is running.
    fn start(&self) -> Result<()>;

    /// End the current session early. The result and `End` still arrive.
    fn stop(&self);

    /// Install or clear the event sink. With no sink, events are dropped.
    fn set_sink(&self, sink: Option<EventSink>);
}

/// Outcome of probing for a recognizer at startup.
#[derive(Clone)]
pub enum Capability {
    Available(Arc<dyn SpeechRecognizer>),
    Unavailable(String),
}

impl Capability {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }
}

/// Check once for a usable recognizer.
pub fn negotiate(config: &Config) -> Capability {
    if !config.recognition.enabled {
        return Capability::Unavailable("disabled in config".into());
    }
    detect(config)
}

#[cfg(feature = "whisper")]
fn detect(config: &Config) -> Capability {
    match whisper::WhisperRecognizer::load(config) {
        Ok(recognizer) => Capability::Available(Arc::new(recognizer)),
        Err(e) => {
            tracing::warn!("Speech recognition unavailable: {e}");
            Capability::Unavailable(e.to_string())
        }
    }
}

#[cfg(not(feature = "whisper"))]
fn detect(_config: &Config) -> Capability {
    Capability::Unavailable("built without the `whisper` feature".into())
}

pub struct TranscriptionAdapter {
    controller: ConversationController,
    capability: Capability,
}

impl TranscriptionAdapter {
    pub fn new(controller: ConversationController, capability: Capability) -> Self {
        if let Capability::Unavailable(reason) = &capability {
            info!("Microphone input off: {reason}");
        }
        Self {
            controller,
            capability,
        }
    }

    pub fn is_available(&self) -> bool {
        self.capability.is_available()
    }

    /// Route recognizer events to a fresh receiver. None if unavailable.
    pub fn attach(&self) -> Option<mpsc::UnboundedReceiver<RecognitionEvent>> {
        let Capability::Available(recognizer) = &self.capability else {
            return None;
        };
        let (tx, rx) = mpsc::unbounded_channel();
        recognizer.set_sink(Some(tx));
        Some(rx)
    }

    /// Clear the sink so nothing reaches a torn-down view.
    pub fn detach(&self) {
        if let Capability::Available(recognizer) = &self.capability {
            recognizer.set_sink(None);
            debug!("Recognition events detached");
        }
    }

    pub fn start(&self) {
        match &self.capability {
            Capability::Unavailable(_) => self.controller.set_error(NOT_SUPPORTED),
            Capability::Available(recognizer) => {
                if let Err(e) = recognizer.start() {
                    self.on_error(&e.to_string());
                }
            }
        }
    }

    pub fn stop(&self) {
        if let Capability::Available(recognizer) = &self.capability {
            recognizer.stop();
        }
    }

    /// Mic button: stop if listening, start otherwise.
    pub fn toggle(&self) {
        if self.controller.snapshot().is_listening {
            self.stop();
        } else {
            self.start();
        }
    }

    /// Apply one recognizer event. A transcript returns the spawned submit.
    pub fn handle_event(&self, event: RecognitionEvent) -> Option<JoinHandle<SubmitOutcome>> {
        match event {
            RecognitionEvent::Start => {
                self.on_start();
                None
            }
            RecognitionEvent::End => {
                self.on_end();
                None
            }
            RecognitionEvent::Result(transcript) => Some(self.on_result(transcript)),
            RecognitionEvent::Error(error) => {
                self.on_error(&error);
                None
            }
        }
    }

    fn on_start(&self) {
        info!("Listening");
        self.controller.set_listening(true);
    }

    fn on_end(&self) {
        info!("Stopped listening");
        self.controller.set_listening(false);
    }

    fn on_result(&self, transcript: String) -> JoinHandle<SubmitOutcome> {
        info!("Transcript: {transcript:?}");
        self.controller.set_input(transcript.clone());
        let controller = self.controller.clone();
        tokio::spawn(async move { controller.submit(&transcript).await })
    }

    fn on_error(&self, error: &str) {
        self.controller
            .set_error(format!("Error during speech recognition: {error}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_config_is_unavailable() {
        let mut config = Config::default();
        config.recognition.enabled = false;
        assert!(matches!(
            negotiate(&config),
            Capability::Unavailable(reason) if reason == "disabled in config"
        ));
    }

    #[cfg(not(feature = "whisper"))]
    #[test]
    fn build_without_backend_is_unavailable() {
        assert!(!negotiate(&Config::default()).is_available());
    }
}
