//! Local recognizer: cpal capture with silence detection, transcribed by
//! Whisper once the utterance ends.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::recorder::AudioRecorder;
use super::transcriber::WhisperTranscriber;
use super::{EventSink, RecognitionEvent, SpeechRecognizer};
use crate::config::Config;
use crate::Result;

const AUTO_STOP_POLL: Duration = Duration::from_millis(100);

pub struct WhisperRecognizer {
    shared: Arc<Shared>,
}

struct Shared {
    recorder: AudioRecorder,
    transcriber: WhisperTranscriber,
    sink: Mutex<Option<EventSink>>,
    active: AtomicBool,
    silence_threshold: f32,
    save_wav: Option<PathBuf>,
}

impl WhisperRecognizer {
    /// Load the Whisper model. The microphone opens on the first session.
    pub fn load(config: &Config) -> Result<Self> {
        let transcriber = WhisperTranscriber::load(&config.recognition)?;
        let recorder = AudioRecorder::new(config.audio.clone(), config.silence.clone());

        Ok(Self {
            shared: Arc::new(Shared {
                recorder,
                transcriber,
                sink: Mutex::new(None),
                active: AtomicBool::new(false),
                silence_threshold: config.silence.threshold,
                save_wav: config.recognition.save_wav.clone(),
            }),
        })
    }
}

impl SpeechRecognizer for WhisperRecognizer {
    fn start(&self) -> Result<()> {
        if self.shared.active.load(Ordering::SeqCst) {
            debug!("Recognition session already running");
            return Ok(());
        }

        self.shared.recorder.open_stream()?;
        self.shared.recorder.start();
        self.shared.active.store(true, Ordering::SeqCst);
        self.shared.emit(RecognitionEvent::Start);

        // Poll for silence detection ending the utterance
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(AUTO_STOP_POLL);
            loop {
                ticker.tick().await;
                if !shared.active.load(Ordering::SeqCst) {
                    break;
                }
                if shared.recorder.should_auto_stop() {
                    if shared.active.swap(false, Ordering::SeqCst) {
                        info!("End of utterance detected");
                        Arc::clone(&shared).finish().await;
                    }
                    break;
                }
            }
        });
        Ok(())
    }

    fn stop(&self) {
        if self.shared.active.swap(false, Ordering::SeqCst) {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move { shared.finish().await });
        }
    }

    fn set_sink(&self, sink: Option<EventSink>) {
        *self.shared.sink.lock() = sink;
    }
}

impl Shared {
    fn emit(&self, event: RecognitionEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            let _ = sink.send(event);
        }
    }

    /// Close the session: transcribe what was captured, then emit `End`.
    async fn finish(self: Arc<Self>) {
        let samples = self.recorder.stop();

        if let Some(path) = &self.save_wav {
            if let Err(e) = self.recorder.save_wav(path, &samples) {
                warn!("Failed to save recording: {e}");
            }
        }

        if samples.is_empty() || AudioRecorder::is_silent(&samples, self.silence_threshold) {
            info!("No speech captured");
            self.emit(RecognitionEvent::Error("no-speech".into()));
            self.emit(RecognitionEvent::End);
            return;
        }

        let transcriber = self.transcriber.clone();
        let outcome = tokio::task::spawn_blocking(move || transcriber.transcribe(&samples)).await;

        match outcome {
            Ok(Ok(text)) if !text.trim().is_empty() => {
                self.emit(RecognitionEvent::Result(text.trim().to_string()));
            }
            Ok(Ok(_)) => self.emit(RecognitionEvent::Error("no-speech".into())),
            Ok(Err(e)) => self.emit(RecognitionEvent::Error(e.to_string())),
            Err(e) => self.emit(RecognitionEvent::Error(format!("transcription task failed: {e}"))),
        }
        self.emit(RecognitionEvent::End);
    }
}
