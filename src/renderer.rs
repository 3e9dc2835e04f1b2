//! Response renderer: speaks a finished reply and types it out into the
//! message list one character per tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, warn};

use crate::message::{ConversationState, Message};
use crate::synthesis::SpeechSynthesizer;

/// Handle to a running reveal. Dropping it leaves the task running.
pub struct RevealHandle {
    task: JoinHandle<()>,
    stopped: Arc<AtomicBool>,
    state: Arc<Mutex<ConversationState>>,
    text: String,
}

impl RevealHandle {
    /// Stop revealing; the message keeps whatever prefix it has now.
    pub fn cancel(self) {
        {
            let _state = self.state.lock();
            self.stopped.store(true, Ordering::SeqCst);
        }
        self.task.abort();
    }

    /// Stop revealing and show the whole reply at once.
    pub fn finish(self) {
        {
            let mut state = self.state.lock();
            if !self.stopped.swap(true, Ordering::SeqCst) {
                state.show_partial_reply(&self.text);
            }
        }
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub struct ResponseRenderer {
    state: Arc<Mutex<ConversationState>>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    interval: Duration,
}

impl ResponseRenderer {
    pub fn new(
        state: Arc<Mutex<ConversationState>>,
        synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
        interval: Duration,
    ) -> Self {
        Self {
            state,
            synthesizer,
            interval,
        }
    }

    /// Queue `text` for speech. Fire-and-forget.
    ///
    /// The cancel generation is taken before the task is spawned, so a
    /// `cancel_speech` issued right after this call still drops it.
    pub fn speak(&self, text: &str) {
        let Some(synth) = self.synthesizer.clone() else {
            return;
        };
        let generation = synth.generation();
        let text = text.to_string();
        tokio::spawn(async move {
            if let Err(e) = synth.speak(&text, generation).await {
                warn!("Speech synthesis failed: {e}");
            }
        });
    }

    /// Drop everything queued or playing.
    pub fn cancel_speech(&self) {
        if let Some(synth) = &self.synthesizer {
            synth.cancel();
        }
    }

    /// Append an empty assistant message and grow it by one character per
    /// tick until it holds all of `text`.
    ///
    /// Returns None without touching the state if the conversation is no
    /// longer `session`.
    pub fn reveal(&self, text: &str, session: u64) -> Option<RevealHandle> {
        {
            let mut state = self.state.lock();
            if state.session != session {
                return None;
            }
            state.messages.push(Message::assistant(""));
        }

        let stopped = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_reveal(
            Arc::clone(&self.state),
            text.to_string(),
            self.interval,
            Arc::clone(&stopped),
        ));

        Some(RevealHandle {
            task,
            stopped,
            state: Arc::clone(&self.state),
            text: text.to_string(),
        })
    }
}

async fn run_reveal(
    state: Arc<Mutex<ConversationState>>,
    text: String,
    period: Duration,
    stopped: Arc<AtomicBool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    let mut shown = String::with_capacity(text.len());

    for ch in text.chars() {
        ticker.tick().await;
        shown.push(ch);

        let mut guard = state.lock();
        if stopped.load(Ordering::SeqCst) {
            return;
        }
        guard.show_partial_reply(&shown);
    }

    stopped.store(true, Ordering::SeqCst);
    debug!("Reveal complete ({} chars)", shown.chars().count());
}
