//! Conversation controller.
//!
//! Owns the conversation state and sequences one exchange:
//! user text → chat request → speak + reveal the reply.
//! Clones share the same conversation.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::chat::ChatBackend;
use crate::message::{ConversationState, Message};
use crate::renderer::{ResponseRenderer, RevealHandle};

/// Banner text for a failed chat request.
pub const FETCH_ERROR_BANNER: &str = "Error: Unable to fetch response.";
/// Assistant message standing in for a reply that never came.
pub const FETCH_ERROR_REPLY: &str = "Error occurred.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Blank input; nothing happened.
    Ignored,
    /// The reply is being spoken and revealed.
    Replied(String),
    /// The request failed; placeholder appended.
    Failed(String),
    /// The conversation was reset while the request was in flight.
    Discarded,
}

struct Inner {
    state: Arc<Mutex<ConversationState>>,
    backend: Arc<dyn ChatBackend>,
    renderer: ResponseRenderer,
    reveal: Mutex<Option<RevealHandle>>,
}

#[derive(Clone)]
pub struct ConversationController {
    inner: Arc<Inner>,
}

impl ConversationController {
    pub fn new(backend: Arc<dyn ChatBackend>, renderer: ResponseRenderer) -> Self {
        Self::with_state(backend, renderer, Arc::new(Mutex::new(ConversationState::new())))
    }

    /// Build around an existing state; the renderer must write to the same one.
    pub fn with_state(
        backend: Arc<dyn ChatBackend>,
        renderer: ResponseRenderer,
        state: Arc<Mutex<ConversationState>>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state,
                backend,
                renderer,
                reveal: Mutex::new(None),
            }),
        }
    }

    pub fn snapshot(&self) -> ConversationState {
        self.inner.state.lock().clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.inner.state.lock().input_text = text.into();
    }

    pub fn edit_input(&self, edit: impl FnOnce(&mut String)) {
        edit(&mut self.inner.state.lock().input_text);
    }

    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        self.inner.state.lock().error_message = Some(message);
    }

    pub fn set_listening(&self, listening: bool) {
        self.inner.state.lock().is_listening = listening;
    }

    pub fn is_revealing(&self) -> bool {
        self.inner
            .reveal
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Send `text` as the next user turn and render the reply.
    ///
    /// Flags are cleared once the request settles, even if a later submit
    /// is still waiting; the reveal may still be running when this returns.
    pub async fn submit(&self, text: &str) -> SubmitOutcome {
        if text.trim().is_empty() {
            return SubmitOutcome::Ignored;
        }

        // The previous reply must not be mid-reveal when a new turn lands
        self.settle_reveal();

        let (history, session) = {
            let mut state = self.inner.state.lock();
            state.messages.push(Message::user(text));
            state.input_text.clear();
            state.error_message = None;
            state.loading = true;
            state.is_generating = true;
            (state.messages.clone(), state.session)
        };
        info!("Submitting message #{} ({} chars)", history.len(), text.chars().count());

        let result = self.inner.backend.complete(&history).await;

        // The network step is over, whatever came back
        {
            let mut state = self.inner.state.lock();
            state.loading = false;
            state.is_generating = false;
        }

        match result {
            Ok(reply) => {
                debug!("Reply received ({} chars)", reply.chars().count());
                // Reset takes this slot before bumping the session
                let mut slot = self.inner.reveal.lock();
                if self.inner.state.lock().session != session {
                    info!("Conversation was reset; dropping stale reply");
                    return SubmitOutcome::Discarded;
                }
                if let Some(previous) = slot.take() {
                    previous.finish();
                }
                let Some(handle) = self.inner.renderer.reveal(&reply, session) else {
                    info!("Conversation was reset; dropping stale reply");
                    return SubmitOutcome::Discarded;
                };
                *slot = Some(handle);
                drop(slot);
                self.inner.renderer.speak(&reply);
                SubmitOutcome::Replied(reply)
            }
            Err(e) => {
                warn!("Chat request failed: {e}");
                let mut state = self.inner.state.lock();
                if state.session != session {
                    info!("Conversation was reset; dropping stale failure");
                    return SubmitOutcome::Discarded;
                }
                state.error_message = Some(FETCH_ERROR_BANNER.to_string());
                state.messages.push(Message::assistant(FETCH_ERROR_REPLY));
                SubmitOutcome::Failed(e.to_string())
            }
        }
    }

    /// Start a new chat. The running reveal is cancelled and a reply still
    /// in flight is dropped when it lands.
    pub fn reset_conversation(&self) {
        // Held across the session bump so a landing reply can't slip in between
        let mut slot = self.inner.reveal.lock();
        if let Some(handle) = slot.take() {
            handle.cancel();
        }
        self.inner.state.lock().reset();
        drop(slot);
        info!("Conversation reset");
    }

    /// Stop speaking and freeze the reveal where it is.
    pub fn stop_generation(&self) {
        {
            let mut state = self.inner.state.lock();
            state.is_generating = false;
            state.loading = false;
        }
        self.inner.renderer.cancel_speech();
        if let Some(handle) = self.inner.reveal.lock().take() {
            handle.cancel();
        }
        info!("Generation stopped");
    }

    fn settle_reveal(&self) {
        if let Some(handle) = self.inner.reveal.lock().take() {
            if !handle.is_finished() {
                debug!("Completing previous reveal before new turn");
            }
            handle.finish();
        }
    }
}
