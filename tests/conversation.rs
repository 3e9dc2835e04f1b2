//! End-to-end conversation behaviour with in-process fakes for the chat
//! API, the recognizer and the synthesizer.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::sleep;

use voice_chat::chat::ChatBackend;
use voice_chat::controller::{
    ConversationController, SubmitOutcome, FETCH_ERROR_BANNER, FETCH_ERROR_REPLY,
};
use voice_chat::message::{ConversationState, Message, Role};
use voice_chat::recognition::{
    Capability, EventSink, RecognitionEvent, SpeechRecognizer, TranscriptionAdapter, NOT_SUPPORTED,
};
use voice_chat::renderer::ResponseRenderer;
use voice_chat::synthesis::SpeechSynthesizer;
use voice_chat::{Error, Result};

const TICK: Duration = Duration::from_millis(50);

#[derive(Default)]
struct FakeBackend {
    replies: Mutex<VecDeque<std::result::Result<String, u16>>>,
    delay: Duration,
    /// Per-call delays, consumed in call order; `delay` once exhausted.
    delays: Mutex<VecDeque<Duration>>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl FakeBackend {
    fn replying(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| Ok(r.to_string())).collect()),
            ..Default::default()
        })
    }

    fn failing(status: u16) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Err(status)])),
            ..Default::default()
        })
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::from([Ok(reply.to_string())])),
            delay,
            ..Default::default()
        })
    }

    fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ChatBackend for FakeBackend {
    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.requests.lock().push(messages.to_vec());
        let delay = self.delays.lock().pop_front().unwrap_or(self.delay);
        if !delay.is_zero() {
            sleep(delay).await;
        }
        match self.replies.lock().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(status)) => Err(Error::Api {
                status,
                body: "{\"message\":\"boom\"}".into(),
            }),
            None => Err(Error::MalformedResponse("no scripted reply".into())),
        }
    }
}

#[derive(Default)]
struct FakeRecognizer {
    sink: Mutex<Option<EventSink>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    broken_mic: bool,
}

impl FakeRecognizer {
    fn emit(&self, event: RecognitionEvent) {
        if let Some(sink) = self.sink.lock().as_ref() {
            let _ = sink.send(event);
        }
    }
}

impl SpeechRecognizer for FakeRecognizer {
    fn start(&self) -> Result<()> {
        if self.broken_mic {
            return Err(Error::Audio("no input audio device available".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        self.emit(RecognitionEvent::Start);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.emit(RecognitionEvent::End);
    }

    fn set_sink(&self, sink: Option<EventSink>) {
        *self.sink.lock() = sink;
    }
}

#[derive(Default)]
struct CountingSynth {
    spoken: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

#[async_trait]
impl SpeechSynthesizer for CountingSynth {
    fn generation(&self) -> u64 {
        self.cancels.load(Ordering::SeqCst) as u64
    }

    async fn speak(&self, text: &str, generation: u64) -> Result<()> {
        if generation == self.generation() {
            self.spoken.lock().push(text.to_string());
        }
        Ok(())
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

fn controller_with(
    backend: Arc<FakeBackend>,
    synth: Option<Arc<dyn SpeechSynthesizer>>,
) -> ConversationController {
    let state = Arc::new(Mutex::new(ConversationState::new()));
    let renderer = ResponseRenderer::new(state.clone(), synth, TICK);
    ConversationController::with_state(backend, renderer, state)
}

fn controller(backend: Arc<FakeBackend>) -> ConversationController {
    controller_with(backend, None)
}

fn last_content(controller: &ConversationController) -> String {
    controller
        .snapshot()
        .last_message()
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

#[tokio::test]
async fn blank_input_is_ignored() {
    let backend = FakeBackend::replying(&["unused"]);
    let controller = controller(backend.clone());

    for text in ["", "   ", "\n\t"] {
        assert_eq!(controller.submit(text).await, SubmitOutcome::Ignored);
    }

    let state = controller.snapshot();
    assert!(state.messages.is_empty());
    assert!(!state.loading);
    assert_eq!(backend.request_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn reply_is_revealed_one_char_per_tick() {
    let controller = controller(FakeBackend::replying(&["Hello"]));

    let outcome = controller.submit("Hi").await;
    assert_eq!(outcome, SubmitOutcome::Replied("Hello".into()));

    let state = controller.snapshot();
    assert_eq!(state.messages, [Message::user("Hi"), Message::assistant("")]);
    assert!(!state.loading);
    assert!(state.error_message.is_none());

    sleep(TICK / 2).await;
    let mut frames = Vec::new();
    for _ in 0..5 {
        sleep(TICK).await;
        frames.push(last_content(&controller));
    }
    assert_eq!(frames, ["H", "He", "Hel", "Hell", "Hello"]);

    sleep(TICK * 5).await;
    let state = controller.snapshot();
    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1], Message::assistant("Hello"));
    assert!(!controller.is_revealing());
}

#[tokio::test]
async fn failed_request_adds_one_placeholder_and_banner() {
    let controller = controller(FakeBackend::failing(500));

    let outcome = controller.submit("Hi").await;
    assert!(matches!(outcome, SubmitOutcome::Failed(reason) if reason.contains("500")));

    let state = controller.snapshot();
    assert_eq!(
        state.messages,
        [Message::user("Hi"), Message::assistant(FETCH_ERROR_REPLY)]
    );
    assert_eq!(state.error_message.as_deref(), Some(FETCH_ERROR_BANNER));
    assert!(!state.loading);
    assert!(!state.is_generating);
}

#[tokio::test]
async fn next_submit_clears_banner() {
    let backend = Arc::new(FakeBackend {
        replies: Mutex::new(VecDeque::from([Err(503), Ok("ok".into())])),
        ..Default::default()
    });
    let controller = controller(backend);

    controller.submit("first").await;
    assert!(controller.snapshot().error_message.is_some());

    controller.submit("second").await;
    assert!(controller.snapshot().error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn loading_while_request_in_flight() {
    let controller = controller(FakeBackend::slow("done", Duration::from_secs(2)));
    controller.set_input("draft");

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit("draft").await }
    });
    sleep(Duration::from_millis(500)).await;

    let state = controller.snapshot();
    assert!(state.loading);
    assert!(state.is_generating);
    assert!(state.input_text.is_empty());
    assert_eq!(state.messages, [Message::user("draft")]);

    assert_eq!(task.await.unwrap(), SubmitOutcome::Replied("done".into()));
    assert!(!controller.snapshot().loading);
}

#[tokio::test(start_paused = true)]
async fn reset_empties_conversation() {
    let controller = controller(FakeBackend::replying(&["a long reply"]));
    controller.submit("Hi").await;
    sleep(TICK * 3).await;
    controller.set_input("half typed");

    controller.reset_conversation();

    let state = controller.snapshot();
    assert!(state.messages.is_empty());
    assert!(!state.loading);
    assert!(state.input_text.is_empty());
    assert!(state.error_message.is_none());

    // The cancelled reveal must not write into the fresh conversation
    sleep(TICK * 20).await;
    assert!(controller.snapshot().messages.is_empty());
}

#[tokio::test(start_paused = true)]
async fn reply_landing_after_reset_is_dropped() {
    let controller = controller(FakeBackend::slow("stale", Duration::from_secs(1)));

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit("Hi").await }
    });
    sleep(Duration::from_millis(100)).await;
    assert!(controller.snapshot().loading);

    controller.reset_conversation();
    assert!(!controller.snapshot().loading);

    assert_eq!(task.await.unwrap(), SubmitOutcome::Discarded);
    sleep(TICK * 10).await;

    let state = controller.snapshot();
    assert!(state.messages.is_empty());
    assert!(!state.loading);
}

#[tokio::test(start_paused = true)]
async fn stop_freezes_reveal_and_silences_speech() {
    let synth = Arc::new(CountingSynth::default());
    let controller = controller_with(FakeBackend::replying(&["Hello"]), Some(synth.clone()));

    controller.submit("Hi").await;
    sleep(TICK * 2 + TICK / 2).await;
    assert_eq!(last_content(&controller), "He");

    controller.stop_generation();
    sleep(TICK * 10).await;

    let state = controller.snapshot();
    assert_eq!(state.messages[1], Message::assistant("He"));
    assert!(!state.loading);
    assert!(!state.is_generating);
    assert_eq!(*synth.spoken.lock(), ["Hello"]);
    assert_eq!(synth.cancels.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_right_after_reply_keeps_it_silent() {
    let synth = Arc::new(CountingSynth::default());
    let controller = controller_with(FakeBackend::replying(&["Hello"]), Some(synth.clone()));

    assert_eq!(controller.submit("Hi").await, SubmitOutcome::Replied("Hello".into()));
    controller.stop_generation();
    sleep(TICK * 10).await;

    assert!(synth.spoken.lock().is_empty());
    assert_eq!(last_content(&controller), "");
}

#[tokio::test(start_paused = true)]
async fn each_completion_clears_flags_even_with_later_request_pending() {
    let backend = Arc::new(FakeBackend {
        replies: Mutex::new(VecDeque::from([Ok("re:first".into()), Ok("re:second".into())])),
        delays: Mutex::new(VecDeque::from([
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ])),
        ..Default::default()
    });
    let controller = controller(backend);

    let first = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit("first").await }
    });
    sleep(Duration::from_millis(10)).await;
    let second = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit("second").await }
    });

    assert_eq!(first.await.unwrap(), SubmitOutcome::Replied("re:first".into()));
    let state = controller.snapshot();
    assert!(!state.loading);
    assert!(!state.is_generating);

    assert_eq!(second.await.unwrap(), SubmitOutcome::Replied("re:second".into()));
    sleep(TICK * 20).await;

    let state = controller.snapshot();
    assert!(!state.loading);
    assert_eq!(
        state.messages,
        [
            Message::user("first"),
            Message::user("second"),
            Message::assistant("re:first"),
            Message::assistant("re:second"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failure_landing_after_reset_is_dropped() {
    let backend = Arc::new(FakeBackend {
        replies: Mutex::new(VecDeque::from([Err(502)])),
        delay: Duration::from_secs(1),
        ..Default::default()
    });
    let controller = controller(backend);

    let task = tokio::spawn({
        let controller = controller.clone();
        async move { controller.submit("Hi").await }
    });
    sleep(Duration::from_millis(100)).await;
    controller.reset_conversation();

    assert_eq!(task.await.unwrap(), SubmitOutcome::Discarded);
    let state = controller.snapshot();
    assert!(state.messages.is_empty());
    assert!(state.error_message.is_none());
}

#[tokio::test(start_paused = true)]
async fn new_turn_completes_previous_reveal() {
    let backend = FakeBackend::replying(&["Hello", "Again"]);
    let controller = controller(backend.clone());

    controller.submit("one").await;
    sleep(TICK + TICK / 2).await;
    assert_eq!(last_content(&controller), "H");

    controller.submit("two").await;

    // The second request saw the first reply in full
    let requests = backend.requests.lock().clone();
    assert_eq!(
        requests[1],
        [
            Message::user("one"),
            Message::assistant("Hello"),
            Message::user("two"),
        ]
    );

    sleep(TICK * 10).await;
    let roles: Vec<Role> = controller.snapshot().messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User, Role::Assistant]);
    assert_eq!(last_content(&controller), "Again");
}

#[tokio::test]
async fn mic_toggle_without_recognizer_reports_unsupported() {
    let controller = controller(FakeBackend::replying(&[]));
    let adapter = TranscriptionAdapter::new(
        controller.clone(),
        Capability::Unavailable("no backend".into()),
    );

    assert!(!adapter.is_available());
    assert!(adapter.attach().is_none());

    for _ in 0..3 {
        adapter.toggle();
        let state = controller.snapshot();
        assert!(!state.is_listening);
        assert_eq!(state.error_message.as_deref(), Some(NOT_SUPPORTED));
    }
}

#[tokio::test]
async fn mic_toggle_follows_recognizer_events() {
    let controller = controller(FakeBackend::replying(&[]));
    let recognizer = Arc::new(FakeRecognizer::default());
    let adapter = TranscriptionAdapter::new(
        controller.clone(),
        Capability::Available(recognizer.clone()),
    );
    let mut events = adapter.attach().unwrap();

    adapter.toggle();
    assert_eq!(recognizer.starts.load(Ordering::SeqCst), 1);
    adapter.handle_event(events.recv().await.unwrap());
    assert!(controller.snapshot().is_listening);

    adapter.toggle();
    assert_eq!(recognizer.stops.load(Ordering::SeqCst), 1);
    adapter.handle_event(events.recv().await.unwrap());
    assert!(!controller.snapshot().is_listening);
}

#[tokio::test(start_paused = true)]
async fn transcript_is_submitted_like_typed_text() {
    let backend = FakeBackend::replying(&["Sunny"]);
    let controller = controller(backend.clone());
    let recognizer = Arc::new(FakeRecognizer::default());
    let adapter = TranscriptionAdapter::new(
        controller.clone(),
        Capability::Available(recognizer.clone()),
    );
    let mut events = adapter.attach().unwrap();

    adapter.start();
    recognizer.emit(RecognitionEvent::Result("what's the weather".into()));
    recognizer.emit(RecognitionEvent::End);

    assert!(adapter.handle_event(events.recv().await.unwrap()).is_none());
    let submit = adapter
        .handle_event(events.recv().await.unwrap())
        .expect("transcript should trigger a submit");
    assert_eq!(controller.snapshot().input_text, "what's the weather");

    assert_eq!(submit.await.unwrap(), SubmitOutcome::Replied("Sunny".into()));
    adapter.handle_event(events.recv().await.unwrap());

    sleep(TICK * 10).await;
    let state = controller.snapshot();
    assert_eq!(
        state.messages,
        [Message::user("what's the weather"), Message::assistant("Sunny")]
    );
    assert!(state.input_text.is_empty());
    assert!(!state.is_listening);
    assert_eq!(backend.request_count(), 1);
}

#[tokio::test]
async fn recognition_errors_become_banner() {
    let controller = controller(FakeBackend::replying(&[]));
    let recognizer = Arc::new(FakeRecognizer::default());
    let adapter = TranscriptionAdapter::new(
        controller.clone(),
        Capability::Available(recognizer.clone()),
    );
    let mut events = adapter.attach().unwrap();

    recognizer.emit(RecognitionEvent::Error("no-speech".into()));
    adapter.handle_event(events.recv().await.unwrap());

    assert_eq!(
        controller.snapshot().error_message.as_deref(),
        Some("Error during speech recognition: no-speech")
    );
}

#[tokio::test]
async fn failing_start_is_reported() {
    let controller = controller(FakeBackend::replying(&[]));
    let recognizer = Arc::new(FakeRecognizer {
        broken_mic: true,
        ..Default::default()
    });
    let adapter = TranscriptionAdapter::new(controller.clone(), Capability::Available(recognizer));

    adapter.start();

    let state = controller.snapshot();
    assert!(!state.is_listening);
    let banner = state.error_message.unwrap();
    assert!(banner.starts_with("Error during speech recognition: "));
    assert!(banner.contains("no input audio device"));
}

#[tokio::test]
async fn detached_adapter_receives_nothing() {
    let controller = controller(FakeBackend::replying(&[]));
    let recognizer = Arc::new(FakeRecognizer::default());
    let adapter = TranscriptionAdapter::new(
        controller.clone(),
        Capability::Available(recognizer.clone()),
    );
    let mut events = adapter.attach().unwrap();

    adapter.detach();
    recognizer.emit(RecognitionEvent::Start);

    assert!(events.recv().await.is_none());
    assert!(!controller.snapshot().is_listening);
}
