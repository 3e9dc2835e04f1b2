//! Terminal front end state and key bindings.

use std::time::Duration;

use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use tokio::sync::mpsc;
use tracing::debug;

use super::{AppEvent, EventHandler, Tui};
use crate::controller::{ConversationController, SubmitOutcome};
use crate::recognition::{RecognitionEvent, TranscriptionAdapter};
use crate::Result;

pub struct App {
    pub controller: ConversationController,
    pub adapter: TranscriptionAdapter,
    pub model: String,
    pub should_quit: bool,

    // Message list scrolling; `follow` pins the view to the newest line
    pub scroll: u16,
    pub follow: bool,
    pub chat_height: u16,

    // 0-2, cycles the dots of the typing indicator
    pub animation_frame: u8,
    ticks: u32,
}

impl App {
    pub fn new(
        controller: ConversationController,
        adapter: TranscriptionAdapter,
        model: impl Into<String>,
    ) -> Self {
        Self {
            controller,
            adapter,
            model: model.into(),
            should_quit: false,
            scroll: 0,
            follow: true,
            chat_height: 0,
            animation_frame: 0,
            ticks: 0,
        }
    }

    pub fn handle_event(&mut self, event: AppEvent) {
        match event {
            AppEvent::Key(key) => self.handle_key(key),
            AppEvent::Resize(_, _) => {}
            AppEvent::Tick => self.tick(),
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent) {
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);

        match key.code {
            KeyCode::Char('c') if ctrl => self.should_quit = true,
            KeyCode::Char('r') if ctrl => self.adapter.toggle(),
            KeyCode::F(2) => self.adapter.toggle(),
            KeyCode::Char('n') if ctrl => {
                self.controller.reset_conversation();
                self.scroll = 0;
                self.follow = true;
            }
            KeyCode::Esc => self.controller.stop_generation(),
            KeyCode::Enter => self.send(),
            KeyCode::PageUp => self.scroll_up(),
            KeyCode::PageDown => self.scroll_down(),
            KeyCode::Backspace => self.controller.edit_input(|input| {
                input.pop();
            }),
            KeyCode::Char(c) if !ctrl => self.controller.edit_input(|input| input.push(c)),
            _ => {}
        }
    }

    /// Apply a recognizer event; transcripts are sent like typed input.
    pub fn handle_recognition(&mut self, event: RecognitionEvent) {
        if let Some(task) = self.adapter.handle_event(event) {
            self.follow = true;
            log_outcome(task);
        }
    }

    fn send(&mut self) {
        let text = self.controller.snapshot().input_text;
        if text.trim().is_empty() {
            return;
        }
        self.follow = true;
        let controller = self.controller.clone();
        log_outcome(tokio::spawn(async move { controller.submit(&text).await }));
    }

    fn tick(&mut self) {
        self.ticks = self.ticks.wrapping_add(1);
        // Indicator dots advance every sixth redraw
        if self.ticks % 6 == 0 {
            self.animation_frame = (self.animation_frame + 1) % 3;
        }
    }

    fn page(&self) -> u16 {
        (self.chat_height / 2).max(1)
    }

    fn scroll_up(&mut self) {
        self.follow = false;
        self.scroll = self.scroll.saturating_sub(self.page());
    }

    fn scroll_down(&mut self) {
        // The renderer clamps and re-pins once the bottom is reached
        self.scroll = self.scroll.saturating_add(self.page());
    }
}

fn log_outcome(task: tokio::task::JoinHandle<SubmitOutcome>) {
    tokio::spawn(async move {
        match task.await {
            Ok(outcome) => debug!("Submit finished: {outcome:?}"),
            Err(e) => debug!("Submit task ended early: {e}"),
        }
    });
}

async fn next_recognition(
    rx: &mut Option<mpsc::UnboundedReceiver<RecognitionEvent>>,
) -> Option<RecognitionEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Draw and dispatch until the user quits.
pub async fn run(terminal: &mut Tui, app: &mut App, tick: Duration) -> Result<()> {
    let mut events = EventHandler::new(tick);
    let mut recognition = app.adapter.attach();

    while !app.should_quit {
        terminal.draw(|frame| super::ui::render(app, frame))?;

        tokio::select! {
            Some(event) = events.next() => app.handle_event(event),
            Some(event) = next_recognition(&mut recognition) => app.handle_recognition(event),
            else => break,
        }
    }

    app.adapter.detach();
    Ok(())
}
