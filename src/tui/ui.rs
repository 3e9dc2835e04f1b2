//! Drawing: header, message list, typing indicator, error banner and input line.

use ratatui::{
    layout::{Constraint, Layout, Position, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

use super::app::App;
use crate::message::{ConversationState, Role};

const PLACEHOLDER: &str = "Type a message...";

pub fn render(app: &mut App, frame: &mut Frame) {
    let state = app.controller.snapshot();
    let area = frame.area();

    let banner_height = if state.error_message.is_some() { 3 } else { 0 };
    let [header_area, chat_area, banner_area, input_area, footer_area] = Layout::vertical([
        Constraint::Length(1),
        Constraint::Min(0),
        Constraint::Length(banner_height),
        Constraint::Length(3),
        Constraint::Length(1),
    ])
    .areas(area);

    render_header(app, &state, frame, header_area);
    render_chat(app, &state, frame, chat_area);
    if let Some(error) = &state.error_message {
        render_banner(error, frame, banner_area);
    }
    render_input(&state, frame, input_area);
    render_footer(frame, footer_area);
}

fn render_header(app: &App, state: &ConversationState, frame: &mut Frame, area: Rect) {
    let mic = if state.is_listening {
        Span::styled(" MIC ON ", Style::default().bg(Color::Green).fg(Color::Black).bold())
    } else if app.adapter.is_available() {
        Span::styled(" mic off ", Style::default().bg(Color::Red).fg(Color::White))
    } else {
        Span::styled(" no mic ", Style::default().fg(Color::DarkGray))
    };

    let title = Line::from(vec![
        Span::styled(" AI Chat Bot ", Style::default().fg(Color::Magenta).bold()),
        mic,
        Span::raw(" "),
        Span::styled(app.model.clone(), Style::default().fg(Color::Gray)),
    ]);
    frame.render_widget(Paragraph::new(title).style(Style::default().bg(Color::Black)), area);
}

fn render_chat(app: &mut App, state: &ConversationState, frame: &mut Frame, area: Rect) {
    let lines = chat_lines(state, app.animation_frame);

    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    app.chat_height = inner_height;

    let total = wrapped_height(&lines, inner_width);
    let max_scroll = total.saturating_sub(inner_height);
    if app.follow || app.scroll >= max_scroll {
        app.scroll = max_scroll;
        app.follow = true;
    }

    let text = if lines.is_empty() {
        Text::from(Span::styled(
            "Say something or type below...",
            Style::default().fg(Color::DarkGray),
        ))
    } else {
        Text::from(lines)
    };

    let chat = Paragraph::new(text)
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::DarkGray)))
        .wrap(Wrap { trim: false })
        .scroll((app.scroll, 0));
    frame.render_widget(chat, area);
}

fn chat_lines(state: &ConversationState, animation_frame: u8) -> Vec<Line<'static>> {
    let mut lines = Vec::new();

    for message in &state.messages {
        let label = match message.role {
            Role::User => Span::styled("You:", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
            Role::Assistant => Span::styled("AI:", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        };
        lines.push(Line::from(label));
        for line in message.content.lines() {
            lines.push(Line::from(line.to_string()));
        }
        lines.push(Line::default());
    }

    if state.loading {
        let dots = ".".repeat(usize::from(animation_frame) % 3 + 1);
        lines.push(Line::from(Span::styled(
            format!("Typing{dots}"),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::ITALIC),
        )));
    }

    lines
}

/// Rows the lines occupy once wrapped to `width` columns.
fn wrapped_height(lines: &[Line], width: u16) -> u16 {
    if width == 0 {
        return 0;
    }
    let width = usize::from(width);
    let rows: usize = lines
        .iter()
        .map(|line| line.width().max(1).div_ceil(width))
        .sum();
    u16::try_from(rows).unwrap_or(u16::MAX)
}

fn render_banner(error: &str, frame: &mut Frame, area: Rect) {
    let banner = Paragraph::new(error.to_string())
        .style(Style::default().fg(Color::Red))
        .block(Block::default().borders(Borders::ALL).border_style(Style::default().fg(Color::Red)));
    frame.render_widget(banner, area);
}

fn render_input(state: &ConversationState, frame: &mut Frame, area: Rect) {
    let border = if state.is_listening { Color::Green } else { Color::Cyan };
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(border))
        .title(if state.is_listening { " Listening... " } else { " Message " });

    let inner_width = usize::from(area.width.saturating_sub(2));
    let input = &state.input_text;
    let chars = input.chars().count();

    // Keep the end of long input visible
    let skip = (chars + 1).saturating_sub(inner_width);
    let visible: String = input.chars().skip(skip).collect();

    let paragraph = if input.is_empty() {
        Paragraph::new(Span::styled(PLACEHOLDER, Style::default().fg(Color::DarkGray)))
    } else {
        Paragraph::new(visible.clone())
    };
    frame.render_widget(paragraph.block(block), area);

    let cursor_x = area.x + 1 + u16::try_from(visible.chars().count()).unwrap_or(0);
    frame.set_cursor_position(Position::new(cursor_x, area.y + 1));
}

fn render_footer(frame: &mut Frame, area: Rect) {
    let key_style = Style::default().bg(Color::DarkGray).fg(Color::White);
    let label_style = Style::default().fg(Color::Gray);

    let hints = Line::from(vec![
        Span::styled(" Enter ", key_style),
        Span::styled(" send ", label_style),
        Span::styled(" ^R/F2 ", key_style),
        Span::styled(" mic ", label_style),
        Span::styled(" Esc ", key_style),
        Span::styled(" stop ", label_style),
        Span::styled(" ^N ", key_style),
        Span::styled(" new ", label_style),
        Span::styled(" PgUp/PgDn ", key_style),
        Span::styled(" scroll ", label_style),
        Span::styled(" ^C ", key_style),
        Span::styled(" quit ", label_style),
    ]);
    frame.render_widget(Paragraph::new(hints), area);
}
