//! UI rendering with ratatui.
//!
//! Two columns: the session sidebar on the left, the transcript with the
//! composer on the right, plus a header and a status bar.

use chrono::Utc;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style, Stylize};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{
    Block, Borders, Clear, List, ListItem, ListState, Paragraph, Scrollbar, ScrollbarOrientation,
    ScrollbarState, Wrap,
};
use ratatui::Frame;

use crate::app::{App, Focus, InputMode};
use crate::history::{group_sessions, relative_age};
use crate::markdown::render_markdown;

/// Horizontal padding for the transcript.
const CHAT_PADDING: u16 = 2;

/// Glyph trailing the reply while it streams.
const STREAM_CURSOR: &str = "▌";

/// Render the UI.
pub fn render(frame: &mut Frame, app: &App) {
    let area = frame.area();

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(area);

    render_header_bar(frame, app, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(rows[1]);

    render_sessions_panel(frame, app, columns[0]);
    render_chat_column(frame, app, columns[1]);
    render_status_bar(frame, app, rows[2]);

    if app.input_mode == InputMode::ConfirmingDelete {
        render_confirm_delete_dialog(frame, app, area);
    }
}

/// Shorten `s` to `max` characters, ending in an ellipsis.
fn truncate_end(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let kept: String = s.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn render_header_bar(frame: &mut Frame, app: &App, area: Rect) {
    let (status_text, status_style) = if app.refresh_error.is_some() {
        ("offline", Style::default().fg(Color::Red))
    } else {
        ("online", Style::default().fg(Color::Green))
    };

    let title = "PARLEY";
    let url = truncate_end(app.base_url(), (area.width as usize / 2).saturating_sub(12));
    let right_width = url.chars().count() + status_text.len() + 3;
    let gap = (area.width as usize).saturating_sub(title.len() + right_width);

    let line = Line::from(vec![
        Span::styled(title, Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
        Span::raw(" ".repeat(gap)),
        Span::raw(url),
        Span::raw(" ["),
        Span::styled(status_text, status_style),
        Span::raw("]"),
    ]);

    frame.render_widget(
        Paragraph::new(line).style(Style::default().bg(Color::DarkGray)),
        area,
    );
}

fn render_sessions_panel(frame: &mut Frame, app: &App, area: Rect) {
    let is_focused = app.focus == Focus::Sessions;

    let block = Block::default()
        .title(" Chats ")
        .borders(Borders::ALL)
        .border_style(if is_focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        });

    let now = Utc::now();
    let open = app.conversation().session_id();
    let title_width = (area.width as usize).saturating_sub(16);

    let mut items: Vec<ListItem> = Vec::new();
    let mut highlighted = None;

    for (group, indices) in group_sessions(&app.sessions, now) {
        items.push(ListItem::new(Line::from(Span::styled(
            group.label(),
            Style::default().fg(Color::DarkGray).add_modifier(Modifier::BOLD),
        ))));

        for index in indices {
            let session = &app.sessions[index];
            if app.selected == Some(index) {
                highlighted = Some(items.len());
            }

            let title_style = if open == Some(session.id) {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            };
            items.push(ListItem::new(Line::from(vec![
                Span::styled(truncate_end(session.display_title(), title_width), title_style),
                Span::styled(
                    format!(" {}", relative_age(session.created_at, now)),
                    Style::default().fg(Color::DarkGray),
                ),
            ])));
        }
    }

    let list = List::new(items)
        .block(block)
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    let mut state = ListState::default();
    state.select(highlighted);
    frame.render_stateful_widget(list, area, &mut state);
}

fn render_chat_column(frame: &mut Frame, app: &App, area: Rect) {
    let is_focused = app.focus == Focus::Chat;
    let conversation = app.conversation();

    let block = Block::default()
        .title(format!(" {} ", conversation.title()))
        .borders(Borders::ALL)
        .border_style(if is_focused {
            Style::default().fg(Color::Cyan)
        } else {
            Style::default().fg(Color::Gray)
        });

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    let chat_full = rows[0];
    let chat_area = Rect::new(
        chat_full.x + CHAT_PADDING,
        chat_full.y,
        chat_full.width.saturating_sub(CHAT_PADDING * 2 + 1),
        chat_full.height,
    );
    let width = chat_area.width as usize;

    if conversation.messages().is_empty() && !app.is_streaming() {
        let hint = if conversation.session().is_some() {
            "Type a message and press Enter to send"
        } else {
            "Press Ctrl-N to start a new chat"
        };
        frame.render_widget(
            Paragraph::new(hint)
                .style(Style::default().fg(Color::DarkGray))
                .wrap(Wrap { trim: true }),
            chat_area,
        );
    } else {
        let mut lines: Vec<Line> = Vec::new();

        for message in conversation.messages() {
            if message.is_user() {
                lines.push(Line::from(vec![
                    Span::styled("[You] ", Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD)),
                    Span::styled(message.content.as_str(), Style::default().fg(Color::White)),
                ]));
            } else {
                lines.push(assistant_label());
                lines.extend(render_markdown(&message.content, width));
            }
            lines.push(Line::default());
        }

        if app.is_streaming() {
            lines.push(assistant_label());
            let partial = conversation.streaming_text();
            if partial.is_empty() {
                lines.push(Line::from(vec![
                    Span::styled(app.spinner_char(), Style::default().fg(Color::Yellow)),
                    Span::styled(" thinking...", Style::default().fg(Color::DarkGray)),
                ]));
            } else {
                lines.extend(render_markdown(&format!("{partial}{STREAM_CURSOR}"), width));
            }
        }

        let text = Text::from(lines);
        let visible = chat_area.height as usize;
        let total = wrapped_line_count(&text, width);
        let max_scroll = total.saturating_sub(visible);
        let scroll = app.chat_scroll.min(max_scroll);
        let offset = u16::try_from(max_scroll - scroll).unwrap_or(u16::MAX);

        frame.render_widget(
            Paragraph::new(text).wrap(Wrap { trim: false }).scroll((offset, 0)),
            chat_area,
        );

        if total > visible {
            let mut state = ScrollbarState::new(total)
                .position(max_scroll - scroll)
                .viewport_content_length(visible);
            frame.render_stateful_widget(
                Scrollbar::new(ScrollbarOrientation::VerticalRight)
                    .begin_symbol(Some("▲"))
                    .end_symbol(Some("▼")),
                chat_full,
                &mut state,
            );
        }
    }

    render_composer(frame, app, rows[1], rows[2], is_focused);
}

fn assistant_label() -> Line<'static> {
    Line::from(Span::styled(
        "[Assistant]",
        Style::default().fg(Color::Green).add_modifier(Modifier::BOLD),
    ))
}

fn render_composer(frame: &mut Frame, app: &App, separator: Rect, area: Rect, is_focused: bool) {
    frame.render_widget(
        Paragraph::new("─".repeat(separator.width as usize)).style(Style::default().fg(Color::DarkGray)),
        separator,
    );

    let prompt = if is_focused { "> " } else { "│ " };
    let line = if app.is_streaming() {
        Line::from(vec![
            Span::styled(prompt, Style::default().fg(Color::DarkGray)),
            Span::styled("Generating... (Esc to stop)", Style::default().fg(Color::DarkGray).italic()),
        ])
    } else {
        Line::from(vec![
            Span::styled(
                prompt,
                Style::default().fg(if is_focused { Color::Cyan } else { Color::DarkGray }),
            ),
            Span::styled(app.input.as_str(), Style::default().fg(Color::White)),
        ])
    };
    frame.render_widget(Paragraph::new(line), area);

    if is_focused && app.input_mode == InputMode::Normal && !app.is_streaming() {
        let column = u16::try_from(prompt.chars().count() + app.cursor_position).unwrap_or(u16::MAX);
        frame.set_cursor_position((area.x.saturating_add(column), area.y));
    }
}

fn render_status_bar(frame: &mut Frame, app: &App, area: Rect) {
    let mode = if app.is_streaming() {
        Span::styled(" STREAMING ", Style::default().fg(Color::Black).bg(Color::Yellow))
    } else if app.focus == Focus::Chat {
        Span::styled(" CHAT ", Style::default().fg(Color::Black).bg(Color::Green))
    } else {
        Span::styled(" CHATS ", Style::default().fg(Color::Black).bg(Color::Magenta))
    };

    let key = |k: &'static str| Span::styled(k, Style::default().fg(Color::Yellow));

    let status = if let Some(error) = app.error() {
        Line::from(vec![
            mode,
            Span::styled(" ERROR: ", Style::default().fg(Color::Red).bold()),
            Span::styled(error, Style::default().fg(Color::Red)),
        ])
    } else if let Some(ref refresh_error) = app.refresh_error {
        Line::from(vec![
            mode,
            Span::styled(" ⚠ ", Style::default().fg(Color::Yellow).bold()),
            Span::styled(refresh_error.as_str(), Style::default().fg(Color::Yellow)),
        ])
    } else if let Some(ref status) = app.status_message {
        Line::from(vec![
            mode,
            Span::styled(format!(" {status}"), Style::default().fg(Color::Green)),
        ])
    } else if app.focus == Focus::Sessions {
        Line::from(vec![
            mode,
            Span::raw(" "),
            key("Enter"),
            Span::raw(":open "),
            key("^N"),
            Span::raw(":new "),
            key("^D"),
            Span::raw(":delete "),
            key("^R"),
            Span::raw(":refresh "),
            key("Tab"),
            Span::raw(":switch"),
        ])
    } else {
        Line::from(vec![
            mode,
            Span::raw(" "),
            key("Enter"),
            Span::raw(":send "),
            key("^S"),
            Span::raw(":summarize "),
            key("^O"),
            Span::raw(":notion "),
            key("^N"),
            Span::raw(":new "),
            key("Tab"),
            Span::raw(":switch "),
            key("^C"),
            Span::raw(":quit"),
        ])
    };

    frame.render_widget(
        Paragraph::new(status).style(Style::default().bg(Color::DarkGray)),
        area,
    );
}

fn render_confirm_delete_dialog(frame: &mut Frame, app: &App, area: Rect) {
    let dialog = centered_rect(50, 20, area);
    frame.render_widget(Clear, dialog);

    let block = Block::default()
        .title(" Confirm Delete ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Red));
    let inner = block.inner(dialog);
    frame.render_widget(block, dialog);

    let title = app
        .selected_session()
        .map_or("?", |s| s.display_title());

    let text = Text::from(vec![
        Line::from(format!("Delete \"{title}\"?")),
        Line::default(),
        Line::from("Its history will be removed from the server."),
        Line::default(),
        Line::from(vec![
            Span::styled("[y]", Style::default().fg(Color::Red).bold()),
            Span::raw(" Yes  "),
            Span::styled("[n]", Style::default().fg(Color::Green).bold()),
            Span::raw(" No"),
        ]),
    ]);

    frame.render_widget(
        Paragraph::new(text)
            .style(Style::default().fg(Color::White))
            .wrap(Wrap { trim: true }),
        inner,
    );
}

/// Number of rows `text` occupies once wrapped to `width` columns.
fn wrapped_line_count(text: &Text, width: usize) -> usize {
    if width == 0 {
        return text.lines.len();
    }
    text.lines
        .iter()
        .map(|line| line.width().div_ceil(width).max(1))
        .sum()
}

/// Create a centered rectangle.
fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(vertical[1])[1]
}
