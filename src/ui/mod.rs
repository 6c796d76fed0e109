use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use time::macros::format_description;

use crate::app::{format_edit_time, AppState, DialogOverlay, Editor, FocusPane};
use crate::autosave::AutoSaveStatus;
use crate::host::dialogs::{DialogKind, MessageLevel};
use crate::host::performance::AlertKind;
use crate::state::{NoteState, Selection};

/// Lines above the body in the detail pane: title, meta, blank.
const DETAIL_HEADER_LINES: u16 = 3;

pub fn draw_app(frame: &mut Frame, state: &AppState, notes: &NoteState, list_state: &mut ListState) {
    let vertical = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(3)])
        .split(frame.size());

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(vertical[0]);

    draw_list(frame, state, notes, list_state, columns[0]);

    let asides = state.preview().is_some() as u16 + state.dashboard.visible as u16;
    if asides == 0 {
        draw_detail(frame, state, notes, columns[1]);
    } else {
        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(columns[1]);
        draw_detail(frame, state, notes, rows[0]);
        match (state.preview().is_some(), state.dashboard.visible) {
            (true, true) => {
                let halves = Layout::default()
                    .direction(Direction::Horizontal)
                    .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
                    .split(rows[1]);
                draw_preview(frame, state, halves[0]);
                draw_dashboard(frame, state, halves[1]);
            }
            (true, false) => draw_preview(frame, state, rows[1]),
            _ => draw_dashboard(frame, state, rows[1]),
        }
    }

    let status = Paragraph::new(build_status_line(state, notes)).style(Style::default().fg(Color::Gray));
    frame.render_widget(status, vertical[1]);

    if let Some(overlay) = state.overlay() {
        render_overlay(frame, overlay);
    }
}

fn focus_style(active: bool) -> Style {
    if active {
        Style::default().fg(Color::Cyan)
    } else {
        Style::default()
    }
}

fn draw_list(
    frame: &mut Frame,
    state: &AppState,
    notes: &NoteState,
    list_state: &mut ListState,
    area: Rect,
) {
    let editing = state.editor().map(Editor::title);
    let mut items: Vec<ListItem> = notes
        .notes()
        .iter()
        .map(|note| {
            let mut title = Vec::new();
            if editing == Some(note.title.as_str()) {
                title.push(Span::styled(
                    "✎ ",
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                ));
            }
            title.push(Span::styled(
                note.title.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ));
            ListItem::new(vec![
                Line::from(title),
                Line::from(Span::styled(
                    format!("Updated {}", format_edit_time(note.last_edit_time)),
                    Style::default().fg(Color::Gray),
                )),
            ])
        })
        .collect();
    if items.is_empty() {
        items.push(ListItem::new("No notes yet. Press `a` to create one."));
    }

    let list = List::new(items)
        .block(
            Block::default()
                .title("Notes")
                .borders(Borders::ALL)
                .border_style(focus_style(state.focus == FocusPane::List)),
        )
        .highlight_style(
            Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD),
        )
        .highlight_symbol("▸ ");
    frame.render_stateful_widget(list, area, list_state);
}

fn draw_detail(frame: &mut Frame, state: &AppState, notes: &NoteState, area: Rect) {
    let block = Block::default()
        .title(if state.is_editing() { "Editor" } else { "Note" })
        .borders(Borders::ALL)
        .border_style(focus_style(state.focus == FocusPane::Editor));

    let (text, wrap) = match (state.editor(), notes.selection()) {
        (Some(editor), _) => {
            let marker = if editor.is_dirty() { " (unsaved)" } else { "" };
            let mut lines = vec![
                Line::from(Span::styled(
                    format!("[EDIT] {}", editor.title()),
                    Style::default()
                        .fg(Color::Magenta)
                        .add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    format!("{}{marker}", autosave_label(state.autosave_status())),
                    Style::default().fg(Color::Gray),
                )),
                Line::from(""),
            ];
            lines.extend(editor.text().split('\n').map(|line| Line::from(line.to_string())));
            (Text::from(lines), false)
        }
        (None, Selection::Ready { note, .. }) => {
            let mut lines = vec![
                Line::from(Span::styled(
                    note.title().to_string(),
                    Style::default().add_modifier(Modifier::BOLD),
                )),
                Line::from(Span::styled(
                    format!("Updated {}", format_edit_time(note.info.last_edit_time)),
                    Style::default().fg(Color::Gray),
                )),
                Line::from(""),
            ];
            lines.extend(markdown_lines(&note.content));
            (Text::from(lines), true)
        }
        (None, Selection::Loading { title, .. }) => {
            (Text::from(format!("Loading {title}…")), true)
        }
        (None, Selection::Unselected) => (Text::from("Select a note to see its contents."), true),
    };

    let mut detail = Paragraph::new(text).block(block);
    if wrap {
        detail = detail.wrap(Wrap { trim: false });
    }
    frame.render_widget(Clear, area);
    frame.render_widget(detail, area);

    if let Some(editor) = state.editor() {
        if let Some((x, y)) = editor_cursor(editor, area) {
            frame.set_cursor(x, y);
        }
    }
}

fn editor_cursor(editor: &Editor, area: Rect) -> Option<(u16, u16)> {
    let inner_width = area.width.saturating_sub(2);
    let inner_height = area.height.saturating_sub(2);
    if inner_width == 0 || inner_height == 0 {
        return None;
    }
    let (row, col) = editor.cursor_position();
    let row = (DETAIL_HEADER_LINES as usize + row).min(inner_height as usize - 1) as u16;
    let col = col.min(inner_width as usize - 1) as u16;
    Some((area.x + 1 + col, area.y + 1 + row))
}

fn draw_preview(frame: &mut Frame, state: &AppState, area: Rect) {
    let Some(note) = state.preview() else {
        return;
    };
    let mut lines = vec![
        Line::from(Span::styled(
            note.title().to_string(),
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )),
        Line::from(Span::styled(
            format!("Updated {}", format_edit_time(note.info.last_edit_time)),
            Style::default().fg(Color::Gray),
        )),
        Line::from(""),
    ];
    lines.extend(markdown_lines(&note.content));
    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title("Preview • x export • Esc close")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Yellow)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

fn draw_dashboard(frame: &mut Frame, state: &AppState, area: Rect) {
    let mut lines = Vec::new();
    match &state.dashboard.snapshot {
        Some(snapshot) => {
            for (label, value) in snapshot.describe() {
                lines.push(Line::from(vec![
                    Span::styled(format!("{label}: "), Style::default().fg(Color::Gray)),
                    Span::styled(value, Style::default().add_modifier(Modifier::BOLD)),
                ]));
            }
        }
        None => lines.push(Line::from("Waiting for the first reading…")),
    }
    let mut alerts = state.dashboard.alerts().peekable();
    if alerts.peek().is_some() {
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "Alerts",
            Style::default().add_modifier(Modifier::BOLD),
        )));
    }
    for alert in alerts {
        let color = match alert.kind {
            AlertKind::Memory => Color::Red,
            AlertKind::Cpu => Color::Yellow,
        };
        lines.push(Line::from(Span::styled(
            alert.message.clone(),
            Style::default().fg(color),
        )));
    }

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title("Performance")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Green)),
        )
        .wrap(Wrap { trim: true });
    frame.render_widget(Clear, area);
    frame.render_widget(paragraph, area);
}

/// Headings and list bullets get a little emphasis; everything else is shown as typed.
fn markdown_lines(content: &str) -> Vec<Line<'static>> {
    if content.is_empty() {
        return vec![Line::from("")];
    }
    content
        .lines()
        .map(|line| {
            let trimmed = line.trim_start();
            let style = if trimmed.starts_with('#') {
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD)
            } else if trimmed.starts_with("- ") || trimmed.starts_with("* ") {
                Style::default().fg(Color::White)
            } else if trimmed.starts_with('>') {
                Style::default()
                    .fg(Color::Gray)
                    .add_modifier(Modifier::ITALIC)
            } else {
                Style::default()
            };
            Line::from(Span::styled(line.to_string(), style))
        })
        .collect()
}

fn autosave_label(status: &AutoSaveStatus) -> String {
    match status {
        AutoSaveStatus::Disabled => "Autosave off".to_string(),
        AutoSaveStatus::Idle {
            last_saved_at: Some(at),
        } => {
            let at = at
                .format(format_description!("[hour]:[minute]:[second]"))
                .unwrap_or_else(|_| at.unix_timestamp().to_string());
            format!("Saved {at} UTC")
        }
        AutoSaveStatus::Idle { last_saved_at: None } => "Autosave on".to_string(),
        AutoSaveStatus::Pending { .. } => "Autosave pending".to_string(),
    }
}

fn build_status_line(state: &AppState, notes: &NoteState) -> Text<'static> {
    let total = notes.notes().len();
    let position = match notes.selected_index() {
        Some(index) => format!("{}/{}", index + 1, total),
        None => format!("-/{total}"),
    };

    let mut spans = vec![
        Span::raw(format!("Notes: {total}")),
        Span::raw(" | Selected: "),
        Span::styled(position, Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(" | "),
        Span::raw(autosave_label(state.autosave_status())),
    ];
    if let Some(version) = state.version() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            version.to_string(),
            Style::default().fg(Color::Green),
        ));
    }
    if let Some(device) = &state.device {
        spans.push(Span::raw(format!(" | {}", device.platform)));
    }
    if notes.is_busy() {
        spans.push(Span::styled(
            " | waiting for host…",
            Style::default().fg(Color::Yellow),
        ));
    }
    if let Some(message) = state.status_message() {
        spans.push(Span::raw(" | "));
        spans.push(Span::styled(
            message.to_string(),
            Style::default().fg(Color::Cyan),
        ));
    }

    let keys = if state.is_editing() {
        "Keys: type to edit • Ctrl-s save • Ctrl-z undo • Ctrl-y redo • Esc leave"
    } else {
        "Keys: j/k move • e edit • a add • d delete • p preview • x export • D dashboard • o/O open link • q quit"
    };
    let mut lines = vec![
        Line::from(spans),
        Line::from(Span::styled(keys, Style::default().fg(Color::DarkGray))),
    ];
    if let Some(message) = state.host_message() {
        lines.push(Line::from(Span::styled(
            format!("Host started {message}"),
            Style::default().fg(Color::DarkGray),
        )));
    }
    Text::from(lines)
}

fn render_overlay(frame: &mut Frame, overlay: &DialogOverlay) {
    let area = centered_rect(60, 30, frame.size());
    frame.render_widget(Clear, area);
    let hint = Style::default().fg(Color::Gray);

    let (title, border, lines) = match overlay.kind() {
        DialogKind::SavePath(prompt) => {
            let mut input = overlay.input().to_string();
            input.push('▌');
            (
                prompt.title.clone(),
                Color::Cyan,
                vec![
                    Line::from(Span::styled(
                        format!("Save as (.{})", prompt.extension),
                        Style::default().add_modifier(Modifier::BOLD),
                    )),
                    Line::from(""),
                    Line::from(input),
                    Line::from(""),
                    Line::from(Span::styled(
                        format!("Enter {} • Esc cancel", prompt.button_label),
                        hint,
                    )),
                ],
            )
        }
        DialogKind::Confirm(prompt) => {
            let selected = Style::default()
                .bg(Color::Blue)
                .fg(Color::Black)
                .add_modifier(Modifier::BOLD);
            let (confirm, cancel) = if overlay.confirm_focused() {
                (selected, Style::default())
            } else {
                (Style::default(), selected)
            };
            (
                prompt.title.clone(),
                Color::Red,
                vec![
                    Line::from(prompt.message.clone()),
                    Line::from(""),
                    Line::from(vec![
                        Span::styled(format!(" {} ", prompt.cancel_label), cancel),
                        Span::raw("   "),
                        Span::styled(format!(" {} ", prompt.confirm_label), confirm),
                    ]),
                    Line::from(""),
                    Line::from(Span::styled("Tab switch • Enter choose • y/n • Esc cancel", hint)),
                ],
            )
        }
        DialogKind::Message(message) => {
            let color = match message.level {
                MessageLevel::Info => Color::Cyan,
                MessageLevel::Warning => Color::Yellow,
                MessageLevel::Error => Color::Red,
            };
            (
                message.title.clone(),
                color,
                vec![
                    Line::from(message.message.clone()),
                    Line::from(""),
                    Line::from(Span::styled("Enter to dismiss", hint)),
                ],
            )
        }
    };

    let paragraph = Paragraph::new(lines)
        .block(
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(Style::default().fg(border)),
        )
        .wrap(Wrap { trim: false });
    frame.render_widget(paragraph, area);
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use ratatui::backend::TestBackend;
    use ratatui::Terminal;

    use crate::host::performance::PerformanceAlert;
    use crate::storage::{Note, NoteInfo};

    fn screen_text(terminal: &Terminal<TestBackend>) -> String {
        terminal
            .backend()
            .buffer()
            .content
            .iter()
            .map(|cell| cell.symbol())
            .collect()
    }

    #[test]
    fn headings_are_emphasised() {
        let lines = markdown_lines("# Title\nplain");
        assert!(lines[0].spans[0].style.add_modifier.contains(Modifier::BOLD));
        assert_eq!(lines[1].spans[0].style, Style::default());
    }

    #[test]
    fn empty_store_renders_hint_and_status() -> anyhow::Result<()> {
        let mut terminal = Terminal::new(TestBackend::new(120, 30))?;
        let state = AppState::new(AutoSaveStatus::Disabled);
        let notes = NoteState::new();
        let mut list_state = ListState::default();
        terminal.draw(|frame| draw_app(frame, &state, &notes, &mut list_state))?;

        let screen = screen_text(&terminal);
        assert!(screen.contains("No notes yet"));
        assert!(screen.contains("Autosave off"));
        Ok(())
    }

    #[test]
    fn asides_show_preview_and_alerts() -> anyhow::Result<()> {
        let mut terminal = Terminal::new(TestBackend::new(140, 40))?;
        let mut state = AppState::new(AutoSaveStatus::Idle {
            last_saved_at: None,
        });
        state.set_preview(Some(Note {
            info: NoteInfo {
                title: "Roadmap".into(),
                last_edit_time: 0,
            },
            content: "# Q3".into(),
        }));
        state.dashboard.visible = true;
        state.dashboard.push_alert(PerformanceAlert {
            kind: AlertKind::Cpu,
            message: "High CPU usage: 99.00%".into(),
        });
        let notes = NoteState::new();
        let mut list_state = ListState::default();
        terminal.draw(|frame| draw_app(frame, &state, &notes, &mut list_state))?;

        let screen = screen_text(&terminal);
        assert!(screen.contains("Roadmap"));
        assert!(screen.contains("High CPU usage"));
        Ok(())
    }
}
