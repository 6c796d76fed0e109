use std::collections::VecDeque;
use std::path::PathBuf;

use crossterm::event::{KeyCode, KeyEvent};
use time::macros::format_description;
use time::OffsetDateTime;

use crate::autosave::AutoSaveStatus;
use crate::host::dialogs::{DialogAnswer, DialogKind, DialogRequest};
use crate::host::performance::{PerformanceAlert, PerformanceSnapshot};
use crate::storage::{DeviceInfo, Note};

use super::editor::Editor;

const MAX_ALERTS: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusPane {
    List,
    Editor,
}

/// A host prompt shown on top of everything else until it is answered.
#[derive(Debug)]
pub struct DialogOverlay {
    request: DialogRequest,
    input: String,
    confirm_focused: bool,
}

impl DialogOverlay {
    pub fn new(request: DialogRequest) -> Self {
        let input = match &request.kind {
            DialogKind::SavePath(prompt) => prompt.default_path.display().to_string(),
            DialogKind::Confirm(_) | DialogKind::Message(_) => String::new(),
        };
        Self {
            request,
            input,
            confirm_focused: false,
        }
    }

    pub fn kind(&self) -> &DialogKind {
        &self.request.kind
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn confirm_focused(&self) -> bool {
        self.confirm_focused
    }

    /// Feeds one key to the prompt. Returns the overlay back while it stays open.
    pub fn handle_key(mut self, key: KeyEvent) -> Option<Self> {
        let answer = match (&self.request.kind, key.code) {
            (DialogKind::SavePath(_), KeyCode::Esc) => DialogAnswer::Path(None),
            (DialogKind::SavePath(_), KeyCode::Enter) => {
                let path = self.input.trim();
                DialogAnswer::Path((!path.is_empty()).then(|| PathBuf::from(path)))
            }
            (DialogKind::SavePath(_), KeyCode::Backspace) => {
                self.input.pop();
                return Some(self);
            }
            (DialogKind::SavePath(_), KeyCode::Char(ch)) => {
                self.input.push(ch);
                return Some(self);
            }
            (DialogKind::Confirm(_), KeyCode::Esc | KeyCode::Char('n')) => {
                DialogAnswer::Confirmed(false)
            }
            (DialogKind::Confirm(_), KeyCode::Char('y')) => DialogAnswer::Confirmed(true),
            (DialogKind::Confirm(_), KeyCode::Enter) => {
                DialogAnswer::Confirmed(self.confirm_focused)
            }
            (DialogKind::Confirm(_), KeyCode::Tab | KeyCode::Left | KeyCode::Right) => {
                self.confirm_focused = !self.confirm_focused;
                return Some(self);
            }
            (DialogKind::Message(_), KeyCode::Esc | KeyCode::Enter | KeyCode::Char(' ')) => {
                DialogAnswer::Dismissed
            }
            _ => return Some(self),
        };
        self.request.answer(answer);
        None
    }
}

#[derive(Debug, Default)]
pub struct Dashboard {
    pub visible: bool,
    pub snapshot: Option<PerformanceSnapshot>,
    alerts: VecDeque<PerformanceAlert>,
}

impl Dashboard {
    pub fn push_alert(&mut self, alert: PerformanceAlert) {
        if self.alerts.len() == MAX_ALERTS {
            self.alerts.pop_front();
        }
        self.alerts.push_back(alert);
    }

    /// Newest first.
    pub fn alerts(&self) -> impl Iterator<Item = &PerformanceAlert> {
        self.alerts.iter().rev()
    }
}

#[derive(Debug)]
pub struct AppState {
    pub focus: FocusPane,
    pub dashboard: Dashboard,
    pub device: Option<DeviceInfo>,
    editor: Option<Editor>,
    overlay: Option<DialogOverlay>,
    preview: Option<Note>,
    status_message: Option<String>,
    host_message: Option<String>,
    version: Option<String>,
    autosave_status: AutoSaveStatus,
}

impl AppState {
    pub fn new(autosave_status: AutoSaveStatus) -> Self {
        Self {
            focus: FocusPane::List,
            dashboard: Dashboard::default(),
            device: None,
            editor: None,
            overlay: None,
            preview: None,
            status_message: None,
            host_message: None,
            version: None,
            autosave_status,
        }
    }

    pub fn editor(&self) -> Option<&Editor> {
        self.editor.as_ref()
    }

    pub fn editor_mut(&mut self) -> Option<&mut Editor> {
        self.editor.as_mut()
    }

    pub fn is_editing(&self) -> bool {
        self.editor.is_some()
    }

    pub fn begin_editor(&mut self, editor: Editor) {
        self.editor = Some(editor);
        self.focus = FocusPane::Editor;
    }

    pub fn close_editor(&mut self) -> Option<Editor> {
        self.focus = FocusPane::List;
        self.editor.take()
    }

    pub fn overlay(&self) -> Option<&DialogOverlay> {
        self.overlay.as_ref()
    }

    pub fn open_overlay(&mut self, request: DialogRequest) {
        self.overlay = Some(DialogOverlay::new(request));
    }

    pub fn take_overlay(&mut self) -> Option<DialogOverlay> {
        self.overlay.take()
    }

    pub fn restore_overlay(&mut self, overlay: Option<DialogOverlay>) {
        self.overlay = overlay;
    }

    pub fn preview(&self) -> Option<&Note> {
        self.preview.as_ref()
    }

    pub fn set_preview(&mut self, note: Option<Note>) {
        self.preview = note;
    }

    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    pub fn set_status_message<S: Into<String>>(&mut self, message: Option<S>) {
        self.status_message = message.map(Into::into);
    }

    pub fn host_message(&self) -> Option<&str> {
        self.host_message.as_deref()
    }

    pub fn set_host_message(&mut self, message: String) {
        self.host_message = Some(message);
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn set_version(&mut self, version: String) {
        self.version = Some(version);
    }

    pub fn autosave_status(&self) -> &AutoSaveStatus {
        &self.autosave_status
    }

    pub fn set_autosave_status(&mut self, status: AutoSaveStatus) {
        self.autosave_status = status;
    }
}

/// Local wall-clock rendering of an epoch-millisecond edit time.
pub fn format_edit_time(millis: i64) -> String {
    let utc = OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let local = match time::UtcOffset::current_local_offset() {
        Ok(offset) => utc.to_offset(offset),
        Err(_) => utc,
    };
    local
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
        .unwrap_or_else(|_| millis.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use crossterm::event::KeyModifiers;

    use crate::host::dialogs::{ConfirmPrompt, HostDialogs, RelayDialogs, SavePrompt};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::NONE)
    }

    fn confirm_prompt() -> ConfirmPrompt {
        ConfirmPrompt {
            title: "Delete note".into(),
            message: "Are you sure?".into(),
            confirm_label: "Delete".into(),
            cancel_label: "Cancel".into(),
        }
    }

    #[test]
    fn confirm_defaults_to_cancel() {
        let (mut relay, requests) = RelayDialogs::new();
        let host = thread::spawn(move || relay.confirm(&confirm_prompt()));

        let overlay = DialogOverlay::new(requests.recv().expect("prompt"));
        assert!(overlay.handle_key(key(KeyCode::Enter)).is_none());
        assert!(!host.join().expect("host thread"));
    }

    #[test]
    fn confirm_after_moving_focus() {
        let (mut relay, requests) = RelayDialogs::new();
        let host = thread::spawn(move || relay.confirm(&confirm_prompt()));

        let overlay = DialogOverlay::new(requests.recv().expect("prompt"));
        let overlay = overlay.handle_key(key(KeyCode::Tab)).expect("still open");
        assert!(overlay.confirm_focused());
        assert!(overlay.handle_key(key(KeyCode::Enter)).is_none());
        assert!(host.join().expect("host thread"));
    }

    #[test]
    fn save_prompt_starts_from_default_path() {
        let (mut relay, requests) = RelayDialogs::new();
        let host = thread::spawn(move || {
            relay.save_path(&SavePrompt {
                title: "New note".into(),
                default_path: PathBuf::from("/notes/Untitled.md"),
                button_label: "Create".into(),
                extension: "md".into(),
            })
        });

        let mut overlay = DialogOverlay::new(requests.recv().expect("prompt"));
        assert_eq!(overlay.input(), "/notes/Untitled.md");
        for _ in 0.."Untitled.md".len() {
            overlay = overlay
                .handle_key(key(KeyCode::Backspace))
                .expect("still open");
        }
        for ch in "Ideas.md".chars() {
            overlay = overlay.handle_key(key(KeyCode::Char(ch))).expect("still open");
        }
        assert!(overlay.handle_key(key(KeyCode::Enter)).is_none());
        assert_eq!(
            host.join().expect("host thread"),
            Some(PathBuf::from("/notes/Ideas.md"))
        );
    }

    #[test]
    fn dashboard_keeps_recent_alerts_newest_first() {
        let mut dashboard = Dashboard::default();
        for n in 0..(MAX_ALERTS + 5) {
            dashboard.push_alert(PerformanceAlert {
                kind: crate::host::performance::AlertKind::Cpu,
                message: format!("alert {n}"),
            });
        }
        let messages: Vec<_> = dashboard.alerts().map(|a| a.message.as_str()).collect();
        assert_eq!(messages.len(), MAX_ALERTS);
        assert_eq!(messages[0], format!("alert {}", MAX_ALERTS + 4));
    }

    #[test]
    fn edit_times_render_as_dates() {
        let rendered = format_edit_time(1_700_000_000_000);
        assert!(rendered.starts_with("2023-11-1"), "{rendered}");
    }
}
