use std::fs;
use std::io::Stdout;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Receiver;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers,
};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::ListState;
use ratatui::Terminal;

use crate::autosave::AutoSaveThrottle;
use crate::config::AppConfig;
use crate::host::dialogs::{DialogRequest, RelayDialogs};
use crate::host::{HostBuilder, HostHandle, Spawned};
use crate::ipc::{BridgeClient, Command, PendingReply, PushEvent, WindowEvents};
use crate::state::{NoteState, Selection, StateEvent};
use crate::storage::{DeviceInfo, Note};
use crate::ui;

mod editor;
pub mod state;

pub use editor::Editor;
pub use state::{format_edit_time, AppState, DialogOverlay, FocusPane};

const MAIN_WINDOW_CHANNELS: [&str; 4] = [
    "main-process-message",
    "onUpdateMessage",
    "performance-data",
    "performance-alert",
];
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum Action {
    Quit,
    SelectNext,
    SelectPrevious,
    Reload,
    NewNote,
    DeleteNote,
    EnterEdit,
    OpenPreview,
    ExportPreview,
    ToggleDashboard,
    OpenLink,
    OpenLinkWindow,
    CloseAside,
}

pub struct App {
    config: Arc<AppConfig>,
    client: BridgeClient,
    secondary: WindowEvents,
    dialogs: Receiver<DialogRequest>,
    host: Option<HostHandle>,
    notes: NoteState,
    state: AppState,
    list_state: ListState,
    auto_save: AutoSaveThrottle,
    device: Option<PendingReply<DeviceInfo>>,
    dev_tools: Option<PendingReply<()>>,
    should_quit: bool,
    tick_rate: Duration,
}

impl App {
    pub fn new(config: Arc<AppConfig>) -> Result<Self> {
        let (relay, dialogs) = RelayDialogs::new();
        let Spawned {
            mut client,
            mut secondary,
            host,
        } = HostBuilder::from_config(&config, Box::new(relay))?
            .spawn()
            .context("starting host process")?;

        for channel in MAIN_WINDOW_CHANNELS {
            client.on(channel)?;
        }
        secondary.on("secondary-process-message")?;

        let mut notes = NoteState::new();
        notes.load(&client).context("requesting note list")?;
        let device = client.device_info().context("requesting device info")?;

        let auto_save = AutoSaveThrottle::new(&config.auto_save);
        let state = AppState::new(auto_save.status());
        Ok(Self {
            config,
            client,
            secondary,
            dialogs,
            host: Some(host),
            notes,
            state,
            list_state: ListState::default(),
            auto_save,
            device: Some(device),
            dev_tools: None,
            should_quit: false,
            tick_rate: Duration::from_millis(100),
        })
    }

    pub fn run(&mut self) -> Result<()> {
        let mut terminal = setup_terminal()?;
        let result = self.event_loop(&mut terminal);
        restore_terminal(&mut terminal)?;
        self.shutdown();
        result
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut last_tick = Instant::now();
        loop {
            self.pump();
            terminal
                .draw(|frame| {
                    self.list_state.select(self.notes.selected_index());
                    ui::draw_app(frame, &self.state, &self.notes, &mut self.list_state);
                })
                .context("rendering frame")?;

            if self.should_quit {
                break;
            }

            let timeout = self
                .tick_rate
                .checked_sub(last_tick.elapsed())
                .unwrap_or(Duration::ZERO);

            if event::poll(timeout).context("polling for terminal events")? {
                if let Event::Key(key) = event::read().context("reading terminal event")? {
                    self.handle_key(key);
                }
            }

            if last_tick.elapsed() >= self.tick_rate {
                self.on_tick();
                last_tick = Instant::now();
            }
        }
        Ok(())
    }

    /// Applies everything the host has sent since the last frame.
    fn pump(&mut self) {
        for event in self.notes.poll(&self.client) {
            self.handle_state_event(event);
        }

        if self.state.overlay().is_none() {
            if let Ok(request) = self.dialogs.try_recv() {
                self.state.open_overlay(request);
            }
        }

        for event in self.client.drain_events() {
            self.handle_push(event);
        }
        for event in self.secondary.drain() {
            if let PushEvent::SecondaryWindowData(note) = event {
                self.state.set_preview(Some(note));
            }
        }

        if let Some(result) = self.device.as_ref().and_then(PendingReply::try_take) {
            self.device = None;
            match result {
                Ok(device) => self.state.device = Some(device),
                Err(err) => tracing::warn!(%err, "device info unavailable"),
            }
        }
        if let Some(result) = self.dev_tools.as_ref().and_then(PendingReply::try_take) {
            self.dev_tools = None;
            match result {
                Ok(()) => self.state.dashboard.visible = true,
                Err(err) => {
                    tracing::error!(%err, "failed to open dev tools");
                    self.state
                        .set_status_message(Some("Failed to open dashboard"));
                }
            }
        }
    }

    fn on_tick(&mut self) {
        if let Some(edit) = self.auto_save.poll() {
            tracing::debug!(title = %edit.title, "autosave firing");
            self.save(&edit.title, &edit.content);
            if let Some(editor) = self
                .state
                .editor_mut()
                .filter(|editor| editor.title() == edit.title)
            {
                editor.mark_saved_content(&edit.content);
            }
        }
        self.state.set_autosave_status(self.auto_save.status());
    }

    fn handle_state_event(&mut self, event: StateEvent) {
        match event {
            StateEvent::Loaded { count } => {
                if self.notes.selected_index().is_none() && count > 0 {
                    self.select(Some(0));
                }
            }
            StateEvent::Opened { .. } => {}
            StateEvent::Saved { title } => {
                self.auto_save.mark_saved();
                tracing::debug!(%title, "save acknowledged");
            }
            StateEvent::Created { title } => {
                self.state
                    .set_status_message(Some(format!("Created \"{title}\"")));
            }
            StateEvent::CreateCancelled => {
                self.state.set_status_message(Some("No note created"));
            }
            StateEvent::Deleted { title } => {
                self.state
                    .set_status_message(Some(format!("Deleted \"{title}\"")));
            }
            StateEvent::DeleteCancelled { .. } => {
                self.state.set_status_message(Some("Delete canceled"));
            }
            StateEvent::Failed { op, message } => {
                self.state
                    .set_status_message(Some(format!("{op} failed: {message}")));
            }
        }
    }

    fn handle_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::MainProcessMessage(timestamp) => {
                tracing::info!(%timestamp, "host ready");
                self.state.set_host_message(timestamp);
            }
            PushEvent::UpdateMessage(version) => self.state.set_version(version),
            PushEvent::PerformanceData(snapshot) => {
                self.state.dashboard.snapshot = Some(snapshot);
            }
            PushEvent::PerformanceAlert(alert) => {
                self.state.set_status_message(Some(alert.message.clone()));
                self.state.dashboard.push_alert(alert);
            }
            PushEvent::SecondaryWindowData(_) => {
                tracing::debug!("secondary data delivered to main window, ignoring");
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) {
        if key.kind != KeyEventKind::Press {
            return;
        }

        if let Some(overlay) = self.state.take_overlay() {
            let still_open = overlay.handle_key(key);
            self.state.restore_overlay(still_open);
            return;
        }

        if self.state.is_editing() {
            self.handle_editor_key(key);
            return;
        }

        let plain = !key
            .modifiers
            .intersects(KeyModifiers::CONTROL | KeyModifiers::ALT | KeyModifiers::SUPER);
        let action = match key.code {
            KeyCode::Char('q') => Some(Action::Quit),
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Quit)
            }
            KeyCode::Char('j') | KeyCode::Down => Some(Action::SelectNext),
            KeyCode::Char('k') | KeyCode::Up => Some(Action::SelectPrevious),
            KeyCode::Char('r') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(Action::Reload)
            }
            KeyCode::Char('a') if plain => Some(Action::NewNote),
            KeyCode::Char('d') if plain => Some(Action::DeleteNote),
            KeyCode::Char('e') | KeyCode::Enter if plain => Some(Action::EnterEdit),
            KeyCode::Char('p') if plain => Some(Action::OpenPreview),
            KeyCode::Char('x') if plain => Some(Action::ExportPreview),
            KeyCode::Char('D') => Some(Action::ToggleDashboard),
            KeyCode::Char('o') if plain => Some(Action::OpenLink),
            KeyCode::Char('O') => Some(Action::OpenLinkWindow),
            KeyCode::Esc => Some(Action::CloseAside),
            _ => None,
        };

        if let Some(action) = action {
            self.handle_action(action);
        }
    }

    fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.should_quit = true,
            Action::SelectNext => self.move_selection(1),
            Action::SelectPrevious => self.move_selection(-1),
            Action::Reload => {
                if let Err(err) = self.notes.load(&self.client) {
                    tracing::error!(%err, "failed to reload notes");
                    self.state.set_status_message(Some("Failed to reload notes"));
                }
            }
            Action::NewNote => {
                if let Err(err) = self.notes.create(&self.client) {
                    self.state.set_status_message(Some(err.to_string()));
                }
            }
            Action::DeleteNote => {
                if let Err(err) = self.notes.delete_selected(&self.client) {
                    self.state.set_status_message(Some(err.to_string()));
                }
            }
            Action::EnterEdit => self.enter_edit(),
            Action::OpenPreview => self.open_preview(),
            Action::ExportPreview => self.export_preview(),
            Action::ToggleDashboard => {
                if self.state.dashboard.visible {
                    self.state.dashboard.visible = false;
                } else if self.dev_tools.is_none() {
                    match self.client.open_dev_tool() {
                        Ok(reply) => self.dev_tools = Some(reply),
                        Err(err) => self.state.set_status_message(Some(err.to_string())),
                    }
                }
            }
            Action::OpenLink => self.open_link(false),
            Action::OpenLinkWindow => self.open_link(true),
            Action::CloseAside => {
                self.state.dashboard.visible = false;
                self.state.set_preview(None);
            }
        }
    }

    fn handle_editor_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) {
            match key.code {
                KeyCode::Char('s') => self.flush_editor(),
                KeyCode::Char('z') => self.edit_with(Editor::undo),
                KeyCode::Char('y') => self.edit_with(Editor::redo),
                _ => {}
            }
            return;
        }

        match key.code {
            KeyCode::Esc => {
                self.flush_editor();
                self.state.close_editor();
                self.state.set_status_message(Some("Left edit mode"));
            }
            KeyCode::Enter => self.edit_with(Editor::insert_newline),
            KeyCode::Backspace => self.edit_with(Editor::backspace),
            KeyCode::Delete => self.edit_with(Editor::delete),
            KeyCode::Tab => self.edit_with(|editor| editor.insert_char('\t')),
            KeyCode::Char(ch) if !key.modifiers.intersects(KeyModifiers::ALT | KeyModifiers::SUPER) => {
                self.edit_with(|editor| editor.insert_char(ch));
            }
            KeyCode::Left => self.move_cursor(Editor::move_left),
            KeyCode::Right => self.move_cursor(Editor::move_right),
            KeyCode::Up => self.move_cursor(Editor::move_up),
            KeyCode::Down => self.move_cursor(Editor::move_down),
            KeyCode::Home => self.move_cursor(Editor::move_home),
            KeyCode::End => self.move_cursor(Editor::move_end),
            _ => {}
        }
    }

    fn edit_with<F>(&mut self, f: F)
    where
        F: FnOnce(&mut Editor) -> bool,
    {
        let Some(editor) = self.state.editor_mut() else {
            return;
        };
        if f(editor) {
            self.auto_save.record(editor.title(), editor.text());
            self.state.set_autosave_status(self.auto_save.status());
        }
    }

    fn move_cursor(&mut self, f: fn(&mut Editor) -> bool) {
        if let Some(editor) = self.state.editor_mut() {
            f(editor);
        }
    }

    /// Immediate save on blur. The throttle is cancelled first so its trailing write
    /// cannot land after this one.
    fn flush_editor(&mut self) {
        self.auto_save.cancel();
        self.state.set_autosave_status(self.auto_save.status());
        let Some(editor) = self.state.editor_mut() else {
            return;
        };
        if !editor.is_dirty() {
            return;
        }
        editor.mark_saved();
        let (title, content) = (editor.title().to_string(), editor.text().to_string());
        self.save(&title, &content);
    }

    fn save(&mut self, title: &str, content: &str) {
        if let Err(err) = self.notes.save_as(&self.client, title, content) {
            tracing::error!(%err, %title, "failed to queue save");
            self.state.set_status_message(Some(format!("Save failed: {err}")));
        }
    }

    fn enter_edit(&mut self) {
        match self.notes.selection() {
            Selection::Ready { note, .. } => {
                let editor = Editor::open(note.title(), note.content.clone());
                self.state.begin_editor(editor);
                self.state.set_status_message(Some(
                    "Editing: changes autosave • Ctrl-s save • Esc leave",
                ));
            }
            Selection::Loading { .. } => {
                self.state.set_status_message(Some("Note is still loading"));
            }
            Selection::Unselected => self.state.set_status_message(Some("No note selected")),
        }
    }

    fn move_selection(&mut self, delta: isize) {
        let len = self.notes.notes().len();
        if len == 0 {
            return;
        }
        let next = match self.notes.selected_index() {
            Some(current) => current.saturating_add_signed(delta).min(len - 1),
            None => 0,
        };
        self.select(Some(next));
    }

    fn select(&mut self, index: Option<usize>) {
        if let Err(err) = self.notes.select(&self.client, index) {
            tracing::error!(%err, "failed to select note");
            self.state.set_status_message(Some(err.to_string()));
        }
    }

    fn open_preview(&mut self) {
        let Selection::Ready { note, .. } = self.notes.selection() else {
            self.state.set_status_message(Some("No note selected"));
            return;
        };
        let command = Command::OpenSecondaryWindow { note: note.clone() };
        if let Err(err) = self.client.send(command) {
            self.state.set_status_message(Some(err.to_string()));
        }
    }

    fn export_preview(&mut self) {
        let Some(note) = self.state.preview() else {
            self.state
                .set_status_message(Some("Open a preview with 'p' before exporting"));
            return;
        };
        match export_note(note, &self.config.notes.export_dir) {
            Ok(path) => {
                self.state
                    .set_status_message(Some(format!("Exported to {}", path.display())));
            }
            Err(err) => {
                tracing::error!(?err, "export failed");
                self.state.set_status_message(Some(format!("Export failed: {err}")));
            }
        }
    }

    fn open_link(&mut self, in_window: bool) {
        let Selection::Ready { note, .. } = self.notes.selection() else {
            self.state.set_status_message(Some("No note selected"));
            return;
        };
        let Some(url) = first_link(&note.content) else {
            self.state.set_status_message(Some("No link in this note"));
            return;
        };
        let command = if in_window {
            Command::OpenUrl { url: url.clone() }
        } else {
            Command::OpenExternalUrl { url: url.clone() }
        };
        match self.client.send(command) {
            Ok(()) => self.state.set_status_message(Some(format!("Opening {url}"))),
            Err(err) => self.state.set_status_message(Some(err.to_string())),
        }
    }

    fn shutdown(&mut self) {
        // Unanswered prompts count as cancel once dropped, which frees the host. Swapping
        // the receiver out also cancels prompts for requests still queued behind others.
        self.dialogs = crossbeam_channel::never();
        self.state.restore_overlay(None);
        self.flush_editor();
        if let Err(err) = self.notes.settle(&self.client, SHUTDOWN_GRACE) {
            tracing::warn!(%err, "exiting with replies still pending");
        }
        if let Some(host) = self.host.take() {
            host.shutdown();
        }
    }
}

/// Plain-text rendering of the preview, written next to other exports.
pub fn export_note(note: &Note, export_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(export_dir)
        .with_context(|| format!("creating export directory {}", export_dir.display()))?;
    let path = export_dir.join(format!("{}.md.txt", note.title()));
    let body = format!(
        "# {}\nUpdated: {}\n\n{}",
        note.title(),
        format_edit_time(note.info.last_edit_time),
        note.content
    );
    fs::write(&path, body).with_context(|| format!("writing export {}", path.display()))?;
    Ok(path)
}

/// First `http(s)://` or `mailto:` link in `content`, with Markdown punctuation stripped.
pub fn first_link(content: &str) -> Option<String> {
    content
        .split(|ch: char| ch.is_whitespace() || matches!(ch, '(' | ')' | '<' | '>' | '[' | ']'))
        .map(|word| word.trim_end_matches(['.', ',', ';', '"', '\'']))
        .find(|word| {
            ["http://", "https://", "mailto:"]
                .iter()
                .any(|scheme| word.starts_with(scheme) && word.len() > scheme.len())
        })
        .map(str::to_string)
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<Stdout>>> {
    enable_raw_mode().context("enabling raw mode")?;
    let mut stdout = std::io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
        .context("switching to alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("creating terminal backend")?;
    terminal.hide_cursor().context("hiding cursor")?;
    Ok(terminal)
}

fn restore_terminal(terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
    terminal.show_cursor().ok();
    disable_raw_mode().context("disabling raw mode")?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )
    .context("restoring screen state")?;
    Ok(())
}
