use std::io;

use crossbeam_channel::Sender;

use crate::ipc::PushEvent;
use crate::storage::Note;

const EXTERNAL_SCHEMES: [&str; 3] = ["http://", "https://", "mailto:"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRole {
    Main,
    Secondary,
}

/// OS-facing side effects the host cannot perform itself.
pub trait Shell: Send {
    fn open_external(&mut self, url: &str) -> io::Result<()>;
    /// A host-owned window pointed at `url`. Terminal builds have no web view, so the
    /// default hands the page to the system browser as well.
    fn open_window(&mut self, url: &str) -> io::Result<()> {
        self.open_external(url)
    }
}

#[derive(Debug, Default)]
pub struct SystemShell;

impl Shell for SystemShell {
    fn open_external(&mut self, url: &str) -> io::Result<()> {
        open::that(url)
    }
}

struct WindowSlot {
    id: WindowId,
    events: Sender<PushEvent>,
    open: bool,
    dev_tools_open: bool,
}

impl WindowSlot {
    fn post(&self, role: WindowRole, event: PushEvent) -> bool {
        if !self.open {
            tracing::debug!(?role, channel = %event.channel(), "window closed, dropping push");
            return false;
        }
        match self.events.send(event) {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(?role, channel = %err.0.channel(), "window gone, dropping push");
                false
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlWindow {
    pub id: WindowId,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondaryOutcome {
    Created,
    Focused,
}

/// Owns every window the host knows about. Anything that needs to post to a window
/// borrows the manager instead of reaching for a global handle.
pub struct WindowManager {
    main: WindowSlot,
    secondary: WindowSlot,
    url_windows: Vec<UrlWindow>,
    shell: Box<dyn Shell>,
    next_id: u64,
}

impl WindowManager {
    pub fn new(
        main: Sender<PushEvent>,
        secondary: Sender<PushEvent>,
        shell: Box<dyn Shell>,
    ) -> Self {
        Self {
            main: WindowSlot {
                id: WindowId(1),
                events: main,
                open: true,
                dev_tools_open: false,
            },
            secondary: WindowSlot {
                id: WindowId(2),
                events: secondary,
                open: false,
                dev_tools_open: false,
            },
            url_windows: Vec::new(),
            shell,
            next_id: 3,
        }
    }

    pub fn post_main(&self, event: PushEvent) -> bool {
        self.main.post(WindowRole::Main, event)
    }

    pub fn post_secondary(&self, event: PushEvent) -> bool {
        self.secondary.post(WindowRole::Secondary, event)
    }

    /// Opens the preview window, or focuses it when already open, then hands it `note`.
    pub fn open_secondary(&mut self, note: Note) -> SecondaryOutcome {
        let outcome = if self.secondary.open {
            SecondaryOutcome::Focused
        } else {
            self.secondary.open = true;
            SecondaryOutcome::Created
        };
        tracing::info!(?outcome, title = %note.title(), "secondary window");
        self.post_secondary(PushEvent::SecondaryWindowData(note));
        outcome
    }

    pub fn is_secondary_open(&self) -> bool {
        self.secondary.open
    }

    pub fn open_dev_tools(&mut self) {
        tracing::info!(window = ?self.main.id, "opening dev tools");
        self.main.dev_tools_open = true;
    }

    pub fn dev_tools_open(&self) -> bool {
        self.main.dev_tools_open
    }

    pub fn open_url_window(&mut self, url: &str) -> Option<WindowId> {
        if !is_external_url(url) {
            tracing::warn!(%url, "refusing to open window for non-web url");
            return None;
        }
        let id = WindowId(self.next_id);
        self.next_id += 1;
        if let Err(err) = self.shell.open_window(url) {
            tracing::error!(?err, %url, "failed to open url window");
            return None;
        }
        self.url_windows.push(UrlWindow {
            id,
            url: url.to_string(),
        });
        Some(id)
    }

    pub fn open_external(&mut self, url: &str) -> bool {
        if !is_external_url(url) {
            tracing::warn!(%url, "refusing to open non-web url externally");
            return false;
        }
        match self.shell.open_external(url) {
            Ok(()) => true,
            Err(err) => {
                tracing::error!(?err, %url, "failed to open url in browser");
                false
            }
        }
    }

    pub fn url_windows(&self) -> &[UrlWindow] {
        &self.url_windows
    }
}

fn is_external_url(url: &str) -> bool {
    let lowered = url.trim().to_ascii_lowercase();
    EXTERNAL_SCHEMES
        .iter()
        .any(|scheme| lowered.starts_with(scheme) && lowered.len() > scheme.len())
}
